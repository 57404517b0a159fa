//! Runs an optional operator-supplied command after negotiation, before `exec`.

use std::process::Command;

/// Runs `hook[0] hook[1..] <ssh_port> <tun_port>` to completion.
///
/// The hook's exit status is logged but never changes control flow — §7
/// classifies a non-zero hook exit as advisory, not fatal. `ssh` is execed
/// regardless of what the hook returns, or whether it could even be spawned.
pub fn run(hook: &[String], ssh_port: u16, tun_port: u16) {
    let Some((program, args)) = hook.split_first() else {
        return;
    };

    let status = Command::new(program)
        .args(args)
        .arg(ssh_port.to_string())
        .arg(tun_port.to_string())
        .status();

    match status {
        Ok(status) if status.success() => {
            log::debug!("mux hook exited successfully: {hook:?}");
        }
        Ok(status) => {
            log::debug!("mux hook exited with {status}: {hook:?}");
        }
        Err(e) => {
            log::debug!("mux hook failed to start: {hook:?}: {e}");
        }
    }
}
