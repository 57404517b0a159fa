//! Replaces the current process image with `ssh` once negotiation succeeds.

use std::os::unix::process::CommandExt;
use std::process::Command;

use anyhow::{Context, Result};

/// Execs `ssh` with the fixed reverse-tunnel option set, never returning on
/// success.
///
/// `exec` replaces this process in place; if this function returns at all,
/// `ssh` could not even be started and the error is the caller's fatal exit
/// path.
pub fn exec_ssh(login: &str, ssh_port: u16, tun_port: u16, debug_ssh: bool) -> Result<()> {
    let mut cmd = Command::new("ssh");
    cmd.arg("-oControlPath=none")
        .arg("-oControlMaster=no")
        .arg("-oConnectTimeout=180")
        .arg("-oServerAliveInterval=6")
        .arg("-oServerAliveCountMax=10")
        .arg("-oBatchMode=yes")
        .arg("-oPasswordAuthentication=no")
        .arg("-oNumberOfPasswordPrompts=0")
        .arg("-oExitOnForwardFailure=yes")
        .arg("-NnT")
        .arg(format!("-p{ssh_port}"))
        .arg("-R")
        .arg(format!("{tun_port}:localhost:22"));

    if debug_ssh {
        cmd.arg("-vvv");
    }

    cmd.arg(login);

    log::debug!("exec: {cmd:?}");
    let err = cmd.exec();
    Err(err).context("failed to exec ssh")
}
