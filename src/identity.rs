//! Sources of the client's stable identity string.
//!
//! The default reads `/etc/machine-id`; `--ident-rpi` reads the hardware
//! serial out of `/proc/cpuinfo`; `--ident-cmd` shells out; `-i` overrides
//! with a literal string. `MachineId` and `RpiSerial` are hashed with keyed
//! BLAKE2b so the wire identity is a short, fixed-shape digest rather than
//! whatever-length file contents; `Literal` and `ExternalCommand` are used
//! as-is, since the operator controls their shape directly.

use std::{path::Path, process::Command};

use anyhow::{Context, Result, bail};
use blake2::{Blake2bMac, digest::Mac, digest::consts::U32};
use regex::Regex;

type Blake2bMac256 = Blake2bMac<U32>;

const DEFAULT_MACHINE_ID_PATH: &str = "/etc/machine-id";
const DEFAULT_CPUINFO_PATH: &str = "/proc/cpuinfo";

/// Where the client's identity bytes come from.
#[derive(Debug, Clone)]
pub enum IdentitySource {
    /// `-i/--ident-string`: used verbatim, not hashed.
    Literal(String),
    /// Default source: keyed-BLAKE2b of `/etc/machine-id`'s trimmed contents.
    MachineId,
    /// `--ident-rpi`: keyed-BLAKE2b of the `Serial` line of `/proc/cpuinfo`.
    RpiSerial,
    /// `--ident-cmd`: the trimmed stdout of a shell command, used verbatim.
    ExternalCommand(String),
}

fn hash(secret: &[u8], data: &[u8]) -> Result<Vec<u8>> {
    let mut mac = Blake2bMac256::new_from_slice(secret).context("secret unusable as a MAC key")?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

fn serial_from_cpuinfo(cpuinfo: &str) -> Result<String> {
    let re = Regex::new(r"(?m)^Serial\s*:\s*([0-9a-fA-F]+)\s*$").expect("static regex is valid");
    let caps = re
        .captures(cpuinfo)
        .context("no Serial line found in /proc/cpuinfo")?;
    Ok(caps[1].to_string())
}

impl IdentitySource {
    /// Resolves this source to raw identity bytes, ready for [`codec::build_request`].
    ///
    /// Failure here is fatal for the client (§7's "identity-source failure"):
    /// the caller should propagate it straight to `main`'s exit path.
    pub fn resolve(&self, secret: &[u8]) -> Result<Vec<u8>> {
        let ident = match self {
            Self::Literal(ident) => ident.as_bytes().to_vec(),
            Self::MachineId => {
                let contents = std::fs::read_to_string(Path::new(DEFAULT_MACHINE_ID_PATH))
                    .with_context(|| format!("failed to read {DEFAULT_MACHINE_ID_PATH}"))?;
                hash(secret, contents.trim().as_bytes())?
            }
            Self::RpiSerial => {
                let cpuinfo = std::fs::read_to_string(Path::new(DEFAULT_CPUINFO_PATH))
                    .with_context(|| format!("failed to read {DEFAULT_CPUINFO_PATH}"))?;
                let serial = serial_from_cpuinfo(&cpuinfo)?;
                hash(secret, serial.as_bytes())?
            }
            Self::ExternalCommand(cmd) => {
                let output = Command::new("/bin/sh")
                    .arg("-c")
                    .arg(cmd)
                    .output()
                    .with_context(|| format!("failed to run identity command: {cmd}"))?;
                if !output.status.success() {
                    bail!(
                        "identity command exited with {}: {cmd}",
                        output.status
                    );
                }
                let stdout = String::from_utf8_lossy(&output.stdout);
                stdout.trim().as_bytes().to_vec()
            }
        };

        if ident.is_empty() || ident.len() > codec::MAX_IDENT_LEN {
            bail!(
                "resolved identity is {} bytes, must be 1..={}",
                ident.len(),
                codec::MAX_IDENT_LEN
            );
        }

        Ok(ident)
    }
}
