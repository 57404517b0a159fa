//! Command-line argument structs for `mux-client` and `mux-server`.
//!
//! Parsed with `clap`'s derive API, the same macro style the reference TURN
//! server's CLI structs use, including `env!("CARGO_PKG_*")` metadata wiring.

use clap::Parser;

use crate::DEFAULT_MUX_PORT;

/// Negotiates a reverse-tunnel port with `mux-server`, then execs `ssh -R`.
#[derive(Parser, Debug)]
#[command(
    name = env!("CARGO_PKG_NAME"),
    version = env!("CARGO_PKG_VERSION"),
    author = env!("CARGO_PKG_AUTHORS"),
)]
pub struct ClientArgs {
    /// `[user@]hostname[:port]` of the mux server; `:port` overrides `--mux-port`.
    pub host: String,

    /// Shared secret authenticating the mux exchange.
    #[arg(short = 's', long = "auth-secret")]
    pub auth_secret: String,

    /// Literal identity string, overriding every other identity source.
    #[arg(short = 'i', long = "ident-string")]
    pub ident_string: Option<String>,

    /// Derive identity from the `Serial:` line of `/proc/cpuinfo`.
    #[arg(long = "ident-rpi", conflicts_with = "ident_string")]
    pub ident_rpi: bool,

    /// Derive identity from the trimmed stdout of this shell command.
    #[arg(long = "ident-cmd", conflicts_with_all = ["ident_string", "ident_rpi"])]
    pub ident_cmd: Option<String>,

    /// Mux server UDP port, overridden by a `:port` suffix on `host`.
    #[arg(short = 'm', long = "mux-port", default_value_t = DEFAULT_MUX_PORT)]
    pub mux_port: u16,

    /// sshd port on the remote host; overrides the server-supplied value.
    #[arg(short = 'p', long = "ssh-port")]
    pub ssh_port: Option<u16>,

    /// Number of authenticated requests to send before giving up.
    #[arg(short = 'n', long = "attempts", default_value_t = 6)]
    pub attempts: usize,

    /// Overall negotiation timeout, in seconds.
    #[arg(short = 't', long = "timeout", default_value_t = 10.0)]
    pub timeout: f64,

    /// Command run after negotiation, before `exec`; `ssh_port tun_port` are appended.
    #[arg(short = 'c', long = "mux-hook", num_args = 1..)]
    pub mux_hook: Vec<String>,

    /// Enable debug logging.
    #[arg(short = 'd', long = "debug")]
    pub debug: bool,

    /// Pass `-vvv` to the eventual `ssh` invocation.
    #[arg(long = "debug-ssh")]
    pub debug_ssh: bool,
}

/// Authenticates requests, allocates tunnel ports, and replies.
#[derive(Parser, Debug)]
#[command(
    name = env!("CARGO_PKG_NAME"),
    version = env!("CARGO_PKG_VERSION"),
    author = env!("CARGO_PKG_AUTHORS"),
)]
pub struct ServerArgs {
    /// Address to bind the mux UDP socket on.
    #[arg(default_value = "::")]
    pub bind: String,

    /// Shared secret authenticating the mux exchange.
    #[arg(short = 's', long = "auth-secret")]
    pub auth_secret: String,

    /// Path to the identity store database.
    #[arg(short = 'i', long = "ident-db", default_value = "ssh-reverse-mux-ident.db")]
    pub ident_db: String,

    /// Print every stored identity-to-port mapping and exit.
    #[arg(short = 'l', long = "ident-list")]
    pub ident_list: bool,

    /// Mux server UDP port.
    #[arg(short = 'm', long = "mux-port", default_value_t = DEFAULT_MUX_PORT)]
    pub mux_port: u16,

    /// sshd port reported to clients.
    #[arg(short = 'p', long = "ssh-port", default_value_t = 22)]
    pub ssh_port: u16,

    /// Inclusive `A:B` range tunnel ports are allocated from.
    #[arg(short = 'r', long = "tunnel-port-range", default_value = "22000:22100")]
    pub tunnel_port_range: String,

    /// Number of response retries sent per request.
    #[arg(short = 'n', long = "attempts", default_value_t = 4)]
    pub attempts: usize,

    /// Total span of the response-retry schedule, in seconds.
    #[arg(short = 't', long = "timeout", default_value_t = 5.0)]
    pub timeout: f64,

    /// Enable debug logging.
    #[arg(short = 'd', long = "debug")]
    pub debug: bool,
}
