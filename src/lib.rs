//! Authenticated UDP rendezvous and port allocator for reverse SSH tunnels.
//!
//! `mux-client` resolves a stable identity, negotiates a `(ssh_port,
//! tun_port)` pair with `mux-server` over a small MAC'd UDP exchange, then
//! execs `ssh -R`. `mux-server` authenticates requests, allocates ports from
//! a configured range, persists the identity-to-port binding, and replies.
//! See [`backoff`], [`client`], [`server`] for the three shared primitives,
//! and [`identity`], [`hook`], [`exec`] for the outer wrappers that turn the
//! protocol core into runnable binaries.

pub mod backoff;
pub mod cli;
pub mod client;
pub mod exec;
pub mod hook;
pub mod host;
pub mod identity;
pub mod server;

/// Default UDP port both peers rendezvous on.
pub const DEFAULT_MUX_PORT: u16 = 8739;
