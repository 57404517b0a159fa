#[global_allocator]
#[cfg(not(feature = "system_allocator"))]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use std::net::ToSocketAddrs;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;

use ssh_reverse_mux::cli::ClientArgs;
use ssh_reverse_mux::client::negotiate;
use ssh_reverse_mux::identity::IdentitySource;
use ssh_reverse_mux::{exec, hook, host};

#[tokio::main]
async fn main() -> Result<()> {
    let args = ClientArgs::parse();
    simple_logger::init_with_level(if args.debug {
        log::Level::Debug
    } else {
        log::Level::Info
    })?;

    let target = host::parse_host(&args.host);
    let mux_port = target.mux_port.unwrap_or(args.mux_port);

    let identity_source = if let Some(ident) = &args.ident_string {
        IdentitySource::Literal(ident.clone())
    } else if args.ident_rpi {
        IdentitySource::RpiSerial
    } else if let Some(cmd) = &args.ident_cmd {
        IdentitySource::ExternalCommand(cmd.clone())
    } else {
        IdentitySource::MachineId
    };

    let secret = args.auth_secret.as_bytes();
    let ident = identity_source
        .resolve(secret)
        .context("failed to resolve client identity")?;

    let server_addr = (target.hostname.as_str(), mux_port)
        .to_socket_addrs()
        .with_context(|| format!("failed to resolve {}:{mux_port}", target.hostname))?
        .next()
        .with_context(|| format!("no addresses found for {}", target.hostname))?;

    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        let terminate = async {
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to install SIGTERM handler")
                .recv()
                .await;
        };

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {},
            _ = terminate => {},
        }

        log::info!("received shutdown signal, cancelling negotiation");
        signal_cancel.cancel();
    });

    log::info!("negotiating with {server_addr} as identity of {} bytes", ident.len());

    let (default_ssh_port, tun_port) = match negotiate(
        secret,
        &ident,
        server_addr,
        args.attempts,
        args.timeout,
        &cancel,
    )
    .await
    {
        Ok(result) => result,
        Err(e) => {
            log::error!("negotiation failed: {e}");
            return Err(e);
        }
    };

    let ssh_port = args.ssh_port.unwrap_or(default_ssh_port);
    log::info!("negotiated ssh_port={ssh_port} tun_port={tun_port}");

    if !args.mux_hook.is_empty() {
        hook::run(&args.mux_hook, ssh_port, tun_port);
    }

    exec::exec_ssh(&target.login, ssh_port, tun_port, args.debug_ssh)?;
    unreachable!("exec replaces the process image on success");
}
