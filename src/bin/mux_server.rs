#[global_allocator]
#[cfg(not(feature = "system_allocator"))]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;

use ssh_reverse_mux::cli::ServerArgs;
use ssh_reverse_mux::server::listen;
use store::{IdentityStore, PortRange};

#[tokio::main]
async fn main() -> Result<()> {
    let args = ServerArgs::parse();
    simple_logger::init_with_level(if args.debug {
        log::Level::Debug
    } else {
        log::Level::Info
    })?;

    let store = Arc::new(
        IdentityStore::open(&args.ident_db)
            .with_context(|| format!("failed to open identity store at {}", args.ident_db))?,
    );

    if args.ident_list {
        for (ident, port) in store.items().context("failed to list identity store")? {
            println!("{ident}\t{port}");
        }
        return Ok(());
    }

    let range: PortRange = args
        .tunnel_port_range
        .parse()
        .with_context(|| format!("invalid tunnel port range: {}", args.tunnel_port_range))?;

    let bind_addr = format!("{}:{}", args.bind, args.mux_port);
    let socket = UdpSocket::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind mux socket on {bind_addr}"))?;
    log::info!("mux-server listening on {bind_addr}, tunnel range {range}");

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

        log::info!("received shutdown signal, draining in-flight responses");
        signal_cancel.cancel();
    });

    listen(
        socket,
        args.auth_secret.into_bytes(),
        store,
        range,
        args.ssh_port,
        args.attempts,
        args.timeout,
        cancel,
    )
    .await
}
