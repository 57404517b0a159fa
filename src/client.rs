//! Client-side negotiation loop: send authenticated requests on a backoff
//! schedule, accept the first authenticated response.

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use tokio::net::UdpSocket;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use crate::backoff::retries_within_timeout;

/// Runs the client negotiation loop and returns `(ssh_port, tun_port)` on the
/// first authenticated response.
///
/// `attempts` is the number of datagrams sent in total (1 initial send plus
/// `attempts - 1` resends); per §4.2 the inter-send schedule is computed as
/// `retries_within_timeout(attempts + 1, timeout)` with the final delay
/// dropped, so the client never sleeps past its own overall deadline before
/// giving up.
pub async fn negotiate(
    secret: &[u8],
    ident: &[u8],
    server_addr: SocketAddr,
    attempts: usize,
    overall_timeout: f64,
    cancel: &CancellationToken,
) -> Result<(u16, u16)> {
    let mut schedule = retries_within_timeout(attempts + 1, overall_timeout);
    schedule.pop();

    let request = codec::build_request(secret, ident).context("failed to build request")?;

    let mut socket = UdpSocket::bind("0.0.0.0:0")
        .await
        .context("failed to bind client socket")?;
    socket
        .connect(server_addr)
        .await
        .context("failed to connect client socket")?;

    let mut buf = vec![0u8; 256];

    for delay in schedule {
        if cancel.is_cancelled() {
            bail!("negotiation cancelled");
        }

        if let Err(e) = socket.send(&request).await {
            log::debug!("transport error sending request, reopening socket: {e}");
            socket = UdpSocket::bind("0.0.0.0:0")
                .await
                .context("failed to reopen client socket")?;
            socket
                .connect(server_addr)
                .await
                .context("failed to reconnect client socket")?;
            continue;
        }

        let deadline = Duration::from_secs_f64(delay.max(0.0));
        let recv = tokio::select! {
            result = timeout(deadline, socket.recv(&mut buf)) => result,
            _ = cancel.cancelled() => bail!("negotiation cancelled"),
        };

        if let Ok(Ok(size)) = recv {
            if let Ok((ssh_port, tun_port)) = codec::parse_response(secret, ident, &buf[..size]) {
                return Ok((ssh_port, tun_port));
            }
        }
    }

    bail!("negotiation timed out after {attempts} attempts")
}
