//! Server-side listen loop: authenticate, allocate, persist, and retry-send
//! the response for each requesting identity.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use ahash::RandomState;
use anyhow::{Context, Result};
use store::{IdentityStore, PortRange, allocate};
use parking_lot::Mutex;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::backoff::retries_within_timeout;

/// Registry of in-flight per-identity response-retry tasks, deduplicating
/// concurrent requests from the same identity (§4.5 step 3-4, §9's
/// single-identity-serialization design note — resolved here as a plain map
/// behind a lock, since the recv loop is the only writer).
type Registry = Mutex<HashMap<Vec<u8>, JoinHandle<()>, RandomState>>;

/// Runs the server listen loop until `cancel` fires, then awaits every
/// in-flight response task before returning.
pub async fn listen(
    socket: UdpSocket,
    secret: Vec<u8>,
    store: Arc<IdentityStore>,
    range: PortRange,
    ssh_port: u16,
    attempts: usize,
    timeout: f64,
    cancel: CancellationToken,
) -> Result<()> {
    let socket = Arc::new(socket);
    let registry: Arc<Registry> = Arc::new(Mutex::new(HashMap::default()));
    let schedule = Arc::new(retries_within_timeout(attempts, timeout));
    let mut buf = vec![0u8; 512];

    loop {
        let (size, peer) = tokio::select! {
            result = socket.recv_from(&mut buf) => result.context("mux socket recv failed")?,
            _ = cancel.cancelled() => break,
        };

        let ident = match codec::parse_request(&secret, &buf[..size]) {
            Ok(ident) => ident,
            Err(e) => {
                log::debug!("dropping request from {peer}: {e}");
                continue;
            }
        };

        {
            let mut guard = registry.lock();
            if let Some(handle) = guard.get(&ident) {
                if !handle.is_finished() {
                    log::debug!("dropping duplicate in-flight request for identity");
                    continue;
                }
                guard.remove(&ident).unwrap();
            }
        }

        let tun_port = match allocate(&store, &ident, range) {
            Ok(Some(port)) => port,
            Ok(None) => {
                log::warn!("tunnel port range exhausted, dropping request");
                continue;
            }
            Err(e) => {
                log::warn!("identity store error, dropping request: {e}");
                continue;
            }
        };

        let response = match codec::build_response(&secret, &ident, ssh_port, tun_port) {
            Ok(bytes) => bytes,
            Err(e) => {
                log::warn!("failed to build response, dropping request: {e}");
                continue;
            }
        };

        log::info!("allocated tun_port={tun_port} for identity, replying to {peer}");

        let task_socket = socket.clone();
        let task_schedule = schedule.clone();
        let handle = tokio::spawn(async move {
            let last = task_schedule.len().saturating_sub(1);
            for (i, delay) in task_schedule.iter().enumerate() {
                if let Err(e) = task_socket.send_to(&response, peer).await {
                    log::debug!("transport error sending response retry: {e}");
                }
                if i < last && *delay > 0.0 {
                    tokio::time::sleep(Duration::from_secs_f64(*delay)).await;
                }
            }
        });

        registry.lock().insert(ident, handle);
    }

    let handles: Vec<JoinHandle<()>> = registry.lock().drain().map(|(_, handle)| handle).collect();
    for handle in handles {
        let _ = handle.await;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::UdpSocket as ClientSocket;

    async fn run_server(
        secret: &'static [u8],
        store: Arc<IdentityStore>,
        range: PortRange,
    ) -> (SocketAddr, CancellationToken, tokio::task::JoinHandle<()>) {
        run_server_with_schedule(secret, store, range, 2, 1.0).await
    }

    async fn run_server_with_schedule(
        secret: &'static [u8],
        store: Arc<IdentityStore>,
        range: PortRange,
        attempts: usize,
        timeout: f64,
    ) -> (SocketAddr, CancellationToken, tokio::task::JoinHandle<()>) {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap();
        let cancel = CancellationToken::new();
        let task_cancel = cancel.clone();

        let handle = tokio::spawn(async move {
            listen(socket, secret.to_vec(), store, range, 22, attempts, timeout, task_cancel)
                .await
                .unwrap();
        });

        (addr, cancel, handle)
    }

    #[tokio::test]
    async fn first_contact_allocation_end_to_end() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let store = Arc::new(IdentityStore::open(dir.path())?);
        let range = PortRange::new(22000, 22002)?;
        let (addr, cancel, handle) = run_server(b"shared-secret", store.clone(), range).await;

        let client = ClientSocket::bind("127.0.0.1:0").await?;
        client.connect(addr).await?;
        let request = codec::build_request(b"shared-secret", b"node-a")?;
        client.send(&request).await?;

        let mut buf = vec![0u8; 256];
        let size = client.recv(&mut buf).await?;
        let (ssh_port, tun_port) =
            codec::parse_response(b"shared-secret", b"node-a", &buf[..size])?;
        assert_eq!((ssh_port, tun_port), (22, 22000));
        assert_eq!(store.get(b"node-a")?, Some(22000));

        cancel.cancel();
        handle.await?;
        Ok(())
    }

    #[tokio::test]
    async fn auth_rejection_leaves_store_empty() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let store = Arc::new(IdentityStore::open(dir.path())?);
        let range = PortRange::new(22000, 22002)?;
        let (addr, cancel, handle) = run_server(b"server-secret", store.clone(), range).await;

        let client = ClientSocket::bind("127.0.0.1:0").await?;
        client.connect(addr).await?;
        let request = codec::build_request(b"client-secret", b"node-a")?;
        client.send(&request).await?;

        let result = tokio::time::timeout(Duration::from_millis(200), client.recv(&mut [0u8; 256])).await;
        assert!(result.is_err(), "server must not respond to an unauthenticated request");
        assert_eq!(store.items()?.len(), 0);

        cancel.cancel();
        handle.await?;
        Ok(())
    }

    #[tokio::test]
    async fn exhaustion_drops_the_request_without_mutation() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let store = Arc::new(IdentityStore::open(dir.path())?);
        let range = PortRange::new(22000, 22001)?;
        store.put(b"node-a", 22000)?;
        store.put(b"node-b", 22001)?;

        let (addr, cancel, handle) = run_server(b"shared-secret", store.clone(), range).await;

        let client = ClientSocket::bind("127.0.0.1:0").await?;
        client.connect(addr).await?;
        let request = codec::build_request(b"shared-secret", b"node-c")?;
        client.send(&request).await?;

        let result = tokio::time::timeout(Duration::from_millis(200), client.recv(&mut [0u8; 256])).await;
        assert!(result.is_err());
        assert_eq!(store.get(b"node-c")?, None);

        cancel.cancel();
        handle.await?;
        Ok(())
    }

    /// P8: dropping the server's first two response sends must not prevent
    /// the client from completing negotiation once a later repeat survives.
    #[tokio::test]
    async fn retry_absorbs_loss_of_the_first_two_responses() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let store = Arc::new(IdentityStore::open(dir.path())?);
        let range = PortRange::new(22000, 22002)?;
        let (server_addr, cancel, handle) =
            run_server_with_schedule(b"shared-secret", store.clone(), range, 4, 0.6).await;

        // A relay sits between the client and the real server: it forwards
        // requests through untouched but swallows the first two datagrams
        // coming back from the server, simulating lossy transit of exactly
        // the packets §8 scenario 6 calls out.
        let relay_socket = UdpSocket::bind("127.0.0.1:0").await?;
        let relay_addr = relay_socket.local_addr()?;
        let relay = tokio::spawn(async move {
            let mut buf = vec![0u8; 512];
            let mut dropped = 0usize;
            let mut client_addr: Option<SocketAddr> = None;

            loop {
                let (size, from) = match relay_socket.recv_from(&mut buf).await {
                    Ok(v) => v,
                    Err(_) => break,
                };

                if from == server_addr {
                    if dropped < 2 {
                        dropped += 1;
                        continue;
                    }
                    if let Some(client_addr) = client_addr {
                        let _ = relay_socket.send_to(&buf[..size], client_addr).await;
                    }
                } else {
                    client_addr = Some(from);
                    let _ = relay_socket.send_to(&buf[..size], server_addr).await;
                }
            }
        });

        let client_cancel = CancellationToken::new();
        let (ssh_port, tun_port) = crate::client::negotiate(
            b"shared-secret",
            b"node-a",
            relay_addr,
            3,
            3.0,
            &client_cancel,
        )
        .await?;
        assert_eq!((ssh_port, tun_port), (22, 22000));
        assert_eq!(store.items()?.len(), 1);

        relay.abort();
        cancel.cancel();
        handle.await?;
        Ok(())
    }
}
