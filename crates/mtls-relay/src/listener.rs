//! Accept loop shared by both forwarders

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tracing::error;

/// Port part of a `host:port` address, empty if there is none
pub fn port_of(address: &str) -> String {
    address
        .rsplit_once(':')
        .map(|(_, port)| port.to_string())
        .unwrap_or_default()
}

/// Accept connections forever, running `handle` in its own task for each.
///
/// With `max_connections` set, the loop waits for a free slot before
/// accepting, so excess clients queue in the listen backlog. A slot is held
/// until the connection's task finishes. Accept errors are logged and the
/// loop keeps going.
pub async fn accept_loop<H, Fut>(
    listener: &TcpListener,
    max_connections: Option<usize>,
    handle: H,
) where
    H: Fn(TcpStream, SocketAddr) -> Fut,
    Fut: Future<Output = ()> + Send + 'static,
{
    let limiter = max_connections
        .map(|max| Arc::new(Semaphore::new(max.min(Semaphore::MAX_PERMITS))));

    loop {
        let permit = match &limiter {
            Some(limiter) => match limiter.clone().acquire_owned().await {
                Ok(permit) => Some(permit),
                Err(_) => return,
            },
            None => None,
        };

        match listener.accept().await {
            Ok((stream, peer_addr)) => {
                let session = handle(stream, peer_addr);
                tokio::spawn(async move {
                    let _permit = permit;
                    session.await;
                });
            }
            Err(e) => {
                error!("Accept failed: {}", e);
            }
        }
    }
}
