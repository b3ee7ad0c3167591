//! TCP server — accept loop and live-connection tracking.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, ToSocketAddrs};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::ipc::connection::Connection;
use crate::ipc::service::ServiceShared;
use crate::types::{ConnectionId, Result};

/// Pause after a failed `accept` so a persistent error (e.g. fd exhaustion)
/// does not spin.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

type ConnectionMap = Arc<Mutex<HashMap<ConnectionId, Connection>>>;

/// Listening side of a service.
#[derive(Debug)]
pub struct CommServer {
    shared: Arc<ServiceShared>,
    listener: TcpListener,
    local_addr: SocketAddr,
    cancel: CancellationToken,
    connections: ConnectionMap,
}

impl CommServer {
    pub(crate) async fn bind(addr: impl ToSocketAddrs, shared: Arc<ServiceShared>) -> Result<Self> {
        shared.config.validate()?;
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        Ok(Self {
            shared,
            listener,
            local_addr,
            cancel: CancellationToken::new(),
            connections: Arc::default(),
        })
    }

    /// Bound address (useful after binding port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accept connections until [`shutdown`](Self::shutdown) is called.
    ///
    /// A failed accept or a failed connection never stops the loop. On exit
    /// every live connection is closed.
    pub async fn serve(&self) -> Result<()> {
        let max_connections = self.shared.config.max_connections;
        let permits = Arc::new(Semaphore::new(max_connections));
        tracing::info!(
            "Comm server listening on {} (max_connections={})",
            self.local_addr,
            max_connections,
        );

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    tracing::info!("Comm server shutting down");
                    break;
                }
                accept = self.listener.accept() => {
                    let (stream, peer) = match accept {
                        Ok(accepted) => accepted,
                        Err(e) => {
                            tracing::warn!("Accept failed: {}", e);
                            tokio::time::sleep(ACCEPT_BACKOFF).await;
                            continue;
                        }
                    };

                    let Ok(permit) = permits.clone().try_acquire_owned() else {
                        tracing::warn!(
                            "Connection from {} rejected: at max_connections ({})",
                            peer,
                            max_connections,
                        );
                        drop(stream);
                        continue;
                    };

                    let connection = Connection::accept(stream, peer, self.shared.clone());
                    self.connections
                        .lock()
                        .insert(connection.id().clone(), connection.clone());
                    tracing::debug!(
                        "Accepted {} (active={})",
                        peer,
                        max_connections - permits.available_permits(),
                    );

                    let connections = self.connections.clone();
                    tokio::spawn(async move {
                        connection.closed().await;
                        connections.lock().remove(connection.id());
                        // slot released once the connection is gone
                        drop(permit);
                    });
                }
            }
        }

        self.close_all().await;
        Ok(())
    }

    /// Request graceful shutdown.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Snapshot of live connections.
    pub fn connections(&self) -> Vec<Connection> {
        self.connections.lock().values().cloned().collect()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.lock().len()
    }

    async fn close_all(&self) {
        let live = self.connections();
        for connection in &live {
            connection.close().await;
        }
        if !live.is_empty() {
            tracing::info!("Closed {} live connections", live.len());
        }
    }
}
