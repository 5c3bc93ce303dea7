//! Frame ingest listener
//!
//! Plugins connect here and push their decoded frames; every connection runs
//! [`VideoStreamingService::ingest_stream`] in its own task.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::error::Result;

use super::service::VideoStreamingService;

/// TCP listener feeding the streaming service
pub struct FrameIngestServer {
    listener: TcpListener,
    service: Arc<VideoStreamingService>,
    next_connection_id: AtomicU64,
    connection_semaphore: Option<Arc<Semaphore>>,
    connections: CancellationToken,
}

impl FrameIngestServer {
    /// Bind to the service's configured ingest address
    pub async fn bind(service: Arc<VideoStreamingService>) -> Result<Self> {
        let addr = service.config().ingest_addr;
        Self::bind_to(addr, service).await
    }

    /// Bind to an explicit address
    pub async fn bind_to(addr: SocketAddr, service: Arc<VideoStreamingService>) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;

        let max = service.config().max_ingest_connections;
        let connection_semaphore = if max > 0 {
            Some(Arc::new(Semaphore::new(max)))
        } else {
            None
        };

        tracing::info!(addr = %listener.local_addr()?, "Frame ingest listening");

        Ok(Self {
            listener,
            service,
            next_connection_id: AtomicU64::new(1),
            connection_semaphore,
            connections: CancellationToken::new(),
        })
    }

    /// Bound address (useful with port 0)
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until `shutdown` resolves
    ///
    /// Open connections are closed when this returns.
    pub async fn run_until<F>(&self, shutdown: F) -> Result<()>
    where
        F: std::future::Future<Output = ()>,
    {
        let result = tokio::select! {
            _ = shutdown => {
                tracing::info!("Frame ingest shutting down");
                Ok(())
            }
            result = self.accept_loop() => result,
        };

        self.connections.cancel();
        result
    }

    async fn accept_loop(&self) -> Result<()> {
        loop {
            match self.listener.accept().await {
                Ok((socket, peer_addr)) => self.handle_connection(socket, peer_addr),
                Err(e) => {
                    tracing::error!(error = %e, "Failed to accept ingest connection");
                }
            }
        }
    }

    fn handle_connection(&self, socket: TcpStream, peer_addr: SocketAddr) {
        let permit = match self.connection_semaphore {
            Some(ref sem) => match Arc::clone(sem).try_acquire_owned() {
                Ok(permit) => Some(permit),
                Err(_) => {
                    tracing::warn!(peer = %peer_addr, "Ingest connection rejected: limit reached");
                    return;
                }
            },
            None => None,
        };

        let connection_id = self.next_connection_id.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(connection_id, peer = %peer_addr, "New ingest connection");

        if let Err(e) = socket.set_nodelay(true) {
            tracing::debug!(connection_id, error = %e, "Failed to set TCP_NODELAY");
        }

        let service = Arc::clone(&self.service);
        let cancel = self.connections.child_token();

        tokio::spawn(async move {
            let _permit = permit;

            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::debug!(connection_id, "Ingest connection closed by shutdown");
                }
                result = service.ingest_stream(socket) => match result {
                    Ok(frames) => {
                        tracing::debug!(connection_id, frames, "Ingest connection closed");
                    }
                    Err(e) => {
                        tracing::warn!(connection_id, peer = %peer_addr, error = %e, "Ingest connection failed");
                    }
                },
            }
        });
    }
}

impl std::fmt::Debug for FrameIngestServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameIngestServer")
            .field("addr", &self.listener.local_addr().ok())
            .finish()
    }
}
