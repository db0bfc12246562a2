//! The accept loop.

use std::net::SocketAddr;

use hearth_session::Authenticator;
use tokio::net::TcpListener;
use tokio::sync::watch;

use crate::{ConnectionWorkerPool, TransportError};

/// Accepts TCP connections and hands them to a [`ConnectionWorkerPool`].
pub struct TransportListener {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl TransportListener {
    /// Binds to `addr`. Use port 0 to let the OS pick one.
    pub async fn bind(addr: &str) -> Result<Self, TransportError> {
        let listener =
            TcpListener::bind(addr)
                .await
                .map_err(|source| TransportError::BindFailed {
                    addr: addr.to_owned(),
                    source,
                })?;
        let local_addr = listener.local_addr()?;
        tracing::info!(%local_addr, "transport listening");
        Ok(Self {
            listener,
            local_addr,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accepts until `shutdown` turns `true` (or its sender is dropped),
    /// then stops the pool.
    pub async fn run<A: Authenticator>(
        self,
        pool: ConnectionWorkerPool<A>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(), TransportError> {
        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((socket, peer)) => {
                        if let Err(e) = socket.set_nodelay(true) {
                            tracing::debug!(%peer, error = %e, "set_nodelay failed");
                        }
                        if let Err(e) = pool.assign(socket, peer) {
                            tracing::warn!(%peer, error = %e, "connection refused");
                        }
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "accept failed");
                        tokio::time::sleep(pool.config().poll_interval).await;
                    }
                },
            }
        }

        tracing::info!(local_addr = %self.local_addr, "transport listener stopped");
        pool.stop();
        Ok(())
    }
}
