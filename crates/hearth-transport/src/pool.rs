//! The connection worker pool.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use hearth_room::RoomRegistry;
use hearth_session::{Authenticator, SessionManager};
use parking_lot::Mutex;
use rustls::ServerConfig;
use tokio::net::TcpStream;

use crate::connection::{ConnectionId, ConnectionState};
use crate::http::{HttpRouter, NotFoundRouter};
use crate::worker::{Reader, Worker, WorkerId, Writer};
use crate::{TransportConfig, TransportError};

/// Everything the pool needs besides the authenticator and the layers it
/// feeds.
#[derive(Clone)]
pub struct PoolSettings {
    pub config: TransportConfig,
    /// Present to accept TLS connections.
    pub tls: Option<Arc<ServerConfig>>,
    /// Answers plain HTTP requests.
    pub router: Arc<dyn HttpRouter>,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            config: TransportConfig::default(),
            tls: None,
            router: Arc::new(NotFoundRouter),
        }
    }
}

pub(crate) struct PoolShared<A: Authenticator> {
    pub(crate) config: TransportConfig,
    pub(crate) tls: Option<Arc<ServerConfig>>,
    pub(crate) router: Arc<dyn HttpRouter>,
    pub(crate) auth: Arc<A>,
    pub(crate) sessions: Arc<SessionManager>,
    pub(crate) registry: Arc<RoomRegistry>,
    workers: Mutex<Vec<Arc<Worker>>>,
    next_worker_id: AtomicU64,
    next_conn_id: AtomicU64,
    stopping: AtomicBool,
}

impl<A: Authenticator> PoolShared<A> {
    pub(crate) fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::Acquire)
    }

    /// Removes `worker` from the pool if it has no connections and is not
    /// the last pair. Decided under the pool lock so no connection can be
    /// assigned to a retiring worker.
    pub(crate) fn try_retire(&self, worker: &Arc<Worker>) -> bool {
        let mut workers = self.workers.lock();
        if workers.len() <= 1 || worker.load() > 0 {
            return false;
        }
        workers.retain(|w| !Arc::ptr_eq(w, worker));
        worker.retire();
        true
    }
}

/// Reader/writer worker pairs serving every accepted connection.
///
/// Connections are packed onto existing workers up to
/// `max_connections_per_worker`; a new pair is spawned only when all are
/// full, and idle pairs beyond the first retire on their own.
pub struct ConnectionWorkerPool<A: Authenticator> {
    shared: Arc<PoolShared<A>>,
}

impl<A: Authenticator> Clone for ConnectionWorkerPool<A> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<A: Authenticator> ConnectionWorkerPool<A> {
    pub fn new(
        settings: PoolSettings,
        auth: A,
        sessions: Arc<SessionManager>,
        registry: Arc<RoomRegistry>,
    ) -> Self {
        Self {
            shared: Arc::new(PoolShared {
                config: settings.config.validated(),
                tls: settings.tls,
                router: settings.router,
                auth: Arc::new(auth),
                sessions,
                registry,
                workers: Mutex::new(Vec::new()),
                next_worker_id: AtomicU64::new(1),
                next_conn_id: AtomicU64::new(1),
                stopping: AtomicBool::new(false),
            }),
        }
    }

    pub fn config(&self) -> &TransportConfig {
        &self.shared.config
    }

    /// Hands an accepted socket to a worker. Must be called from within a
    /// Tokio runtime.
    ///
    /// Prefers a worker with room whose reader is idle in its readiness
    /// wait, then any worker with room, then a freshly spawned pair.
    ///
    /// # Errors
    /// [`TransportError::Shutdown`] once [`stop`](Self::stop) was called;
    /// the socket is dropped.
    pub fn assign(
        &self,
        socket: TcpStream,
        peer: SocketAddr,
    ) -> Result<ConnectionId, TransportError> {
        if self.shared.is_stopping() {
            return Err(TransportError::Shutdown);
        }
        let id = ConnectionId::new(self.shared.next_conn_id.fetch_add(1, Ordering::Relaxed));
        let conn = Arc::new(ConnectionState::new(id, peer, socket));
        let capacity = self.shared.config.max_connections_per_worker;

        let mut workers = self.shared.workers.lock();
        let chosen = workers
            .iter()
            .find(|w| w.load() < capacity && w.is_reader_waiting())
            .or_else(|| workers.iter().find(|w| w.load() < capacity))
            .cloned();
        let worker = match chosen {
            Some(worker) => worker,
            None => {
                let worker = self.spawn_worker();
                workers.push(Arc::clone(&worker));
                worker
            }
        };
        worker.insert(conn);
        drop(workers);

        tracing::debug!(conn_id = %id, %peer, worker = %worker.id(), "connection assigned");
        Ok(id)
    }

    fn spawn_worker(&self) -> Arc<Worker> {
        let id = WorkerId(self.shared.next_worker_id.fetch_add(1, Ordering::Relaxed));
        let worker = Arc::new(Worker::new(id));
        tokio::spawn(Reader::new(Arc::clone(&self.shared), Arc::clone(&worker)).run());
        tokio::spawn(Writer::new(Arc::clone(&self.shared), Arc::clone(&worker)).run());
        tracing::debug!(worker = %id, "worker pair spawned");
        worker
    }

    pub fn worker_count(&self) -> usize {
        self.shared.workers.lock().len()
    }

    /// Connections currently held by workers, including ones still being
    /// torn down.
    pub fn connection_count(&self) -> usize {
        self.shared.workers.lock().iter().map(|w| w.load()).sum()
    }

    /// Stops every worker. Live connections are dropped and their players
    /// see a non-disbanding disconnect.
    pub fn stop(&self) {
        if self.shared.stopping.swap(true, Ordering::AcqRel) {
            return;
        }
        let workers = std::mem::take(&mut *self.shared.workers.lock());
        tracing::info!(workers = workers.len(), "connection workers stopping");
        for worker in workers {
            worker.wake();
        }
    }

    pub fn is_stopping(&self) -> bool {
        self.shared.is_stopping()
    }
}
