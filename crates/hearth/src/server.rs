//! `HearthServer` builder and server loop.
//!
//! This is the entry point for running a Hearth game server. It ties the
//! layers together: transport → session → room.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use hearth_room::{RoomConfig, RoomKind, RoomLogic, RoomRegistry};
use hearth_session::{Authenticator, SessionConfig, SessionManager};
use hearth_transport::{
    ConnectionWorkerPool, HttpRouter, PoolSettings, TlsSettings, TransportConfig,
    TransportListener,
};
use tokio::sync::watch;

use crate::{HearthError, StatusRouter};

/// Builder for configuring and starting a Hearth server.
///
/// # Example
///
/// ```rust,ignore
/// use hearth::prelude::*;
///
/// let server = HearthServer::builder()
///     .bind("0.0.0.0:8080")
///     .room("lobby", RoomConfig::default(), || Lobby)
///     .default_kind("lobby")
///     .build(my_auth)
///     .await?;
/// server.run().await
/// ```
pub struct HearthServerBuilder {
    bind_addr: String,
    transport: TransportConfig,
    tls: Option<TlsSettings>,
    session: SessionConfig,
    router: Option<Arc<dyn HttpRouter>>,
    kinds: Vec<(String, RoomKind)>,
    default_kind: Option<String>,
    maintenance_interval: Duration,
    shutdown_grace: Duration,
}

impl HearthServerBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self {
            bind_addr: "127.0.0.1:8080".to_string(),
            transport: TransportConfig::default(),
            tls: None,
            session: SessionConfig::default(),
            router: None,
            kinds: Vec::new(),
            default_kind: None,
            maintenance_interval: Duration::from_secs(5),
            shutdown_grace: Duration::from_secs(10),
        }
    }

    /// Sets the address to bind the server to.
    pub fn bind(mut self, addr: &str) -> Self {
        self.bind_addr = addr.to_string();
        self
    }

    pub fn transport_config(mut self, config: TransportConfig) -> Self {
        self.transport = config;
        self
    }

    /// Accepts TLS connections next to plain ones.
    pub fn tls(mut self, tls: TlsSettings) -> Self {
        self.tls = Some(tls);
        self
    }

    pub fn session_config(mut self, config: SessionConfig) -> Self {
        self.session = config;
        self
    }

    /// Replaces the default [`StatusRouter`] for plain HTTP requests.
    pub fn http_router(mut self, router: impl HttpRouter) -> Self {
        self.router = Some(Arc::new(router));
        self
    }

    /// Registers a room kind.
    pub fn room_kind(mut self, name: impl Into<String>, kind: RoomKind) -> Self {
        self.kinds.push((name.into(), kind));
        self
    }

    /// Registers a room kind from its config and logic factory.
    pub fn room<F, L>(self, name: impl Into<String>, config: RoomConfig, factory: F) -> Self
    where
        F: Fn() -> L + Send + Sync + 'static,
        L: RoomLogic,
    {
        self.room_kind(name, RoomKind::new(config, factory))
    }

    /// The kind used for the default room that homeless players join.
    pub fn default_kind(mut self, name: impl Into<String>) -> Self {
        self.default_kind = Some(name.into());
        self
    }

    /// How often stale sessions are expired and deletable rooms swept.
    pub fn maintenance_interval(mut self, interval: Duration) -> Self {
        self.maintenance_interval = interval.max(Duration::from_millis(10));
        self
    }

    /// How long shutdown waits for rooms to stop before dropping
    /// connections anyway.
    pub fn shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    /// Binds the listener, registers room kinds and creates the default
    /// room. Must be called from within a Tokio runtime.
    pub async fn build<A: Authenticator>(self, auth: A) -> Result<HearthServer<A>, HearthError> {
        let registry = RoomRegistry::new();
        for (name, kind) in self.kinds {
            registry.register_kind(name, kind);
        }
        if let Some(kind) = &self.default_kind {
            registry.set_default_kind(kind)?;
        }

        let sessions =
            Arc::new(SessionManager::new(self.session).with_directory(registry.directory()));
        let router = self
            .router
            .unwrap_or_else(|| Arc::new(StatusRouter::new(Arc::clone(&registry))) as Arc<dyn HttpRouter>);
        let settings = PoolSettings {
            config: self.transport,
            tls: self.tls.map(|tls| tls.config()),
            router,
        };
        let pool =
            ConnectionWorkerPool::new(settings, auth, Arc::clone(&sessions), Arc::clone(&registry));
        let listener = TransportListener::bind(&self.bind_addr).await?;
        let (shutdown, _) = watch::channel(false);

        Ok(HearthServer {
            listener,
            pool,
            registry,
            sessions,
            shutdown: ShutdownHandle(Arc::new(shutdown)),
            maintenance_interval: self.maintenance_interval,
            shutdown_grace: self.shutdown_grace,
        })
    }
}

impl Default for HearthServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Triggers a graceful shutdown of a running [`HearthServer`].
#[derive(Clone)]
pub struct ShutdownHandle(Arc<watch::Sender<bool>>);

impl ShutdownHandle {
    pub fn shutdown(&self) {
        self.0.send_replace(true);
    }

    pub fn is_shutdown(&self) -> bool {
        *self.0.borrow()
    }
}

/// A Hearth game server, bound and ready to run.
pub struct HearthServer<A: Authenticator> {
    listener: TransportListener,
    pool: ConnectionWorkerPool<A>,
    registry: Arc<RoomRegistry>,
    sessions: Arc<SessionManager>,
    shutdown: ShutdownHandle,
    maintenance_interval: Duration,
    shutdown_grace: Duration,
}

impl<A: Authenticator> HearthServer<A> {
    /// Creates a new builder.
    pub fn builder() -> HearthServerBuilder {
        HearthServerBuilder::new()
    }

    /// Returns the local address the server is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.listener.local_addr()
    }

    pub fn registry(&self) -> &Arc<RoomRegistry> {
        &self.registry
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    /// Serves until [`ShutdownHandle::shutdown`] is called.
    ///
    /// Shutdown asks every room to stop, waits up to the grace period for
    /// them to finish, then stops accepting and drops remaining
    /// connections.
    pub async fn run(self) -> Result<(), HearthError> {
        let local_addr = self.local_addr();
        let Self {
            listener,
            pool,
            registry,
            sessions,
            shutdown,
            maintenance_interval,
            shutdown_grace,
        } = self;
        tracing::info!(%local_addr, rooms = registry.room_count(), "hearth server running");

        let (accept_stop, accept_rx) = watch::channel(false);
        let accept = tokio::spawn(listener.run(pool, accept_rx));

        let mut signal = shutdown.0.subscribe();
        let mut maintenance = tokio::time::interval(maintenance_interval);
        maintenance.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                signalled = async { signal.wait_for(|stop| *stop).await.is_ok() } => {
                    if !signalled {
                        tracing::warn!("shutdown handle dropped");
                    }
                    break;
                }
                _ = maintenance.tick() => maintain(&sessions, &registry),
            }
        }

        tracing::info!("hearth server shutting down");
        registry.shutdown();
        if tokio::time::timeout(shutdown_grace, registry.wait_empty())
            .await
            .is_err()
        {
            tracing::warn!(
                rooms = registry.room_count(),
                "rooms still running after shutdown grace"
            );
        }

        accept_stop.send_replace(true);
        match accept.await {
            Ok(result) => result?,
            Err(e) => tracing::error!(error = %e, "accept loop failed"),
        }
        tracing::info!(%local_addr, "hearth server stopped");
        Ok(())
    }
}

/// Periodic housekeeping: expire sessions past their reconnect grace and
/// stop empty rooms marked deletable.
fn maintain(sessions: &SessionManager, registry: &RoomRegistry) {
    let expired = sessions.expire_stale();
    if !expired.is_empty() {
        tracing::debug!(count = expired.len(), "stale sessions expired");
    }
    let swept = registry.sweep_deletable();
    if swept > 0 {
        tracing::debug!(count = swept, "deletable rooms stopped");
    }
}
