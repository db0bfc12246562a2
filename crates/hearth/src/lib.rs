//! # Hearth
//!
//! Multiplayer game server framework.
//!
//! Clients connect over raw framed TCP or WebSocket (optionally through
//! TLS), authenticate with their first message, and are placed into rooms.
//! Each room runs its [`RoomLogic`](hearth_room::RoomLogic) on its own task
//! with a mailbox and an optional tick loop; a failing room is replaced
//! without taking the server down.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use hearth::prelude::*;
//!
//! // Implement RoomLogic and Authenticator, then:
//! // let server = HearthServer::builder()
//! //     .bind("0.0.0.0:8080")
//! //     .room("lobby", RoomConfig::default(), || Lobby)
//! //     .default_kind("lobby")
//! //     .build(MyAuth)
//! //     .await?;
//! // server.run().await
//! ```

mod error;
mod server;
mod status;

pub use error::HearthError;
pub use server::{HearthServer, HearthServerBuilder, ShutdownHandle};
pub use status::StatusRouter;

pub use hearth_protocol as protocol;
pub use hearth_room as room;
pub use hearth_session as session;
pub use hearth_tick as tick;
pub use hearth_transport as transport;

/// Installs a `tracing` subscriber printing to stderr.
///
/// The filter comes from `RUST_LOG`, defaulting to `info`. Calling it
/// twice is harmless; the second call does nothing.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .try_init();
}

pub mod prelude {
    pub use crate::{HearthError, HearthServer, HearthServerBuilder, ShutdownHandle, StatusRouter};
    pub use bytes::Bytes;
    pub use hearth_protocol::{PlayerId, RoomId, Uid};
    pub use hearth_room::{
        RoomConfig, RoomContext, RoomFault, RoomHandle, RoomInfo, RoomKind, RoomLogic,
        RoomRegistry, RoomState,
    };
    pub use hearth_session::{Authenticator, Identity, PlayerSession, SessionConfig, SessionError};
    pub use hearth_transport::{
        HttpRequest, HttpResponse, HttpRouter, TlsSettings, TransportConfig,
    };
    pub use std::sync::Arc;
}
