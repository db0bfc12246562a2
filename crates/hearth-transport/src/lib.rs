//! Network transport for Hearth.
//!
//! A [`TransportListener`] accepts TCP connections and hands them to a
//! [`ConnectionWorkerPool`]. Each worker pair (a reader task and a writer
//! task) multiplexes many sockets:
//!
//! - the first bytes pick the protocol: `GS` for raw framing, a TLS record
//!   for TLS, anything else for HTTP
//! - HTTP requests either upgrade to WebSocket or are answered by an
//!   [`HttpRouter`] and closed
//! - the first decoded message goes to the
//!   [`Authenticator`](hearth_session::Authenticator); later ones go to the
//!   player's rooms
//!
//! Outbound room payloads come back through the player's session and are
//! framed by the writer with the connection's protocol.

mod config;
mod connection;
mod error;
pub mod http;
mod listener;
mod pool;
mod tls;
mod worker;

pub use config::TransportConfig;
pub use connection::ConnectionId;
pub use error::TransportError;
pub use http::{HttpRequest, HttpResponse, HttpRouter, NotFoundRouter};
pub use listener::TransportListener;
pub use pool::{ConnectionWorkerPool, PoolSettings};
pub use tls::TlsSettings;
