//! Error types for the session layer.

use hearth_protocol::PlayerId;

/// Errors that can occur while authenticating or tracking a session.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The [`Authenticator`](crate::Authenticator) rejected the credentials.
    /// The transport closes the connection without a reply.
    #[error("authentication failed: {0}")]
    AuthFailed(String),

    /// The authenticator returned an identity the server cannot key a
    /// session by (for example an empty uid).
    #[error("invalid identity: {0}")]
    InvalidIdentity(String),

    /// No session exists for the given player.
    #[error("session not found for player {0}")]
    NotFound(PlayerId),
}
