//! Authentication hook for validating player identity.
//!
//! Hearth doesn't implement authentication itself. The first message a
//! client sends after the transport handshake is handed to your
//! [`Authenticator`], which decides who the client is. Until it answers,
//! later messages from the same connection are held back in order.

use hearth_protocol::Uid;

use crate::SessionError;

/// Who a client is, as decided by the [`Authenticator`].
///
/// `uid` is the durable key: two connections presenting the same uid are
/// the same player, and the second one takes over the first one's session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    /// Display name shown to other players.
    pub name: String,
    /// Account name.
    pub username: String,
    /// Stable identity key, survives reconnects.
    pub uid: Uid,
    /// Spectators don't count towards `max_players`/`min_players`.
    pub spectator: bool,
    /// Server-side bot rather than a human client.
    pub bot: bool,
}

impl Identity {
    /// A regular player whose name and username are both the uid.
    pub fn new(uid: impl Into<Uid>) -> Self {
        let uid = uid.into();
        Self {
            name: uid.to_string(),
            username: uid.to_string(),
            uid,
            spectator: false,
            bot: false,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = username.into();
        self
    }

    pub fn spectator(mut self) -> Self {
        self.spectator = true;
        self
    }

    pub fn bot(mut self) -> Self {
        self.bot = true;
        self
    }
}

/// Validates a client's first message and returns their identity.
///
/// The call runs on its own task, so a slow auth backend never stalls the
/// connection workers.
///
/// # Example
///
/// ```rust
/// use hearth_session::{Authenticator, Identity, SessionError};
///
/// /// Treats the payload as the uid. Development only.
/// struct DevAuthenticator;
///
/// impl Authenticator for DevAuthenticator {
///     async fn authenticate(&self, payload: &[u8]) -> Result<Identity, SessionError> {
///         let uid = std::str::from_utf8(payload)
///             .map_err(|_| SessionError::AuthFailed("uid must be UTF-8".into()))?;
///         Ok(Identity::new(uid.trim()))
///     }
/// }
/// ```
pub trait Authenticator: Send + Sync + 'static {
    /// Validates the payload of the first message on a connection.
    ///
    /// - `Ok(Identity)`: the connection is bound to that player
    /// - `Err(_)`: the connection is closed
    fn authenticate(
        &self,
        payload: &[u8],
    ) -> impl std::future::Future<Output = Result<Identity, SessionError>> + Send;
}
