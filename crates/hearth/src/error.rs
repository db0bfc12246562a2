//! The error type returned by [`HearthServer`](crate::HearthServer).

use hearth_room::RoomError;
use hearth_session::SessionError;
use hearth_transport::TransportError;

/// Any failure surfaced while building or running a server.
///
/// Framing violations never reach this type: the transport drops the
/// offending connection and logs the cause.
#[derive(Debug, thiserror::Error)]
pub enum HearthError {
    /// Binding, TLS material, or the worker pool.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Identity and session bookkeeping.
    #[error(transparent)]
    Session(#[from] SessionError),

    /// Room kinds and the default room.
    #[error(transparent)]
    Room(#[from] RoomError),
}

#[cfg(test)]
mod tests {
    use hearth_protocol::PlayerId;
    use hearth_room::RoomRegistry;
    use hearth_session::{ConnectionBinding, Identity, SessionConfig, SessionManager};
    use hearth_transport::TlsSettings;

    use super::*;

    #[test]
    fn test_missing_certificate_is_a_transport_error() {
        let err: HearthError =
            TlsSettings::from_pem_files("/nonexistent/cert.pem", "/nonexistent/key.pem")
                .map(|_| ())
                .unwrap_err()
                .into();
        assert!(matches!(err, HearthError::Transport(TransportError::Io(_))));
    }

    #[test]
    fn test_unknown_default_kind_is_a_room_error() {
        let registry = RoomRegistry::new();
        let err: HearthError = registry.set_default_kind("arena").map(|_| ()).unwrap_err().into();
        assert!(matches!(err, HearthError::Room(RoomError::UnknownKind(_))));
        assert!(err.to_string().contains("arena"));
    }

    #[test]
    fn test_session_errors_pass_through() {
        let sessions = SessionManager::new(SessionConfig::default());
        let err: HearthError = sessions.remove(PlayerId(7)).map(|_| ()).unwrap_err().into();
        assert!(matches!(err, HearthError::Session(SessionError::NotFound(PlayerId(7)))));

        let empty = sessions
            .attach(Identity::new(""), ConnectionBinding::new(1, |_| {}, || {}))
            .map(|_| ())
            .unwrap_err();
        let err: HearthError = empty.into();
        assert!(err.to_string().contains("empty uid"));
    }
}
