//! Error types for the room layer.

/// Errors returned by registry operations.
///
/// Failures *inside* a running room are not `RoomError`s: a callback
/// returning a [`RoomFault`](crate::RoomFault) ends that room and is
/// logged by its supervisor.
#[derive(Debug, thiserror::Error)]
pub enum RoomError {
    /// No room kind is registered under this name.
    #[error("unknown room kind {0:?}")]
    UnknownKind(String),

    /// Another live room already uses this name.
    #[error("room name {0:?} is already taken")]
    NameTaken(String),

    /// No default kind was set with `set_default_kind`.
    #[error("no default room kind configured")]
    NoDefaultKind,

    /// The registry is shutting down and creates no new rooms.
    #[error("room registry is shutting down")]
    ShuttingDown,
}
