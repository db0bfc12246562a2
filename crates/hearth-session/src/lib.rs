//! Player sessions for Hearth.
//!
//! This crate owns the player side of the server:
//!
//! 1. **Authentication**: turning a client's first message into an
//!    [`Identity`] ([`Authenticator`] trait)
//! 2. **Sessions**: the [`PlayerSession`] object rooms hold for each member,
//!    with its connection binding and room membership
//! 3. **Reconnection**: [`SessionManager`] maps a uid back to its existing
//!    session so a returning client keeps its `PlayerId` and rooms
//!
//! # How it fits in the stack
//!
//! ```text
//! Room Layer (above)  ← implements RoomDirectory, holds Arc<PlayerSession>
//!     ↕
//! Session Layer (this crate)  ← identity, connection binding, membership
//!     ↕
//! Protocol Layer (below)  ← PlayerId, RoomId, Uid
//! ```

#![allow(async_fn_in_trait)]

mod auth;
mod error;
mod manager;
mod session;

pub use auth::{Authenticator, Identity};
pub use error::SessionError;
pub use manager::SessionManager;
pub use session::{ConnectionBinding, PlayerSession, RoomDirectory, SessionConfig};
