//! Rooms for Hearth.
//!
//! Each room runs as its own Tokio task (actor model) with a mailbox, an
//! optional tick loop and a start-gating protocol. A [`RoomRegistry`] builds
//! rooms from registered kinds and keeps a default room alive.
//!
//! # Key types
//!
//! - [`RoomLogic`]: the trait game code implements
//! - [`RoomRegistry`]: creates rooms, finds them, fails over the default room
//! - [`RoomHandle`]: thread-safe access to one room
//! - [`RoomState`]: lifecycle state machine
//! - [`RoomConfig`]: admission limits, tick interval, start gating

mod config;
mod error;
mod logic;
mod registry;
mod room;

pub use config::{RoomConfig, RoomState};
pub use error::RoomError;
pub use logic::{RoomContext, RoomFault, RoomLogic};
pub use registry::{RoomKind, RoomRegistry};
pub use room::{LifecycleFn, RoomEvent, RoomHandle, RoomInfo};
