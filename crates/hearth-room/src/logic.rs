//! The `RoomLogic` trait, the extension point for game code.
//!
//! A room kind is a factory producing `Box<dyn RoomLogic>`. Every callback
//! runs on the room's own task, one at a time, in mailbox order, so the
//! implementation can keep plain `&mut self` state without locks.

use std::sync::Arc;

use bytes::Bytes;
use hearth_protocol::{PlayerId, RoomId};
use hearth_session::PlayerSession;

use crate::{RoomHandle, RoomState};

/// Error returned by a room callback.
///
/// Any fault (or panic) ends the room: it is disposed, its members are
/// moved to the default room, and if it *was* the default room a
/// replacement is created.
pub type RoomFault = Box<dyn std::error::Error + Send + Sync>;

/// Callbacks a room implementation receives.
///
/// All methods have no-op defaults except [`on_message`](Self::on_message).
pub trait RoomLogic: Send + 'static {
    /// The room started: minimum players reached, start timer fired, or
    /// immediate start. Ticks begin after this returns.
    fn on_start(&mut self, _ctx: &RoomContext) -> Result<(), RoomFault> {
        Ok(())
    }

    /// One tick. `elapsed_secs` is the wall time since the previous tick.
    fn on_tick(&mut self, _ctx: &RoomContext, _elapsed_secs: f64) -> Result<(), RoomFault> {
        Ok(())
    }

    /// A player was admitted. `reconnect` is `true` when the player was
    /// already a member (a returning connection).
    fn on_player_connected(
        &mut self,
        _ctx: &RoomContext,
        _player: &Arc<PlayerSession>,
        _reconnect: bool,
    ) -> Result<(), RoomFault> {
        Ok(())
    }

    /// A member's connection dropped (`disband == false`, it may come
    /// back) or the member was removed from the room (`disband == true`).
    fn on_player_disconnected(
        &mut self,
        _ctx: &RoomContext,
        _player: &Arc<PlayerSession>,
        _disband: bool,
    ) -> Result<(), RoomFault> {
        Ok(())
    }

    /// A message from a member.
    fn on_message(
        &mut self,
        ctx: &RoomContext,
        player: &Arc<PlayerSession>,
        bytes: Bytes,
    ) -> Result<(), RoomFault>;

    /// An operator command broadcast through the registry.
    fn on_server_command(&mut self, _ctx: &RoomContext, _text: &str) -> Result<(), RoomFault> {
        Ok(())
    }

    /// The server is shutting down. The default stops the room at once;
    /// override to finish a round first, then call [`RoomContext::stop`].
    fn on_shutdown_request(&mut self, ctx: &RoomContext) -> Result<(), RoomFault> {
        ctx.stop();
        Ok(())
    }

    /// Last callback of an orderly stop.
    fn on_stop(&mut self, _ctx: &RoomContext) -> Result<(), RoomFault> {
        Ok(())
    }
}

/// What a callback can see and do about its own room.
pub struct RoomContext {
    handle: RoomHandle,
}

impl RoomContext {
    pub(crate) fn new(handle: RoomHandle) -> Self {
        Self { handle }
    }

    pub fn id(&self) -> RoomId {
        self.handle.id()
    }

    pub fn name(&self) -> Option<&str> {
        self.handle.name()
    }

    pub fn state(&self) -> RoomState {
        self.handle.state()
    }

    /// A handle to this room, for work that outlives the callback.
    pub fn handle(&self) -> &RoomHandle {
        &self.handle
    }

    /// Current members, spectators included.
    pub fn members(&self) -> Vec<Arc<PlayerSession>> {
        self.handle.members()
    }

    /// Sends `bytes` to every connected member.
    pub fn broadcast(&self, bytes: impl Into<Bytes>) {
        let bytes = bytes.into();
        for member in self.handle.members() {
            member.send(bytes.clone());
        }
    }

    /// Sends `bytes` to every connected member except `skip`.
    pub fn broadcast_except(&self, skip: PlayerId, bytes: impl Into<Bytes>) {
        let bytes = bytes.into();
        for member in self.handle.members() {
            if member.id() != skip {
                member.send(bytes.clone());
            }
        }
    }

    /// Stops the room after the events already queued ahead of the stop.
    pub fn stop(&self) {
        self.handle.stop();
    }

    pub fn set_status(&self, status: impl Into<String>) {
        self.handle.set_status(status);
    }

    pub fn set_accepting(&self, accepting: bool) {
        self.handle.set_accepting(accepting);
    }

    pub fn mark_deletable(&self) {
        self.handle.mark_deletable();
    }
}
