//! The player session: who a player is, which connection they're on, and
//! which rooms they belong to.
//!
//! A [`PlayerSession`] outlives its connections. When a client drops, the
//! session is unbound (its send and close callbacks are cleared) but stays in
//! its rooms; when the same uid comes back, a new [`ConnectionBinding`] is
//! attached and the rooms see a reconnect.

use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use bytes::Bytes;
use hearth_protocol::{PlayerId, RoomId, Uid};
use parking_lot::{Mutex, RwLock};
use tokio::time::Instant;

use crate::Identity;

// ---------------------------------------------------------------------------
// SessionConfig
// ---------------------------------------------------------------------------

/// Configuration for session behavior.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// How long an unbound session that belongs to no room is kept before
    /// [`SessionManager::expire_stale`](crate::SessionManager::expire_stale)
    /// drops it. Sessions still in a room are kept regardless.
    ///
    /// Default: 30 seconds.
    pub reconnect_grace: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            reconnect_grace: Duration::from_secs(30),
        }
    }
}

// ---------------------------------------------------------------------------
// ConnectionBinding
// ---------------------------------------------------------------------------

type SendFn = Arc<dyn Fn(Bytes) + Send + Sync>;
type CloseFn = Arc<dyn Fn() + Send + Sync>;

/// The link between a session and one live connection.
///
/// `id` identifies the connection, so a late teardown from an old connection
/// can be told apart from the current one (see [`PlayerSession::detach`]).
#[derive(Clone)]
pub struct ConnectionBinding {
    id: u64,
    send: SendFn,
    close: CloseFn,
}

impl ConnectionBinding {
    pub fn new(
        id: u64,
        send: impl Fn(Bytes) + Send + Sync + 'static,
        close: impl Fn() + Send + Sync + 'static,
    ) -> Self {
        Self {
            id,
            send: Arc::new(send),
            close: Arc::new(close),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }
}

impl fmt::Debug for ConnectionBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionBinding").field("id", &self.id).finish()
    }
}

// ---------------------------------------------------------------------------
// RoomDirectory
// ---------------------------------------------------------------------------

/// How a session reaches the rooms it belongs to.
///
/// Sessions only store room ids; the room layer implements this trait so a
/// disconnecting player can notify its rooms without the session crate
/// depending on room types.
pub trait RoomDirectory: Send + Sync {
    /// Removes the player from the room for good (disbanding disconnect).
    fn remove_player(&self, room: RoomId, player: &Arc<PlayerSession>);

    /// Tells the room the player's connection dropped. The player stays a
    /// member and may reconnect.
    fn player_disconnected(&self, room: RoomId, player: &Arc<PlayerSession>);
}

// ---------------------------------------------------------------------------
// PlayerSession
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct Membership {
    rooms: HashSet<RoomId>,
    active: Option<RoomId>,
}

/// A player known to the server.
pub struct PlayerSession {
    id: PlayerId,
    identity: Identity,
    connected: AtomicBool,
    binding: RwLock<Option<ConnectionBinding>>,
    membership: Mutex<Membership>,
    unbound_since: Mutex<Option<Instant>>,
    directory: Option<Weak<dyn RoomDirectory>>,
}

impl PlayerSession {
    /// Creates an unbound session. Call [`bind`](Self::bind) to attach a
    /// connection.
    pub fn new(
        id: PlayerId,
        identity: Identity,
        directory: Option<Weak<dyn RoomDirectory>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            id,
            identity,
            connected: AtomicBool::new(false),
            binding: RwLock::new(None),
            membership: Mutex::new(Membership::default()),
            unbound_since: Mutex::new(Some(Instant::now())),
            directory,
        })
    }

    pub fn id(&self) -> PlayerId {
        self.id
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn uid(&self) -> &Uid {
        &self.identity.uid
    }

    pub fn name(&self) -> &str {
        &self.identity.name
    }

    pub fn is_spectator(&self) -> bool {
        self.identity.spectator
    }

    pub fn is_bot(&self) -> bool {
        self.identity.bot
    }

    /// `true` while a connection is bound and not torn down.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire) && self.binding.read().is_some()
    }

    /// Id of the bound connection, if any.
    pub fn binding_id(&self) -> Option<u64> {
        self.binding.read().as_ref().map(ConnectionBinding::id)
    }

    /// Queues `bytes` on the bound connection. Silently dropped when the
    /// player is not connected.
    pub fn send(&self, bytes: impl Into<Bytes>) {
        let send = self.binding.read().as_ref().map(|b| Arc::clone(&b.send));
        if let Some(send) = send {
            send(bytes.into());
        }
    }

    /// Attaches a connection. Any previous binding is replaced without
    /// being closed; use [`disconnect`](Self::disconnect) first to kick it.
    pub fn bind(&self, binding: ConnectionBinding) {
        let binding_id = binding.id;
        let mut slot = self.binding.write();
        *slot = Some(binding);
        self.connected.store(true, Ordering::Release);
        drop(slot);
        *self.unbound_since.lock() = None;
        tracing::debug!(player_id = %self.id, binding_id, "connection bound");
    }

    /// Tears down the current connection.
    ///
    /// Idempotent: only the caller that flips the connected flag runs the
    /// teardown, so concurrent calls close the connection exactly once.
    /// With `disband` the player is removed from every room; otherwise each
    /// room is told the player disconnected and may wait for a reconnect.
    ///
    /// Returns `true` if this call performed the teardown.
    pub fn disconnect(self: &Arc<Self>, disband: bool) -> bool {
        self.teardown(None, disband)
    }

    /// Like [`disconnect`](Self::disconnect), but only if `binding_id` is
    /// still the bound connection. A connection that was replaced by a
    /// reconnect calls this on its way out and must not kick its successor.
    pub fn detach(self: &Arc<Self>, binding_id: u64, disband: bool) -> bool {
        self.teardown(Some(binding_id), disband)
    }

    fn teardown(self: &Arc<Self>, expected: Option<u64>, disband: bool) -> bool {
        let binding = {
            let mut slot = self.binding.write();
            if let Some(expected) = expected {
                if slot.as_ref().map(ConnectionBinding::id) != Some(expected) {
                    return false;
                }
            }
            if self
                .connected
                .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                return false;
            }
            slot.take()
        };

        *self.unbound_since.lock() = Some(Instant::now());
        if let Some(binding) = &binding {
            (binding.close)();
        }

        let rooms = self.rooms();
        tracing::info!(player_id = %self.id, disband, rooms = rooms.len(), "player disconnected");

        let directory = self.directory.as_ref().and_then(Weak::upgrade);
        for room in rooms {
            match (&directory, disband) {
                (Some(dir), true) => dir.remove_player(room, self),
                (Some(dir), false) => dir.player_disconnected(room, self),
                (None, true) => self.leave_room(room),
                (None, false) => {}
            }
        }
        true
    }

    // -- Membership ---------------------------------------------------------

    /// Rooms this player belongs to, in id order.
    pub fn rooms(&self) -> Vec<RoomId> {
        let mut rooms: Vec<_> = self.membership.lock().rooms.iter().copied().collect();
        rooms.sort_unstable();
        rooms
    }

    pub fn active_room(&self) -> Option<RoomId> {
        self.membership.lock().active
    }

    pub fn is_in_room(&self, room: RoomId) -> bool {
        self.membership.lock().rooms.contains(&room)
    }

    /// Records membership of `room` and makes it the active room.
    pub fn enter_room(&self, room: RoomId) {
        let mut m = self.membership.lock();
        m.rooms.insert(room);
        m.active = Some(room);
    }

    /// Drops membership of `room`, clearing the active room if it was this
    /// one.
    pub fn leave_room(&self, room: RoomId) {
        let mut m = self.membership.lock();
        m.rooms.remove(&room);
        if m.active == Some(room) {
            m.active = None;
        }
    }

    /// No rooms and no active room.
    pub fn is_homeless(&self) -> bool {
        let m = self.membership.lock();
        m.rooms.is_empty() && m.active.is_none()
    }

    /// How long the session has been without a connection.
    pub fn unbound_for(&self, now: Instant) -> Option<Duration> {
        self.unbound_since
            .lock()
            .map(|since| now.saturating_duration_since(since))
    }
}

impl fmt::Debug for PlayerSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlayerSession")
            .field("id", &self.id)
            .field("uid", &self.identity.uid)
            .field("connected", &self.is_connected())
            .finish()
    }
}
