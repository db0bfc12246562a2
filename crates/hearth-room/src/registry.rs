//! Room registry: creates rooms from registered kinds, finds them by id or
//! name, and keeps a default room alive.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use bytes::Bytes;
use hearth_protocol::RoomId;
use hearth_session::{PlayerSession, RoomDirectory};
use parking_lot::Mutex;
use tokio::runtime::Handle as RuntimeHandle;
use tokio::sync::Notify;

use crate::room::RoomActor;
use crate::{RoomConfig, RoomError, RoomHandle, RoomInfo, RoomLogic, RoomState};

type Factory = Arc<dyn Fn() -> Box<dyn RoomLogic> + Send + Sync>;

/// A named recipe for rooms: their configuration and how to build their
/// logic.
#[derive(Clone)]
pub struct RoomKind {
    config: RoomConfig,
    factory: Factory,
}

impl RoomKind {
    pub fn new<F, L>(config: RoomConfig, factory: F) -> Self
    where
        F: Fn() -> L + Send + Sync + 'static,
        L: RoomLogic,
    {
        Self {
            config: config.validated(),
            factory: Arc::new(move || Box::new(factory()) as Box<dyn RoomLogic>),
        }
    }

    pub fn config(&self) -> &RoomConfig {
        &self.config
    }
}

#[derive(Default)]
struct Inner {
    kinds: HashMap<String, RoomKind>,
    rooms: HashMap<RoomId, RoomHandle>,
    names: HashMap<String, RoomId>,
    default_room: Option<RoomId>,
    default_kind: Option<String>,
}

/// Directory of live rooms.
///
/// Built once at server start and shared by `Arc`. Rooms remove themselves
/// when their task ends; if the default room goes, a replacement is built
/// from the default kind and orphaned members are moved into it.
pub struct RoomRegistry {
    inner: Mutex<Inner>,
    next_id: AtomicU64,
    shutting_down: AtomicBool,
    changed: Notify,
    me: Weak<RoomRegistry>,
}

impl RoomRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            inner: Mutex::new(Inner::default()),
            next_id: AtomicU64::new(1),
            shutting_down: AtomicBool::new(false),
            changed: Notify::new(),
            me: me.clone(),
        })
    }

    /// A weak reference usable as the session layer's room directory.
    pub fn directory(&self) -> Weak<dyn RoomDirectory> {
        self.me.clone() as Weak<dyn RoomDirectory>
    }

    /// Registers (or replaces) a room kind.
    pub fn register_kind(&self, name: impl Into<String>, kind: RoomKind) {
        let name = name.into();
        tracing::debug!(kind = %name, "room kind registered");
        self.inner.lock().kinds.insert(name, kind);
    }

    /// Creates and starts a room of `kind`. Must be called from within a
    /// Tokio runtime.
    ///
    /// # Errors
    /// - [`RoomError::UnknownKind`] if `kind` was never registered
    /// - [`RoomError::NameTaken`] if a live room already has `name`
    /// - [`RoomError::ShuttingDown`] after [`shutdown`](Self::shutdown)
    pub fn create_room(&self, kind: &str, name: Option<&str>) -> Result<RoomHandle, RoomError> {
        if self.is_shutting_down() {
            return Err(RoomError::ShuttingDown);
        }
        let name = name.filter(|n| !n.is_empty()).map(str::to_owned);

        let (handle, actor) = {
            let mut inner = self.inner.lock();
            let room_kind = inner
                .kinds
                .get(kind)
                .cloned()
                .ok_or_else(|| RoomError::UnknownKind(kind.to_owned()))?;
            if let Some(name) = &name {
                if inner.names.contains_key(name) {
                    return Err(RoomError::NameTaken(name.clone()));
                }
            }

            let id = RoomId(self.next_id.fetch_add(1, Ordering::Relaxed));
            let (handle, mailbox) = RoomHandle::new(
                id,
                name.clone(),
                kind.to_owned(),
                room_kind.config.clone(),
                RuntimeHandle::current(),
            );
            let actor = RoomActor::new(handle.clone(), (room_kind.factory)(), mailbox);
            handle.set_state(RoomState::WaitingForFirstPlayer);

            inner.rooms.insert(id, handle.clone());
            if let Some(name) = name {
                inner.names.insert(name, id);
            }
            (handle, actor)
        };

        self.spawn(handle.clone(), actor);
        tracing::info!(room_id = %handle.id(), kind, name = ?handle.name(), "room created");
        self.changed.notify_waiters();
        Ok(handle)
    }

    /// Runs the room's task plus a supervisor that disposes the room when
    /// the task ends, whether it stopped, failed or panicked.
    fn spawn(&self, handle: RoomHandle, actor: RoomActor) {
        let task = tokio::spawn(actor.run());
        let registry = self.me.clone();
        tokio::spawn(async move {
            let room_id = handle.id();
            let faulted = match task.await {
                Ok(Ok(())) => false,
                Ok(Err(fault)) => {
                    tracing::error!(%room_id, error = %fault, "room callback failed");
                    true
                }
                Err(e) if e.is_panic() => {
                    tracing::error!(%room_id, "room task panicked");
                    true
                }
                Err(e) => {
                    tracing::warn!(%room_id, error = %e, "room task cancelled");
                    true
                }
            };
            match registry.upgrade() {
                Some(registry) => registry.dispose(&handle, faulted),
                None => {
                    handle.set_state(RoomState::Disposed);
                    for player in handle.drain_members() {
                        player.leave_room(room_id);
                    }
                }
            }
        });
    }

    /// Tears down a room whose task has ended.
    fn dispose(&self, room: &RoomHandle, faulted: bool) {
        let room_id = room.id();
        room.set_state(RoomState::Disposed);
        room.set_accepting(false);
        room.cancel_start_timer();

        let was_default = {
            let mut inner = self.inner.lock();
            inner.rooms.remove(&room_id);
            if let Some(name) = room.name() {
                if inner.names.get(name) == Some(&room_id) {
                    inner.names.remove(name);
                }
            }
            let was_default = inner.default_room == Some(room_id);
            if was_default {
                inner.default_room = None;
            }
            was_default
        };
        tracing::info!(%room_id, faulted, was_default, "room disposed");

        let shutting_down = self.is_shutting_down();
        if was_default && !shutting_down {
            match self.create_default_room() {
                Ok(replacement) => {
                    tracing::warn!(%room_id, replacement = %replacement.id(), "default room replaced");
                }
                Err(e) => tracing::error!(%room_id, error = %e, "failed to replace default room"),
            }
        }

        let fallback = if shutting_down { None } else { self.default_room() };
        for player in room.drain_members() {
            player.leave_room(room_id);
            if !player.is_homeless() {
                continue;
            }
            let placed = fallback.as_ref().is_some_and(|d| d.add_player(&player));
            if !placed {
                player.disconnect(true);
            }
        }

        self.changed.notify_waiters();
    }

    // -- Default room -------------------------------------------------------

    /// Makes `kind` the default kind and creates the default room from it.
    pub fn set_default_kind(&self, kind: &str) -> Result<RoomHandle, RoomError> {
        {
            let mut inner = self.inner.lock();
            if !inner.kinds.contains_key(kind) {
                return Err(RoomError::UnknownKind(kind.to_owned()));
            }
            inner.default_kind = Some(kind.to_owned());
        }
        self.create_default_room()
    }

    fn create_default_room(&self) -> Result<RoomHandle, RoomError> {
        let kind = self
            .inner
            .lock()
            .default_kind
            .clone()
            .ok_or(RoomError::NoDefaultKind)?;
        let room = self.create_room(&kind, None)?;
        self.inner.lock().default_room = Some(room.id());
        tracing::info!(room_id = %room.id(), kind, "default room set");
        Ok(room)
    }

    /// The room homeless players are sent to, if one is configured.
    pub fn default_room(&self) -> Option<RoomHandle> {
        let inner = self.inner.lock();
        inner.default_room.and_then(|id| inner.rooms.get(&id).cloned())
    }

    // -- Lookup -------------------------------------------------------------

    pub fn get(&self, id: RoomId) -> Option<RoomHandle> {
        self.inner.lock().rooms.get(&id).cloned()
    }

    pub fn get_by_name(&self, name: &str) -> Option<RoomHandle> {
        let inner = self.inner.lock();
        inner.names.get(name).and_then(|id| inner.rooms.get(id).cloned())
    }

    /// All live rooms, in id order.
    pub fn rooms(&self) -> Vec<RoomHandle> {
        let mut rooms: Vec<_> = self.inner.lock().rooms.values().cloned().collect();
        rooms.sort_by_key(RoomHandle::id);
        rooms
    }

    pub fn room_count(&self) -> usize {
        self.inner.lock().rooms.len()
    }

    /// Snapshots of all live rooms, in id order.
    pub fn infos(&self) -> Vec<RoomInfo> {
        self.rooms().iter().map(RoomHandle::info).collect()
    }

    // -- Player routing -----------------------------------------------------

    /// Places a freshly authenticated player.
    ///
    /// Rooms the player already belongs to take them back as a reconnect;
    /// rooms that are gone are dropped from their membership. A player left
    /// with no room goes to the default room. Returns `false` if the
    /// player ended up nowhere.
    pub fn route_player(&self, player: &Arc<PlayerSession>) -> bool {
        for room_id in player.rooms() {
            let readmitted = self.get(room_id).is_some_and(|room| room.add_player(player));
            if !readmitted {
                player.leave_room(room_id);
            }
        }
        if !player.is_homeless() {
            return true;
        }
        self.default_room().is_some_and(|room| room.add_player(player))
    }

    /// Queues `bytes` in every room the player belongs to.
    pub fn dispatch_message(&self, player: &Arc<PlayerSession>, bytes: Bytes) {
        for room_id in player.rooms() {
            if let Some(room) = self.get(room_id) {
                room.deliver(player, bytes.clone());
            }
        }
    }

    // -- Bulk operations ----------------------------------------------------

    /// Sends an operator command to every room.
    pub fn broadcast_command(&self, text: &str) {
        for room in self.rooms() {
            room.server_command(text);
        }
    }

    /// Stops every empty room marked deletable. Returns how many were told
    /// to stop.
    pub fn sweep_deletable(&self) -> usize {
        let mut stopped = 0;
        for room in self.rooms() {
            if room.is_deletable() && room.member_count() == 0 && !room.state().is_closed() {
                tracing::debug!(room_id = %room.id(), "sweeping deletable room");
                room.stop();
                stopped += 1;
            }
        }
        stopped
    }

    /// Stops accepting new rooms and asks every room to shut down. The
    /// default room is not replaced from here on.
    pub fn shutdown(&self) {
        if self.shutting_down.swap(true, Ordering::AcqRel) {
            return;
        }
        let rooms = self.rooms();
        tracing::info!(rooms = rooms.len(), "room registry shutting down");
        for room in rooms {
            room.request_shutdown();
        }
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Acquire)
    }

    /// Resolves once no rooms are left.
    pub async fn wait_empty(&self) {
        loop {
            let changed = self.changed.notified();
            if self.room_count() == 0 {
                return;
            }
            changed.await;
        }
    }
}

impl RoomDirectory for RoomRegistry {
    fn remove_player(&self, room: RoomId, player: &Arc<PlayerSession>) {
        match self.get(room) {
            Some(handle) => handle.remove_player(player),
            None => player.leave_room(room),
        }
    }

    fn player_disconnected(&self, room: RoomId, player: &Arc<PlayerSession>) {
        if let Some(handle) = self.get(room) {
            handle.enqueue(crate::RoomEvent::PlayerDisconnected {
                player: Arc::clone(player),
                disband: false,
            });
        }
    }
}
