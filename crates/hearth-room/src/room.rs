//! Room actor: one Tokio task per room, fed by an unbounded mailbox.
//!
//! Everything that touches the room's [`RoomLogic`] happens on that task.
//! Other threads talk to the room through a [`RoomHandle`]: admission and
//! membership are decided synchronously under the handle's lock, and the
//! matching callback is enqueued so it still runs on the room's task.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use bytes::Bytes;
use hearth_protocol::{RoomId, Uid};
use hearth_session::PlayerSession;
use hearth_tick::TickScheduler;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::runtime::Handle as RuntimeHandle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::{RoomConfig, RoomContext, RoomFault, RoomLogic, RoomState};

/// Events within this distance of the tick deadline wait until after the
/// tick.
const TICK_GUARD: Duration = Duration::from_millis(2);

// ---------------------------------------------------------------------------
// Mailbox events
// ---------------------------------------------------------------------------

/// Code to run on the room's task.
pub type LifecycleFn =
    Box<dyn FnOnce(&mut dyn RoomLogic, &RoomContext) -> Result<(), RoomFault> + Send>;

/// An entry in a room's mailbox. Consumed strictly in enqueue order.
pub enum RoomEvent {
    /// A decoded message from a member's connection.
    PlayerMessage {
        player: Arc<PlayerSession>,
        bytes: Bytes,
    },
    /// A member's connection dropped (`disband == false`) or the member was
    /// removed (`disband == true`).
    PlayerDisconnected {
        player: Arc<PlayerSession>,
        disband: bool,
    },
    /// Arbitrary code, e.g. the `on_player_connected` call queued by
    /// [`RoomHandle::add_player`].
    Lifecycle(LifecycleFn),
    /// Start the room. Ignored once started.
    RoomStart,
    /// Leave the loop, call `on_stop`, dispose.
    RoomStop,
    /// Call `on_shutdown_request`.
    ShutdownRequest,
    /// Call `on_server_command`.
    ServerCommand { text: String },
}

impl fmt::Debug for RoomEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PlayerMessage { player, bytes } => f
                .debug_struct("PlayerMessage")
                .field("player", &player.id())
                .field("len", &bytes.len())
                .finish(),
            Self::PlayerDisconnected { player, disband } => f
                .debug_struct("PlayerDisconnected")
                .field("player", &player.id())
                .field("disband", disband)
                .finish(),
            Self::Lifecycle(_) => f.write_str("Lifecycle"),
            Self::RoomStart => f.write_str("RoomStart"),
            Self::RoomStop => f.write_str("RoomStop"),
            Self::ShutdownRequest => f.write_str("ShutdownRequest"),
            Self::ServerCommand { text } => {
                f.debug_struct("ServerCommand").field("text", text).finish()
            }
        }
    }
}

// ---------------------------------------------------------------------------
// RoomInfo
// ---------------------------------------------------------------------------

/// A snapshot of room metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoomInfo {
    pub id: RoomId,
    pub name: Option<String>,
    pub kind: String,
    pub state: RoomState,
    /// Non-spectator members.
    pub players: usize,
    pub spectators: usize,
    pub max_players: usize,
    pub status: String,
    pub started: bool,
}

// ---------------------------------------------------------------------------
// RoomHandle
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Members {
    players: HashMap<Uid, Arc<PlayerSession>>,
    banned: HashSet<Uid>,
}

impl Members {
    fn non_spectators(&self) -> usize {
        self.players.values().filter(|p| !p.is_spectator()).count()
    }
}

struct RoomShared {
    id: RoomId,
    name: Option<String>,
    kind: String,
    config: RoomConfig,
    members: Mutex<Members>,
    state: Mutex<RoomState>,
    status: Mutex<String>,
    started: AtomicBool,
    first_player_seen: AtomicBool,
    accepting: AtomicBool,
    deletable: AtomicBool,
    mailbox: mpsc::UnboundedSender<RoomEvent>,
    start_timer: Mutex<Option<JoinHandle<()>>>,
    runtime: RuntimeHandle,
}

/// Cheap, cloneable handle to a room. All methods are callable from any
/// thread.
#[derive(Clone)]
pub struct RoomHandle {
    shared: Arc<RoomShared>,
}

impl RoomHandle {
    pub(crate) fn new(
        id: RoomId,
        name: Option<String>,
        kind: String,
        config: RoomConfig,
        runtime: RuntimeHandle,
    ) -> (Self, mpsc::UnboundedReceiver<RoomEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let status = config.status.clone();
        let shared = RoomShared {
            id,
            name,
            kind,
            config,
            members: Mutex::new(Members::default()),
            state: Mutex::new(RoomState::Created),
            status: Mutex::new(status),
            started: AtomicBool::new(false),
            first_player_seen: AtomicBool::new(false),
            accepting: AtomicBool::new(true),
            deletable: AtomicBool::new(false),
            mailbox: tx,
            start_timer: Mutex::new(None),
            runtime,
        };
        (
            Self {
                shared: Arc::new(shared),
            },
            rx,
        )
    }

    pub fn id(&self) -> RoomId {
        self.shared.id
    }

    pub fn name(&self) -> Option<&str> {
        self.shared.name.as_deref()
    }

    pub fn kind(&self) -> &str {
        &self.shared.kind
    }

    pub fn config(&self) -> &RoomConfig {
        &self.shared.config
    }

    pub fn state(&self) -> RoomState {
        *self.shared.state.lock()
    }

    pub(crate) fn set_state(&self, state: RoomState) {
        let mut current = self.shared.state.lock();
        if *current != state {
            tracing::debug!(room_id = %self.shared.id, from = %*current, to = %state, "room state");
            *current = state;
        }
    }

    pub fn is_started(&self) -> bool {
        self.shared.started.load(Ordering::Acquire)
    }

    pub fn is_accepting(&self) -> bool {
        self.shared.accepting.load(Ordering::Acquire)
    }

    pub fn is_deletable(&self) -> bool {
        self.shared.deletable.load(Ordering::Acquire)
    }

    pub fn status(&self) -> String {
        self.shared.status.lock().clone()
    }

    /// Whether two handles refer to the same room.
    pub fn same_room(&self, other: &RoomHandle) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    // -- Membership ---------------------------------------------------------

    /// Admits `player`, returning `false` if the room refuses them.
    ///
    /// A player whose uid is already a member is *reconnecting*: they skip
    /// the capacity checks and replace the stored session. The
    /// `on_player_connected` callback is queued, never called inline.
    pub fn add_player(&self, player: &Arc<PlayerSession>) -> bool {
        let cfg = &self.shared.config;
        let uid = player.uid();
        let spectator = player.is_spectator();

        let (reconnect, reached_min) = {
            let mut members = self.shared.members.lock();

            if self.state().is_closed() {
                return false;
            }
            if members.banned.contains(uid) {
                tracing::debug!(room_id = %self.shared.id, player_id = %player.id(), "banned player refused");
                return false;
            }
            if spectator && !cfg.allow_spectators {
                return false;
            }
            if !spectator && !cfg.allow_players {
                return false;
            }

            let reconnect = members.players.contains_key(uid);
            if !reconnect {
                if !self.is_accepting() {
                    return false;
                }
                if !spectator && members.non_spectators() >= cfg.max_players {
                    tracing::debug!(room_id = %self.shared.id, player_id = %player.id(), "room full");
                    return false;
                }
                if cfg.max_raw_clients > 0 && members.players.len() >= cfg.max_raw_clients {
                    tracing::debug!(room_id = %self.shared.id, player_id = %player.id(), "client limit reached");
                    return false;
                }
            }

            members.players.insert(uid.clone(), Arc::clone(player));
            let reached_min = !self.is_started()
                && !spectator
                && members.non_spectators() >= cfg.min_players;
            (reconnect, reached_min)
        };

        player.enter_room(self.shared.id);
        tracing::info!(
            room_id = %self.shared.id,
            player_id = %player.id(),
            reconnect,
            "player added"
        );

        let joined = Arc::clone(player);
        self.enqueue(RoomEvent::Lifecycle(Box::new(move |logic, ctx| {
            logic.on_player_connected(ctx, &joined, reconnect)
        })));

        if !self.shared.first_player_seen.swap(true, Ordering::AcqRel) {
            self.bootstrap_start();
        }
        if reached_min {
            self.enqueue(RoomEvent::RoomStart);
        }
        true
    }

    /// First accepted player: arm the start timer or start right away.
    fn bootstrap_start(&self) {
        let cfg = &self.shared.config;
        if cfg.wait_for_min_players && !cfg.wait_time.is_zero() {
            {
                let mut state = self.shared.state.lock();
                if *state == RoomState::WaitingForFirstPlayer {
                    *state = RoomState::WaitingOnStartTimer;
                }
            }
            let mailbox = self.shared.mailbox.clone();
            let wait = cfg.wait_time;
            let room_id = self.shared.id;
            let timer = self.shared.runtime.spawn(async move {
                tokio::time::sleep(wait).await;
                tracing::debug!(%room_id, "start timer fired");
                let _ = mailbox.send(RoomEvent::RoomStart);
            });
            if let Some(previous) = self.shared.start_timer.lock().replace(timer) {
                previous.abort();
            }
        } else if !cfg.wait_for_min_players && cfg.wait_time.is_zero() {
            self.enqueue(RoomEvent::RoomStart);
        }
    }

    pub(crate) fn cancel_start_timer(&self) {
        if let Some(timer) = self.shared.start_timer.lock().take() {
            timer.abort();
        }
    }

    /// Removes `player` from the room for good and queues a disbanding
    /// `on_player_disconnected`.
    pub fn remove_player(&self, player: &Arc<PlayerSession>) {
        let removed = self.shared.members.lock().players.remove(player.uid());
        player.leave_room(self.shared.id);
        if removed.is_some() {
            tracing::info!(room_id = %self.shared.id, player_id = %player.id(), "player removed");
            self.enqueue(RoomEvent::PlayerDisconnected {
                player: Arc::clone(player),
                disband: true,
            });
        }
    }

    /// Bans `uid` and removes the member holding it, if any.
    pub fn ban(&self, uid: Uid) {
        let member = {
            let mut members = self.shared.members.lock();
            let member = members.players.get(&uid).cloned();
            members.banned.insert(uid);
            member
        };
        if let Some(member) = member {
            self.remove_player(&member);
        }
    }

    pub fn is_banned(&self, uid: &Uid) -> bool {
        self.shared.members.lock().banned.contains(uid)
    }

    pub fn is_member(&self, uid: &Uid) -> bool {
        self.shared.members.lock().players.contains_key(uid)
    }

    /// Current members, spectators included, in player-id order.
    pub fn members(&self) -> Vec<Arc<PlayerSession>> {
        let mut members: Vec<_> = self.shared.members.lock().players.values().cloned().collect();
        members.sort_by_key(|p| p.id());
        members
    }

    /// Members of any kind.
    pub fn member_count(&self) -> usize {
        self.shared.members.lock().players.len()
    }

    /// Non-spectator members.
    pub fn player_count(&self) -> usize {
        self.shared.members.lock().non_spectators()
    }

    /// Takes every member out of the room without queuing callbacks.
    pub(crate) fn drain_members(&self) -> Vec<Arc<PlayerSession>> {
        let mut members: Vec<_> = self
            .shared
            .members
            .lock()
            .players
            .drain()
            .map(|(_, p)| p)
            .collect();
        members.sort_by_key(|p| p.id());
        members
    }

    // -- Mailbox ------------------------------------------------------------

    /// Puts an event in the mailbox. Returns `false` if the room's task has
    /// already exited.
    pub fn enqueue(&self, event: RoomEvent) -> bool {
        self.shared.mailbox.send(event).is_ok()
    }

    /// Runs `f` on the room's task.
    pub fn post<F>(&self, f: F) -> bool
    where
        F: FnOnce(&mut dyn RoomLogic, &RoomContext) -> Result<(), RoomFault> + Send + 'static,
    {
        self.enqueue(RoomEvent::Lifecycle(Box::new(f)))
    }

    /// Queues a member's message for `on_message`.
    pub fn deliver(&self, player: &Arc<PlayerSession>, bytes: Bytes) -> bool {
        self.enqueue(RoomEvent::PlayerMessage {
            player: Arc::clone(player),
            bytes,
        })
    }

    pub fn stop(&self) -> bool {
        self.enqueue(RoomEvent::RoomStop)
    }

    pub fn request_shutdown(&self) -> bool {
        self.enqueue(RoomEvent::ShutdownRequest)
    }

    pub fn server_command(&self, text: impl Into<String>) -> bool {
        self.enqueue(RoomEvent::ServerCommand { text: text.into() })
    }

    // -- Flags --------------------------------------------------------------

    /// Closes (or reopens) the room to new members. Existing members can
    /// still reconnect.
    pub fn set_accepting(&self, accepting: bool) {
        self.shared.accepting.store(accepting, Ordering::Release);
    }

    pub fn set_status(&self, status: impl Into<String>) {
        *self.shared.status.lock() = status.into();
    }

    /// Lets [`RoomRegistry::sweep_deletable`](crate::RoomRegistry::sweep_deletable)
    /// stop the room once it is empty.
    pub fn mark_deletable(&self) {
        self.shared.deletable.store(true, Ordering::Release);
    }

    /// Snapshot for status pages and logs.
    pub fn info(&self) -> RoomInfo {
        let (players, total) = {
            let members = self.shared.members.lock();
            (members.non_spectators(), members.players.len())
        };
        RoomInfo {
            id: self.shared.id,
            name: self.shared.name.clone(),
            kind: self.shared.kind.clone(),
            state: self.state(),
            players,
            spectators: total - players,
            max_players: self.shared.config.max_players,
            status: self.status(),
            started: self.is_started(),
        }
    }
}

impl fmt::Debug for RoomHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RoomHandle")
            .field("id", &self.shared.id)
            .field("name", &self.shared.name)
            .field("kind", &self.shared.kind)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Actor
// ---------------------------------------------------------------------------

enum Step {
    Tick,
    Event(Option<RoomEvent>),
}

enum Flow {
    Continue,
    Stop,
}

/// The room's task state.
pub(crate) struct RoomActor {
    handle: RoomHandle,
    logic: Box<dyn RoomLogic>,
    mailbox: mpsc::UnboundedReceiver<RoomEvent>,
    scheduler: TickScheduler,
}

impl RoomActor {
    pub(crate) fn new(
        handle: RoomHandle,
        logic: Box<dyn RoomLogic>,
        mailbox: mpsc::UnboundedReceiver<RoomEvent>,
    ) -> Self {
        let mut scheduler = TickScheduler::new(handle.config().tick_config());
        // Ticks start with the room.
        scheduler.pause();
        Self {
            handle,
            logic,
            mailbox,
            scheduler,
        }
    }

    /// Runs until the room stops or a callback fails.
    pub(crate) async fn run(mut self) -> Result<(), RoomFault> {
        let ctx = RoomContext::new(self.handle.clone());
        let room_id = self.handle.id();
        tracing::info!(%room_id, kind = self.handle.kind(), "room actor started");

        loop {
            // Drain what is already queued, unless the tick is about due.
            let mut stop = false;
            while !self.scheduler.due_within(TICK_GUARD) {
                match self.mailbox.try_recv() {
                    Ok(event) => {
                        if let Flow::Stop = self.handle_event(&ctx, event)? {
                            stop = true;
                            break;
                        }
                    }
                    Err(_) => break,
                }
            }
            if stop {
                break;
            }

            let step = tokio::select! {
                biased;
                _ = self.scheduler.wait_until_due() => Step::Tick,
                event = self.mailbox.recv() => Step::Event(event),
            };

            match step {
                Step::Tick => {
                    if let Some(info) = self.scheduler.fire() {
                        self.logic.on_tick(&ctx, info.elapsed_secs())?;
                        self.scheduler.record_tick_end();
                    }
                }
                Step::Event(Some(event)) => {
                    if let Flow::Stop = self.handle_event(&ctx, event)? {
                        break;
                    }
                }
                Step::Event(None) => break,
            }
        }

        self.handle.set_state(RoomState::Stopping);
        self.handle.cancel_start_timer();
        self.logic.on_stop(&ctx)?;
        tracing::info!(%room_id, ticks = self.scheduler.tick_count(), "room actor stopped");
        Ok(())
    }

    fn handle_event(&mut self, ctx: &RoomContext, event: RoomEvent) -> Result<Flow, RoomFault> {
        match event {
            RoomEvent::PlayerMessage { player, bytes } => {
                if self.handle.is_member(player.uid()) {
                    self.logic.on_message(ctx, &player, bytes)?;
                } else {
                    tracing::debug!(
                        room_id = %self.handle.id(),
                        player_id = %player.id(),
                        "message from non-member dropped"
                    );
                }
            }
            RoomEvent::PlayerDisconnected { player, disband } => {
                self.logic.on_player_disconnected(ctx, &player, disband)?;
            }
            RoomEvent::Lifecycle(f) => f(self.logic.as_mut(), ctx)?,
            RoomEvent::RoomStart => self.start(ctx)?,
            RoomEvent::RoomStop => return Ok(Flow::Stop),
            RoomEvent::ShutdownRequest => self.logic.on_shutdown_request(ctx)?,
            RoomEvent::ServerCommand { text } => self.logic.on_server_command(ctx, &text)?,
        }
        Ok(Flow::Continue)
    }

    fn start(&mut self, ctx: &RoomContext) -> Result<(), RoomFault> {
        if self.handle.is_started() || !self.handle.state().is_waiting() {
            return Ok(());
        }
        self.handle.shared.started.store(true, Ordering::Release);
        self.handle.cancel_start_timer();
        self.handle.set_state(RoomState::Running);
        tracing::info!(
            room_id = %self.handle.id(),
            players = self.handle.player_count(),
            "room started"
        );
        self.logic.on_start(ctx)?;
        self.scheduler.resume();
        Ok(())
    }
}
