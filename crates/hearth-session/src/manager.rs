//! The session manager: maps uids to their sessions.
//!
//! Connection workers call [`SessionManager::attach`] from many threads at
//! once, so the maps live behind a `parking_lot` mutex. The lock is never
//! held while a session is torn down; teardown calls into the room layer.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use hearth_protocol::{PlayerId, Uid};
use parking_lot::Mutex;
use tokio::time::Instant;

use crate::{ConnectionBinding, Identity, PlayerSession, RoomDirectory, SessionConfig, SessionError};

/// Tracks every player session the server knows about.
///
/// ```text
/// authenticate ──→ attach ──→ [bound] ──disconnect──→ [unbound]
///                    ↑                                    │
///                    └──────── attach (same uid) ─────────┤
///                                                         ▼
///                                     expire_stale (no rooms, grace elapsed)
/// ```
pub struct SessionManager {
    inner: Mutex<Inner>,
    next_id: AtomicU64,
    directory: Option<Weak<dyn RoomDirectory>>,
    config: SessionConfig,
}

#[derive(Default)]
struct Inner {
    by_uid: HashMap<Uid, Arc<PlayerSession>>,
    by_id: HashMap<PlayerId, Uid>,
}

impl SessionManager {
    /// Creates an empty manager whose sessions are not wired to any rooms.
    pub fn new(config: SessionConfig) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            next_id: AtomicU64::new(1),
            directory: None,
            config,
        }
    }

    /// Wires sessions created from now on to `directory`, so disconnects
    /// reach their rooms.
    pub fn with_directory(mut self, directory: Weak<dyn RoomDirectory>) -> Self {
        self.directory = Some(directory);
        self
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Binds `binding` to the session for `identity.uid`.
    ///
    /// A known uid gets its existing session back: the old connection, if
    /// still bound, is kicked with a non-disbanding disconnect, and the
    /// `PlayerId` and room memberships carry over. An unknown uid gets a
    /// fresh session with a new `PlayerId`.
    ///
    /// Returns the session and whether it already existed.
    ///
    /// # Errors
    /// [`SessionError::InvalidIdentity`] if the uid is empty.
    pub fn attach(
        &self,
        identity: Identity,
        binding: ConnectionBinding,
    ) -> Result<(Arc<PlayerSession>, bool), SessionError> {
        if identity.uid.as_str().is_empty() {
            return Err(SessionError::InvalidIdentity("empty uid".into()));
        }

        let (session, existed) = {
            let mut inner = self.inner.lock();
            match inner.by_uid.get(&identity.uid) {
                Some(existing) => (Arc::clone(existing), true),
                None => {
                    let id = PlayerId(self.next_id.fetch_add(1, Ordering::Relaxed));
                    let uid = identity.uid.clone();
                    let session = PlayerSession::new(id, identity, self.directory.clone());
                    inner.by_uid.insert(uid.clone(), Arc::clone(&session));
                    inner.by_id.insert(id, uid);
                    (session, false)
                }
            }
        };

        if existed {
            if session.disconnect(false) {
                tracing::info!(player_id = %session.id(), "previous connection replaced");
            }
            tracing::info!(player_id = %session.id(), uid = %session.uid(), "session resumed");
        } else {
            tracing::info!(player_id = %session.id(), uid = %session.uid(), "session created");
        }
        session.bind(binding);
        Ok((session, existed))
    }

    /// Looks up a session by player id.
    pub fn get(&self, id: PlayerId) -> Option<Arc<PlayerSession>> {
        let inner = self.inner.lock();
        let uid = inner.by_id.get(&id)?;
        inner.by_uid.get(uid).cloned()
    }

    /// Looks up a session by uid.
    pub fn get_by_uid(&self, uid: &Uid) -> Option<Arc<PlayerSession>> {
        self.inner.lock().by_uid.get(uid).cloned()
    }

    /// Forgets a session. The player is not disconnected.
    ///
    /// # Errors
    /// [`SessionError::NotFound`] if no session has this id.
    pub fn remove(&self, id: PlayerId) -> Result<Arc<PlayerSession>, SessionError> {
        let mut inner = self.inner.lock();
        let uid = inner.by_id.remove(&id).ok_or(SessionError::NotFound(id))?;
        inner.by_uid.remove(&uid).ok_or(SessionError::NotFound(id))
    }

    /// Drops sessions that have been unbound longer than the reconnect grace
    /// and no longer belong to any room. Returns the dropped ids.
    pub fn expire_stale(&self) -> Vec<PlayerId> {
        let now = Instant::now();
        let grace = self.config.reconnect_grace;
        let mut inner = self.inner.lock();

        let stale: Vec<(PlayerId, Uid)> = inner
            .by_uid
            .values()
            .filter(|s| {
                !s.is_connected()
                    && s.is_homeless()
                    && s.unbound_for(now).is_some_and(|d| d > grace)
            })
            .map(|s| (s.id(), s.uid().clone()))
            .collect();

        for (id, uid) in &stale {
            inner.by_uid.remove(uid);
            inner.by_id.remove(id);
            tracing::debug!(player_id = %id, "session expired");
        }
        stale.into_iter().map(|(id, _)| id).collect()
    }

    /// Number of sessions, bound or not.
    pub fn len(&self) -> usize {
        self.inner.lock().by_uid.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().by_uid.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use hearth_protocol::RoomId;

    use super::*;

    fn binding(id: u64, closes: Arc<AtomicUsize>) -> ConnectionBinding {
        ConnectionBinding::new(id, |_| {}, move || {
            closes.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[tokio::test]
    async fn test_attach_creates_session_with_fresh_id() {
        let mgr = SessionManager::new(SessionConfig::default());
        let (a, existed_a) = mgr.attach(Identity::new("a"), binding(1, Arc::default())).unwrap();
        let (b, existed_b) = mgr.attach(Identity::new("b"), binding(2, Arc::default())).unwrap();

        assert!(!existed_a && !existed_b);
        assert_ne!(a.id(), b.id());
        assert_eq!(mgr.len(), 2);
        assert!(a.is_connected());
    }

    #[tokio::test]
    async fn test_attach_same_uid_reuses_session_and_kicks_old_connection() {
        let mgr = SessionManager::new(SessionConfig::default());
        let old_closes = Arc::new(AtomicUsize::new(0));

        let (first, _) = mgr.attach(Identity::new("a"), binding(1, old_closes.clone())).unwrap();
        first.enter_room(RoomId(4));
        let (second, existed) = mgr.attach(Identity::new("a"), binding(2, Arc::default())).unwrap();

        assert!(existed);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(old_closes.load(Ordering::SeqCst), 1);
        assert_eq!(second.binding_id(), Some(2));
        assert!(second.is_in_room(RoomId(4)));
        assert_eq!(mgr.len(), 1);
    }

    #[tokio::test]
    async fn test_attach_rejects_empty_uid() {
        let mgr = SessionManager::new(SessionConfig::default());
        let err = mgr.attach(Identity::new(""), binding(1, Arc::default())).unwrap_err();
        assert!(matches!(err, SessionError::InvalidIdentity(_)));
    }

    #[tokio::test]
    async fn test_lookup_by_id_and_uid() {
        let mgr = SessionManager::new(SessionConfig::default());
        let (s, _) = mgr.attach(Identity::new("a"), binding(1, Arc::default())).unwrap();

        assert!(Arc::ptr_eq(&mgr.get(s.id()).unwrap(), &s));
        assert!(Arc::ptr_eq(&mgr.get_by_uid(&Uid::from("a")).unwrap(), &s));
        assert!(mgr.get(PlayerId(999)).is_none());
    }

    #[tokio::test]
    async fn test_remove_unknown_player_is_not_found() {
        let mgr = SessionManager::new(SessionConfig::default());
        assert!(matches!(mgr.remove(PlayerId(5)), Err(SessionError::NotFound(PlayerId(5)))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_expire_stale_keeps_members_and_recent_disconnects() {
        let mgr = SessionManager::new(SessionConfig {
            reconnect_grace: Duration::from_secs(10),
        });
        let (homeless, _) = mgr.attach(Identity::new("h"), binding(1, Arc::default())).unwrap();
        let (member, _) = mgr.attach(Identity::new("m"), binding(2, Arc::default())).unwrap();
        let (connected, _) = mgr.attach(Identity::new("c"), binding(3, Arc::default())).unwrap();
        member.enter_room(RoomId(1));

        homeless.disconnect(false);
        member.disconnect(false);

        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(mgr.expire_stale().is_empty());

        tokio::time::advance(Duration::from_secs(6)).await;
        assert_eq!(mgr.expire_stale(), vec![homeless.id()]);
        assert!(mgr.get(member.id()).is_some());
        assert!(mgr.get(connected.id()).is_some());
        assert_eq!(mgr.len(), 2);
    }
}
