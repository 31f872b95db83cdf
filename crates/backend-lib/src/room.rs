// ============================
// crates/backend-lib/src/room.rs
// ============================
//! Room registry and actor lifecycle.
//!
//! Rooms are created lazily on first join and removed by their own actor
//! once the last member leaves. A removal only succeeds for the generation
//! that created the entry, so a room recreated under the same id is never
//! removed by its predecessor.
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use metrics::{counter, gauge};
use syncwatch_common::{RoomId, ServerEvent};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Settings;
use crate::error::AppError;
use crate::messages::{MemberInfo, RoomSnapshot};
use crate::metrics::{EventStats, ROOM_ACTIVE, ROOM_DESTROYED};
use crate::room_actor::{RoomActor, RoomHandle};

/// Joins that raced a closing room are retried this many times
const JOIN_ATTEMPTS: usize = 3;

/// Manager for all active rooms
#[derive(Clone)]
pub struct RoomRegistry {
    inner: Arc<RegistryInner>,
}

struct RegistryInner {
    rooms: DashMap<RoomId, RoomHandle>,
    /// Slots taken, counted separately so the cap can be checked under an entry lock
    reserved: AtomicUsize,
    next_generation: AtomicU64,
    settings: Arc<Settings>,
    stats: Arc<EventStats>,
    shutdown: CancellationToken,
}

impl RoomRegistry {
    pub fn new(settings: Arc<Settings>, stats: Arc<EventStats>) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                rooms: DashMap::new(),
                reserved: AtomicUsize::new(0),
                next_generation: AtomicU64::new(1),
                settings,
                stats,
                shutdown: CancellationToken::new(),
            }),
        }
    }

    pub(crate) fn settings(&self) -> Arc<Settings> {
        Arc::clone(&self.inner.settings)
    }

    pub(crate) fn shutdown_token(&self) -> &CancellationToken {
        &self.inner.shutdown
    }

    /// Join `room_id`, creating it if absent
    pub async fn join(
        &self,
        room_id: &str,
        member: MemberInfo,
        outbox: mpsc::Sender<ServerEvent>,
    ) -> Result<(RoomHandle, RoomSnapshot), AppError> {
        let mut last_error = AppError::RoomClosed;
        for attempt in 1..=JOIN_ATTEMPTS {
            let handle = self.get_or_create(room_id)?;
            match handle.join(member.clone(), outbox.clone()).await {
                Ok(snapshot) => return Ok((handle, snapshot)),
                Err(AppError::RoomClosed) => {
                    debug!(target: "syncwatch.registry", room_id, attempt, "Joined a closing room, retrying");
                    // the closing actor may not have released its slot yet
                    self.release(room_id, handle.generation());
                    tokio::task::yield_now().await;
                    last_error = AppError::RoomClosed;
                },
                Err(e) => return Err(e),
            }
        }
        warn!(target: "syncwatch.registry", room_id, "Giving up joining a closing room");
        Err(last_error)
    }

    fn get_or_create(&self, room_id: &str) -> Result<RoomHandle, AppError> {
        match self.inner.rooms.entry(room_id.to_string()) {
            Entry::Occupied(entry) if !entry.get().is_closed() => Ok(entry.get().clone()),
            Entry::Occupied(mut entry) => {
                // actor stopped without releasing; reuse its slot
                warn!(target: "syncwatch.registry", room_id, "Replacing stopped room");
                let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);
                let handle = RoomActor::spawn(room_id.to_string(), generation, self.clone());
                entry.insert(handle.clone());
                self.inner.stats.record_room_created();
                Ok(handle)
            },
            Entry::Vacant(entry) => {
                self.reserve_slot()?;
                let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);
                let handle = RoomActor::spawn(room_id.to_string(), generation, self.clone());
                entry.insert(handle.clone());
                self.inner.stats.record_room_created();
                info!(target: "syncwatch.registry", room_id, generation, "Room created");
                Ok(handle)
            },
        }
    }

    fn reserve_slot(&self) -> Result<(), AppError> {
        let max = self.inner.settings.limits.max_rooms;
        match self
            .inner
            .reserved
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| (n < max).then_some(n + 1))
        {
            Ok(previous) => {
                gauge!(ROOM_ACTIVE).set((previous + 1) as f64);
                Ok(())
            },
            Err(_) => {
                warn!(target: "syncwatch.registry", max, "Room capacity reached");
                Err(AppError::ServerBusy)
            },
        }
    }

    /// Remove the entry for `room_id` if it still belongs to `generation`
    pub(crate) fn release(&self, room_id: &str, generation: u64) {
        let removed = self
            .inner
            .rooms
            .remove_if(room_id, |_, handle| handle.generation() == generation);
        if removed.is_some() {
            let remaining = self.inner.reserved.fetch_sub(1, Ordering::SeqCst).saturating_sub(1);
            counter!(ROOM_DESTROYED).increment(1);
            gauge!(ROOM_ACTIVE).set(remaining as f64);
            debug!(target: "syncwatch.registry", room_id, generation, "Room released");
        }
    }

    /// Get a room handle by ID
    pub fn get(&self, room_id: &str) -> Option<RoomHandle> {
        self.inner.rooms.get(room_id).map(|entry| entry.value().clone())
    }

    /// Snapshot of a room, if it exists
    pub async fn snapshot(&self, room_id: &str) -> Option<RoomSnapshot> {
        let handle = self.get(room_id)?;
        handle.snapshot().await.ok()
    }

    pub fn active_rooms(&self) -> usize {
        self.inner.reserved.load(Ordering::SeqCst)
    }

    /// Get all active room IDs
    pub fn room_ids(&self) -> Vec<RoomId> {
        self.inner.rooms.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Stop every room actor and its timers
    pub fn shutdown(&self) {
        info!(target: "syncwatch.registry", rooms = self.active_rooms(), "Stopping all rooms");
        self.inner.shutdown.cancel();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::call::tests::member;
    use crate::messages::CallPhase;

    fn registry(max_rooms: usize, max_members: usize) -> RoomRegistry {
        let settings = Settings::builder()
            .max_rooms(max_rooms)
            .max_members_per_room(max_members)
            .build()
            .unwrap();
        RoomRegistry::new(Arc::new(settings), Arc::new(EventStats::new()))
    }

    async fn wait_for_rooms(registry: &RoomRegistry, expected: usize) {
        for _ in 0..100 {
            if registry.active_rooms() == expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("expected {expected} rooms, found {}", registry.active_rooms());
    }

    #[tokio::test]
    async fn test_first_join_creates_room_with_defaults() {
        let registry = registry(10, 10);
        let (tx, mut rx) = mpsc::channel(16);
        let (_, snapshot) = registry
            .join("abc123", member("conn-a", "user-a", "Alice"), tx)
            .await
            .unwrap();

        assert_eq!(snapshot.room_id, "abc123");
        assert_eq!(snapshot.video_id, None);
        assert!(!snapshot.is_playing);
        assert_eq!(snapshot.timestamp, 0.0);
        assert_eq!(snapshot.member_count, 1);
        assert!(snapshot.is_host);
        assert_eq!(snapshot.host_user_id.as_deref(), Some("user-a"));
        assert_eq!(snapshot.call, CallPhase::Idle);
        assert_eq!(registry.active_rooms(), 1);

        match rx.recv().await.unwrap() {
            ServerEvent::RoomState { user_count, is_host, .. } => {
                assert_eq!(user_count, 1);
                assert!(is_host);
            },
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_capacity_is_enforced() {
        let registry = registry(1, 1);
        let (tx, _rx) = mpsc::channel(16);
        registry
            .join("room-1", member("conn-a", "user-a", "Alice"), tx.clone())
            .await
            .unwrap();

        let err = registry
            .join("room-2", member("conn-b", "user-b", "Bob"), tx.clone())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::ServerBusy));

        let err = registry
            .join("room-1", member("conn-c", "user-c", "Carol"), tx)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::RoomFull));
        assert_eq!(registry.active_rooms(), 1);
    }

    #[tokio::test]
    async fn test_last_leave_destroys_room() {
        let registry = registry(10, 10);
        let (tx, _rx) = mpsc::channel(16);
        let (handle, _) = registry
            .join("abc123", member("conn-a", "user-a", "Alice"), tx.clone())
            .await
            .unwrap();
        handle.leave("conn-a").await;
        wait_for_rooms(&registry, 0).await;
        assert!(registry.get("abc123").is_none());

        // recreated fresh under the same id
        let (_, snapshot) = registry
            .join("abc123", member("conn-b", "user-b", "Bob"), tx)
            .await
            .unwrap();
        assert_eq!(snapshot.host_user_id.as_deref(), Some("user-b"));
        assert_eq!(registry.active_rooms(), 1);
    }

    #[tokio::test]
    async fn test_stale_release_keeps_newer_room() {
        let registry = registry(10, 10);
        let (tx, _rx) = mpsc::channel(16);
        let (handle, _) = registry
            .join("abc123", member("conn-a", "user-a", "Alice"), tx)
            .await
            .unwrap();
        registry.release("abc123", handle.generation() + 100);
        assert!(registry.get("abc123").is_some());
        assert_eq!(registry.active_rooms(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_stops_rooms() {
        let registry = registry(10, 10);
        let (tx, _rx) = mpsc::channel(16);
        registry
            .join("abc123", member("conn-a", "user-a", "Alice"), tx)
            .await
            .unwrap();
        registry.shutdown();
        wait_for_rooms(&registry, 0).await;
        assert!(registry.room_ids().is_empty());
    }
}
