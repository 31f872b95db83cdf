//! Authoritative playback state for one room.
//!
//! The position is not advanced by a clock. It is stored as of `last_update`
//! and reconstructed on demand while playing.

use syncwatch_common::{HardSyncPrepare, HardSyncResume, PlaybackAction, ServerEvent, SyncUpdate};
use tokio::time::Instant;

#[derive(Debug, Clone)]
pub struct Playback {
    video_id: Option<String>,
    is_playing: bool,
    timestamp: f64,
    last_update: Instant,
    /// Hard sync waiting for its resume phase
    pending_sync: Option<u64>,
    last_sync_id: u64,
}

impl Playback {
    pub fn new(now: Instant) -> Self {
        Self {
            video_id: None,
            is_playing: false,
            timestamp: 0.0,
            last_update: now,
            pending_sync: None,
            last_sync_id: 0,
        }
    }

    pub fn video_id(&self) -> Option<&str> {
        self.video_id.as_deref()
    }

    pub fn is_playing(&self) -> bool {
        self.is_playing
    }

    pub fn pending_sync(&self) -> Option<u64> {
        self.pending_sync
    }

    /// Position at `now`, in seconds
    pub fn position_at(&self, now: Instant) -> f64 {
        if self.is_playing {
            self.timestamp + now.saturating_duration_since(self.last_update).as_secs_f64()
        } else {
            self.timestamp
        }
    }

    fn set(&mut self, is_playing: bool, timestamp: f64, now: Instant) {
        self.is_playing = is_playing;
        self.timestamp = timestamp;
        self.last_update = now;
    }

    /// Soft sync: take a member's report as the new truth and build the relay
    pub fn apply_report(
        &mut self,
        action: PlaybackAction,
        timestamp: f64,
        is_playing: bool,
        now: Instant,
    ) -> SyncUpdate {
        self.set(is_playing, timestamp, now);
        SyncUpdate {
            action,
            timestamp,
            is_playing,
        }
    }

    /// Switch video and restart playback from zero.
    ///
    /// Supersedes any pending hard sync.
    pub fn change_video(&mut self, video_id: String, now: Instant) -> ServerEvent {
        self.pending_sync = None;
        self.video_id = Some(video_id.clone());
        self.set(true, 0.0, now);
        ServerEvent::UpdateVideo {
            video_id,
            is_playing: true,
            timestamp: 0.0,
        }
    }

    /// Hard sync phase one: pause at the initiator's position.
    ///
    /// A newer hard sync replaces a pending one.
    pub fn begin_hard_sync(&mut self, timestamp: f64, now: Instant) -> HardSyncPrepare {
        self.last_sync_id += 1;
        self.pending_sync = Some(self.last_sync_id);
        self.set(false, timestamp, now);
        HardSyncPrepare {
            sync_id: self.last_sync_id,
            video_id: self.video_id.clone(),
            timestamp,
        }
    }

    /// Hard sync phase two, only for the sync still pending
    pub fn complete_hard_sync(&mut self, sync_id: u64, now: Instant) -> Option<HardSyncResume> {
        if self.pending_sync != Some(sync_id) {
            return None;
        }
        self.pending_sync = None;
        let timestamp = self.position_at(now);
        self.set(true, timestamp, now);
        Some(HardSyncResume {
            sync_id,
            timestamp,
            is_playing: true,
        })
    }

    /// Reply to `request-sync`
    pub fn force_sync(&self, now: Instant) -> ServerEvent {
        ServerEvent::ForceSync {
            video_id: self.video_id.clone(),
            timestamp: self.position_at(now),
            is_playing: self.is_playing,
        }
    }
}
