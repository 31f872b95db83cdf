//! Receiver side of soft and hard sync.
//!
//! `PlaybackFollower` turns server sync events into player commands and decides
//! whether a local player event may be reported back. It owns no clock; every
//! call takes `now` so it can be driven deterministically.

use std::time::{Duration, Instant};

use crate::{HardSyncPrepare, HardSyncResume, SyncUpdate};

/// Drift tolerated before a soft sync issues a seek, in seconds
pub const DEFAULT_TOLERANCE_SECS: f64 = 0.5;

/// Local player events are not reported for this long after a remote update
pub const ECHO_LOCK: Duration = Duration::from_millis(500);

/// Upper bound on hard-sync suppression if the resume never arrives
pub const HARD_SYNC_SAFETY: Duration = Duration::from_secs(10);

/// Instruction for the local video player
#[derive(Debug, Clone, PartialEq)]
pub enum PlayerCommand {
    Load(String),
    Seek(f64),
    Play,
    Pause,
}

#[derive(Debug, Clone, Copy)]
struct PendingHardSync {
    sync_id: u64,
    expires_at: Instant,
}

/// Client-side follower of the room's authoritative playback
#[derive(Debug, Clone)]
pub struct PlaybackFollower {
    tolerance: f64,
    echo_lock_until: Option<Instant>,
    pending: Option<PendingHardSync>,
}

impl Default for PlaybackFollower {
    fn default() -> Self {
        Self::new(DEFAULT_TOLERANCE_SECS)
    }
}

impl PlaybackFollower {
    pub fn new(tolerance: f64) -> Self {
        Self {
            tolerance,
            echo_lock_until: None,
            pending: None,
        }
    }

    pub fn tolerance(&self) -> f64 {
        self.tolerance
    }

    /// Apply another member's playback report.
    ///
    /// Seeks only when the local position is off by more than the tolerance;
    /// play/pause state is always aligned.
    pub fn on_sync_update(&mut self, update: &SyncUpdate, local_time: f64, now: Instant) -> Vec<PlayerCommand> {
        let mut commands = Vec::with_capacity(2);
        if (local_time - update.timestamp).abs() > self.tolerance {
            commands.push(PlayerCommand::Seek(update.timestamp));
        }
        commands.push(if update.is_playing {
            PlayerCommand::Play
        } else {
            PlayerCommand::Pause
        });
        self.echo_lock_until = Some(now + ECHO_LOCK);
        commands
    }

    /// Host switched videos; playback restarts from zero
    pub fn on_update_video(&mut self, video_id: &str, now: Instant) -> Vec<PlayerCommand> {
        self.pending = None;
        self.echo_lock_until = Some(now + ECHO_LOCK);
        vec![
            PlayerCommand::Load(video_id.to_string()),
            PlayerCommand::Seek(0.0),
            PlayerCommand::Play,
        ]
    }

    /// Phase one: pause at the initiator's position and hold still
    pub fn on_hard_sync_prepare(
        &mut self,
        prepare: &HardSyncPrepare,
        current_video: Option<&str>,
        now: Instant,
    ) -> Vec<PlayerCommand> {
        let mut commands = Vec::with_capacity(3);
        if let Some(video_id) = prepare.video_id.as_deref() {
            if current_video != Some(video_id) {
                commands.push(PlayerCommand::Load(video_id.to_string()));
            }
        }
        commands.push(PlayerCommand::Pause);
        commands.push(PlayerCommand::Seek(prepare.timestamp));
        self.pending = Some(PendingHardSync {
            sync_id: prepare.sync_id,
            expires_at: now + HARD_SYNC_SAFETY,
        });
        commands
    }

    /// Phase two: seek to the authoritative position and play.
    ///
    /// Resumes for a superseded hard sync are ignored.
    pub fn on_hard_sync_resume(&mut self, resume: &HardSyncResume, now: Instant) -> Vec<PlayerCommand> {
        match self.pending {
            Some(pending) if pending.sync_id == resume.sync_id => {
                self.pending = None;
                self.echo_lock_until = Some(now + ECHO_LOCK);
                let mut commands = vec![PlayerCommand::Seek(resume.timestamp)];
                commands.push(if resume.is_playing {
                    PlayerCommand::Play
                } else {
                    PlayerCommand::Pause
                });
                commands
            },
            _ => Vec::new(),
        }
    }

    /// Whether a hard sync is between its prepare and resume
    pub fn in_hard_sync(&self, now: Instant) -> bool {
        self.pending.is_some_and(|p| now < p.expires_at)
    }

    /// Whether a local player event should be reported as a `sync-action`
    pub fn should_report(&self, now: Instant) -> bool {
        if self.in_hard_sync(now) {
            return false;
        }
        !self.echo_lock_until.is_some_and(|until| now < until)
    }
}
