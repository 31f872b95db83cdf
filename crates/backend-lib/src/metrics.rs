// ==============
// crates/backend-lib/src/metrics.rs

//! Central place for metric keys, plus the counters behind `/health`.
use std::sync::atomic::{AtomicU64, Ordering};

use metrics::counter;
use serde::Serialize;

pub const WS_CONNECTION: &str = "ws.connection";
pub const WS_DISCONNECTION: &str = "ws.disconnection";
pub const WS_ACTIVE: &str = "ws.active";
pub const ROOM_CREATED: &str = "room.created";
pub const ROOM_DESTROYED: &str = "room.destroyed";
pub const ROOM_ACTIVE: &str = "room.active";
pub const EVENT_INVALID: &str = "event.invalid_ignored";
pub const EVENT_RATE_LIMITED: &str = "event.rate_limited";
pub const SYNC_SOFT: &str = "sync.soft";
pub const SYNC_HARD: &str = "sync.hard";
pub const CALL_STARTED: &str = "call.started";
pub const CALL_RECOVERED: &str = "call.recovered";
pub const CALL_RECOVERY_TIMEOUT: &str = "call.recovery_timeout";

/// Process-wide counters exposed by the status endpoint
#[derive(Debug, Default)]
pub struct EventStats {
    rate_limit_ignored: AtomicU64,
    invalid_ignored: AtomicU64,
    rooms_created: AtomicU64,
}

/// Point-in-time copy of [`EventStats`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsSnapshot {
    pub rate_limit_ignored: u64,
    pub invalid_ignored: u64,
    pub rooms_created: u64,
}

impl EventStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_invalid(&self) {
        self.invalid_ignored.fetch_add(1, Ordering::Relaxed);
        counter!(EVENT_INVALID).increment(1);
    }

    pub fn record_rate_limited(&self) {
        self.rate_limit_ignored.fetch_add(1, Ordering::Relaxed);
        counter!(EVENT_RATE_LIMITED).increment(1);
    }

    pub fn record_room_created(&self) {
        self.rooms_created.fetch_add(1, Ordering::Relaxed);
        counter!(ROOM_CREATED).increment(1);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            rate_limit_ignored: self.rate_limit_ignored.load(Ordering::Relaxed),
            invalid_ignored: self.invalid_ignored.load(Ordering::Relaxed),
            rooms_created: self.rooms_created.load(Ordering::Relaxed),
        }
    }
}
