// ============================
// crates/backend-lib/src/rate_limit.rs
// ============================
//! Soft per-connection rate limiting for client events.
//!
//! Every connection gets an independent fixed window per event kind. Excess
//! events are reported as not admitted; the caller drops them silently and the
//! connection is never penalized. Windows are reclaimed when the connection
//! goes away.

use std::collections::HashMap;
use std::time::Duration;

use dashmap::DashMap;
use syncwatch_common::ClientEvent;
use tokio::time::Instant;

use crate::config::RateLimitSettings;

/// Rate limit bucket an event is charged to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// Soft-sync playback reports
    Sync,
    Chat,
    HardSync,
    /// Join, video change, sync requests and call lifecycle
    Control,
    /// Opaque offer/answer/candidate relay
    Signaling,
}

impl EventKind {
    pub fn of(event: &ClientEvent) -> Self {
        match event {
            ClientEvent::SyncAction { .. } => EventKind::Sync,
            ClientEvent::ChatMessage { .. } => EventKind::Chat,
            ClientEvent::HardSync { .. } => EventKind::HardSync,
            ClientEvent::VcOffer { .. }
            | ClientEvent::VcAnswer { .. }
            | ClientEvent::VcIceCandidate { .. } => EventKind::Signaling,
            ClientEvent::Join { .. }
            | ClientEvent::ChangeVideo { .. }
            | ClientEvent::RequestSync { .. }
            | ClientEvent::CallUser { .. }
            | ClientEvent::CallAccepted { .. }
            | ClientEvent::CallRejected { .. }
            | ClientEvent::VcEnd { .. }
            | ClientEvent::VcReconnect { .. }
            | ClientEvent::VcConnectionState { .. } => EventKind::Control,
        }
    }
}

/// One fixed window
#[derive(Debug, Clone, Copy)]
struct Window {
    count: u32,
    resets_at: Instant,
}

/// Rate limiter keyed by connection, then by event kind
#[derive(Debug)]
pub struct EventRateLimiter {
    windows: DashMap<String, HashMap<EventKind, Window>>,
    window: Duration,
    allowances: RateLimitSettings,
}

impl EventRateLimiter {
    pub fn new(window: Duration, allowances: RateLimitSettings) -> Self {
        Self {
            windows: DashMap::new(),
            window,
            allowances,
        }
    }

    fn allowance(&self, kind: EventKind) -> u32 {
        match kind {
            EventKind::Sync => self.allowances.sync,
            EventKind::Chat => self.allowances.chat,
            EventKind::HardSync => self.allowances.hard_sync,
            EventKind::Control => self.allowances.control,
            EventKind::Signaling => self.allowances.signaling,
        }
    }

    /// Admit or refuse one event of `kind` from `connection_id`
    pub fn check(&self, connection_id: &str, kind: EventKind) -> bool {
        let now = Instant::now();
        let max = self.allowance(kind);
        let mut windows = self.windows.entry(connection_id.to_owned()).or_default();

        let fresh = Window {
            count: 0,
            resets_at: now + self.window,
        };
        let window = windows.entry(kind).or_insert(fresh);
        if now >= window.resets_at {
            *window = fresh;
        }

        if window.count < max {
            window.count += 1;
            true
        } else {
            false
        }
    }

    /// Drop every window held for a connection
    pub fn forget(&self, connection_id: &str) {
        self.windows.remove(connection_id);
    }

    /// Number of connections with live windows
    pub fn tracked_connections(&self) -> usize {
        self.windows.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn limiter() -> EventRateLimiter {
        EventRateLimiter::new(Duration::from_secs(1), RateLimitSettings::default())
    }

    #[tokio::test(start_paused = true)]
    async fn test_n_plus_one_dropped_then_admitted_next_window() {
        let limiter = limiter();
        for _ in 0..3 {
            assert!(limiter.check("conn-a", EventKind::Sync));
        }
        assert!(!limiter.check("conn-a", EventKind::Sync));

        tokio::time::advance(Duration::from_millis(999)).await;
        assert!(!limiter.check("conn-a", EventKind::Sync));

        tokio::time::advance(Duration::from_millis(1)).await;
        assert!(limiter.check("conn-a", EventKind::Sync));
    }

    #[tokio::test(start_paused = true)]
    async fn test_kinds_and_connections_are_independent() {
        let limiter = limiter();
        for _ in 0..3 {
            assert!(limiter.check("conn-a", EventKind::Sync));
        }
        assert!(!limiter.check("conn-a", EventKind::Sync));

        // other kind, same connection
        assert!(limiter.check("conn-a", EventKind::Chat));
        assert!(limiter.check("conn-a", EventKind::Chat));
        assert!(!limiter.check("conn-a", EventKind::Chat));

        // same kind, other connection
        assert!(limiter.check("conn-b", EventKind::Sync));
    }

    #[tokio::test(start_paused = true)]
    async fn test_forget_reclaims_windows() {
        let limiter = limiter();
        limiter.check("conn-a", EventKind::Sync);
        limiter.check("conn-b", EventKind::Signaling);
        assert_eq!(limiter.tracked_connections(), 2);

        limiter.forget("conn-a");
        assert_eq!(limiter.tracked_connections(), 1);

        limiter.forget("conn-b");
        assert_eq!(limiter.tracked_connections(), 0);
    }

    #[test]
    fn test_event_kind_classification() {
        let offer: ClientEvent = serde_json::from_value(json!({
            "event": "vc-offer",
            "data": { "roomId": "r", "offer": { "sdp": "v=0" } }
        }))
        .unwrap();
        assert_eq!(EventKind::of(&offer), EventKind::Signaling);

        let join = ClientEvent::Join {
            room_id: "r".to_string(),
        };
        assert_eq!(EventKind::of(&join), EventKind::Control);
    }
}
