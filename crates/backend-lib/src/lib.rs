// ============================
// syncwatch-backend-lib/src/lib.rs
// ============================
//! Core backend-lib functionality for the syncwatch WebSocket server.

pub mod auth;
pub mod call;
pub mod config;
pub mod error;
pub mod handlers;
pub mod messages;
pub mod metrics;
pub mod playback;
pub mod rate_limit;
pub mod recovery;
pub mod room;
pub mod room_actor;
pub mod timer;
pub mod validation;
pub mod websocket;
pub mod ws_router;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use ::metrics::{counter, gauge};

use crate::auth::IdentityProvider;
use crate::config::Settings;
use crate::error::AppError;
use crate::metrics::{EventStats, WS_ACTIVE, WS_CONNECTION, WS_DISCONNECTION};
use crate::rate_limit::EventRateLimiter;
use crate::room::RoomRegistry;

/// Application state shared across all handlers
pub struct AppState {
    /// Validated settings
    pub settings: Arc<Settings>,
    /// Live rooms
    pub rooms: RoomRegistry,
    /// Per-connection event admission
    pub rate_limiter: Arc<EventRateLimiter>,
    /// Counters behind `/health`
    pub stats: Arc<EventStats>,
    /// Resolves the handshake into an identity
    pub identity: Arc<dyn IdentityProvider>,
    started_at: Instant,
    connections: AtomicUsize,
}

impl AppState {
    /// Create a new application state
    pub fn new(settings: Settings, identity: Arc<dyn IdentityProvider>) -> Result<Self, AppError> {
        settings.validate()?;
        let settings = Arc::new(settings);
        let stats = Arc::new(EventStats::new());
        let rate_limiter = Arc::new(EventRateLimiter::new(
            settings.rate_window(),
            settings.rate_limits.clone(),
        ));

        Ok(Self {
            rooms: RoomRegistry::new(Arc::clone(&settings), Arc::clone(&stats)),
            settings,
            rate_limiter,
            stats,
            identity,
            started_at: Instant::now(),
            connections: AtomicUsize::new(0),
        })
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    pub fn active_connections(&self) -> usize {
        self.connections.load(Ordering::Relaxed)
    }

    pub(crate) fn connection_opened(&self) {
        let active = self.connections.fetch_add(1, Ordering::Relaxed) + 1;
        counter!(WS_CONNECTION).increment(1);
        gauge!(WS_ACTIVE).set(active as f64);
    }

    pub(crate) fn connection_closed(&self) {
        let active = self.connections.fetch_sub(1, Ordering::Relaxed).saturating_sub(1);
        counter!(WS_DISCONNECTION).increment(1);
        gauge!(WS_ACTIVE).set(active as f64);
    }
}
