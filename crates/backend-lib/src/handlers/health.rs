// ============================
// crates/backend-lib/src/handlers/health.rs
// ============================
use std::sync::Arc;

use axum::{extract::State, Json};
use serde::Serialize;

use crate::metrics::StatsSnapshot;
use crate::AppState;

/// Body of `GET /health`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub status: &'static str,
    /// Whole seconds since start
    pub uptime: u64,
    pub active_rooms: usize,
    pub active_sockets: usize,
    pub stats: StatsSnapshot,
}

impl HealthReport {
    pub fn collect(state: &AppState) -> Self {
        Self {
            status: "ok",
            uptime: state.uptime().as_secs(),
            active_rooms: state.rooms.active_rooms(),
            active_sockets: state.active_connections(),
            stats: state.stats.snapshot(),
        }
    }
}

/// Read-only liveness and counters
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthReport> {
    Json(HealthReport::collect(&state))
}
