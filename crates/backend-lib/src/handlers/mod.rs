// ============================
// crates/backend-lib/src/handlers/mod.rs
// ============================
//! Plain HTTP handlers served next to the WebSocket endpoint.

pub mod health;

pub use health::{health, HealthReport};
