// ============================
// syncwatch-backend-lib/src/auth/mod.rs
// ============================
//! Identity collaborator seam.
//!
//! The server never checks credentials. An [`IdentityProvider`] turns the
//! WebSocket handshake into an already-authenticated [`Identity`].

mod service;
mod service_impl;

pub use service::{HandshakeParams, Identity, IdentityProvider};
pub use service_impl::{AnonymousIdentity, TrustedQueryIdentity};
