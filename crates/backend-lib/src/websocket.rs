// ==================
// crates/backend-lib/src/websocket.rs
// ==================
//! Per-connection event handling.
//!
//! A `ConnectionHandler` is instantiated for each WebSocket and owns the
//! state of that one participant: its connection id, its identity, its
//! outbox and the room it has joined. Every inbound event goes through the
//! same pipeline:
//!
//! 1. parse into a [`ClientEvent`]
//! 2. validate shapes and sizes
//! 3. charge the per-connection rate limiter
//! 4. route `join` to the registry, anything else to the joined room
//!
//! Events failing steps 1 to 3, and events naming a room the connection has
//! not joined, are dropped silently and counted. Errors worth surfacing
//! (capacity, host-only actions) come back as `error` events on the outbox.

use std::sync::Arc;

use syncwatch_common::{ClientEvent, ConnectionId, ServerEvent};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::auth::Identity;
use crate::error::AppError;
use crate::messages::{MemberInfo, RoomIntent, Signal};
use crate::rate_limit::EventKind;
use crate::room_actor::RoomHandle;
use crate::validation::{display_name, sanitize, validate_client_event};
use crate::AppState;

/// What happened to one inbound event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventOutcome {
    Joined,
    Forwarded,
    /// An `error` event was sent back
    Rejected,
    Invalid,
    RateLimited,
}

/// WebSocket handler for one participant
pub struct ConnectionHandler {
    state: Arc<AppState>,
    connection_id: ConnectionId,
    identity: Identity,
    outbox: mpsc::Sender<ServerEvent>,
    room: Option<RoomHandle>,
}

impl ConnectionHandler {
    pub fn new(state: Arc<AppState>, identity: Identity, outbox: mpsc::Sender<ServerEvent>) -> Self {
        let limits = &state.settings.limits;
        let identity = Identity {
            display_name: display_name(&identity.display_name, &identity.user_id, limits),
            user_id: identity.user_id,
        };
        Self {
            connection_id: Uuid::new_v4().to_string(),
            identity,
            outbox,
            room: None,
            state,
        }
    }

    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Room currently joined, if any
    pub fn room_id(&self) -> Option<&str> {
        self.room.as_ref().map(RoomHandle::room_id)
    }

    /// Handle one text frame
    pub async fn handle_text(&mut self, text: &str) -> EventOutcome {
        match serde_json::from_str::<ClientEvent>(text) {
            Ok(event) => self.handle_event(event).await,
            Err(e) => {
                debug!(target: "syncwatch.ws", connection_id = %self.connection_id, error = %e, "Malformed event");
                self.state.stats.record_invalid();
                EventOutcome::Invalid
            },
        }
    }

    pub async fn handle_event(&mut self, event: ClientEvent) -> EventOutcome {
        if let Err(e) = validate_client_event(&event, &self.state.settings.limits) {
            debug!(
                target: "syncwatch.ws",
                connection_id = %self.connection_id,
                event = event.name(),
                error = %e,
                "Invalid event"
            );
            self.state.stats.record_invalid();
            return EventOutcome::Invalid;
        }

        if !self.state.rate_limiter.check(&self.connection_id, EventKind::of(&event)) {
            debug!(
                target: "syncwatch.ws",
                connection_id = %self.connection_id,
                event = event.name(),
                error = %AppError::RateLimitExceeded,
                "Event dropped"
            );
            self.state.stats.record_rate_limited();
            return EventOutcome::RateLimited;
        }

        match event {
            ClientEvent::Join { room_id } => self.join(room_id).await,
            other => self.forward(other).await,
        }
    }

    async fn join(&mut self, room_id: String) -> EventOutcome {
        if let Some(current) = self.room.take() {
            if current.room_id() != room_id {
                current.leave(&self.connection_id).await;
            }
        }

        let member = MemberInfo::new(self.connection_id.clone(), self.identity.clone());
        match self.state.rooms.join(&room_id, member, self.outbox.clone()).await {
            Ok((handle, snapshot)) => {
                info!(
                    target: "syncwatch.ws",
                    connection_id = %self.connection_id,
                    user_id = %self.identity.user_id,
                    room_id = %room_id,
                    is_host = snapshot.is_host,
                    "Joined room"
                );
                self.room = Some(handle);
                EventOutcome::Joined
            },
            Err(e) => {
                warn!(
                    target: "syncwatch.ws",
                    connection_id = %self.connection_id,
                    room_id = %room_id,
                    error = %e,
                    "Join refused"
                );
                self.reply(e.to_event()).await;
                EventOutcome::Rejected
            },
        }
    }

    async fn forward(&mut self, event: ClientEvent) -> EventOutcome {
        let room = match &self.room {
            Some(room) if room.room_id() == event.room_id() => room.clone(),
            _ => {
                let e = AppError::NotInRoom(event.room_id().to_string());
                debug!(
                    target: "syncwatch.ws",
                    connection_id = %self.connection_id,
                    event = event.name(),
                    error = %e,
                    "Event dropped"
                );
                self.state.stats.record_invalid();
                return EventOutcome::Invalid;
            },
        };

        let Some(intent) = into_intent(event) else {
            return EventOutcome::Invalid;
        };
        match room.intent(&self.connection_id, intent).await {
            Ok(()) => EventOutcome::Forwarded,
            Err(e) => {
                warn!(target: "syncwatch.ws", connection_id = %self.connection_id, error = %e, "Room unavailable");
                self.room = None;
                self.reply(e.to_event()).await;
                EventOutcome::Rejected
            },
        }
    }

    async fn reply(&self, event: ServerEvent) {
        if self.outbox.send(event).await.is_err() {
            debug!(target: "syncwatch.ws", connection_id = %self.connection_id, "Outbox closed");
        }
    }

    /// Leave the joined room and drop per-connection state
    pub async fn disconnect(self) {
        if let Some(room) = &self.room {
            room.leave(&self.connection_id).await;
        }
        self.state.rate_limiter.forget(&self.connection_id);
        debug!(target: "syncwatch.ws", connection_id = %self.connection_id, "Connection state released");
    }
}

/// Room-bound intent for a validated event. `join` has none.
fn into_intent(event: ClientEvent) -> Option<RoomIntent> {
    let intent = match event {
        ClientEvent::Join { .. } => return None,
        ClientEvent::ChangeVideo { video_id, .. } => RoomIntent::ChangeVideo { video_id },
        ClientEvent::SyncAction {
            action,
            timestamp,
            is_playing,
            ..
        } => RoomIntent::Sync {
            action,
            timestamp,
            is_playing,
        },
        ClientEvent::HardSync {
            timestamp,
            video_id,
            ..
        } => RoomIntent::HardSync {
            timestamp,
            video_id,
        },
        ClientEvent::RequestSync { .. } => RoomIntent::RequestSync,
        ClientEvent::ChatMessage { message, .. } => RoomIntent::Chat {
            message: sanitize(&message),
        },
        ClientEvent::CallUser { .. } => RoomIntent::CallUser,
        ClientEvent::CallAccepted { caller_id, .. } => RoomIntent::CallAccepted { caller_id },
        ClientEvent::CallRejected { caller_id, .. } => RoomIntent::CallRejected { caller_id },
        ClientEvent::VcOffer { offer, .. } => RoomIntent::Signal(Signal::Offer(offer)),
        ClientEvent::VcAnswer { answer, .. } => RoomIntent::Signal(Signal::Answer(answer)),
        ClientEvent::VcIceCandidate { candidate, .. } => {
            RoomIntent::Signal(Signal::IceCandidate(candidate))
        },
        ClientEvent::VcEnd { .. } => RoomIntent::EndCall,
        ClientEvent::VcReconnect { .. } => RoomIntent::Reconnect,
        ClientEvent::VcConnectionState { state, .. } => RoomIntent::MediaState(state),
    };
    Some(intent)
}
