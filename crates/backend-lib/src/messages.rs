// ================
// crates/backend-lib/src/messages.rs
// ================
//! Messages exchanged with room actors, and the outbound delivery plan the
//! pure state machines hand back to them.
use chrono::{DateTime, Utc};
use serde_json::Value;
use syncwatch_common::{ConnectionId, MediaConnectionState, PlaybackAction, RoomId, ServerEvent};
use tokio::sync::{mpsc, oneshot};

use crate::auth::Identity;
use crate::error::AppError;

/// A connection as seen by a room
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberInfo {
    pub connection_id: ConnectionId,
    pub identity: Identity,
}

impl MemberInfo {
    pub fn new(connection_id: impl Into<ConnectionId>, identity: Identity) -> Self {
        Self {
            connection_id: connection_id.into(),
            identity,
        }
    }

    pub fn display_name(&self) -> &str {
        &self.identity.display_name
    }
}

/// Message sent *into* a room actor
#[derive(Debug)]
pub enum RoomMsg {
    Join {
        member: MemberInfo,
        outbox: mpsc::Sender<ServerEvent>,
        respond_to: oneshot::Sender<Result<RoomSnapshot, AppError>>,
    },
    Leave {
        connection_id: ConnectionId,
    },
    Intent {
        connection_id: ConnectionId,
        intent: RoomIntent,
    },
    /// Hard-sync settle delay elapsed
    HardSyncResume {
        sync_id: u64,
    },
    /// Call recovery window elapsed
    RecoveryDeadline {
        generation: u64,
    },
    Snapshot {
        respond_to: oneshot::Sender<RoomSnapshot>,
    },
}

/// Validated member intent, already bound to the room
#[derive(Debug, Clone, PartialEq)]
pub enum RoomIntent {
    ChangeVideo {
        video_id: String,
    },
    Sync {
        action: PlaybackAction,
        timestamp: f64,
        is_playing: bool,
    },
    HardSync {
        timestamp: f64,
        video_id: Option<String>,
    },
    RequestSync,
    /// Already escaped
    Chat {
        message: String,
    },
    CallUser,
    CallAccepted {
        caller_id: ConnectionId,
    },
    CallRejected {
        caller_id: ConnectionId,
    },
    Signal(Signal),
    EndCall,
    Reconnect,
    MediaState(MediaConnectionState),
}

/// Opaque negotiation payload relayed between call parties
#[derive(Debug, Clone, PartialEq)]
pub enum Signal {
    Offer(Value),
    Answer(Value),
    IceCandidate(Value),
}

impl Signal {
    /// Outbound form, stamped with the sender's connection id
    pub fn into_event(self, from: &str) -> ServerEvent {
        let id = from.to_string();
        match self {
            Signal::Offer(offer) => ServerEvent::VcOffer { offer, id },
            Signal::Answer(answer) => ServerEvent::VcAnswer { answer, id },
            Signal::IceCandidate(candidate) => ServerEvent::VcIceCandidate { candidate, id },
        }
    }
}

/// Who receives an outbound event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    One(ConnectionId),
    AllExcept(ConnectionId),
    All,
}

/// One outbound event and its recipients
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub target: Target,
    pub event: ServerEvent,
}

impl Delivery {
    pub fn to(connection_id: impl Into<ConnectionId>, event: ServerEvent) -> Self {
        Self {
            target: Target::One(connection_id.into()),
            event,
        }
    }

    pub fn all_except(connection_id: impl Into<ConnectionId>, event: ServerEvent) -> Self {
        Self {
            target: Target::AllExcept(connection_id.into()),
            event,
        }
    }

    pub fn all(event: ServerEvent) -> Self {
        Self {
            target: Target::All,
            event,
        }
    }
}

/// Coarse call state reported in snapshots
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallPhase {
    Idle,
    Ringing,
    Active,
    Recovering,
}

/// Read-only view of a room
#[derive(Debug, Clone, PartialEq)]
pub struct RoomSnapshot {
    pub room_id: RoomId,
    pub video_id: Option<String>,
    pub is_playing: bool,
    /// Position reconstructed at snapshot time
    pub timestamp: f64,
    pub session_start_time: DateTime<Utc>,
    pub member_count: usize,
    pub host_user_id: Option<String>,
    pub host_connection_id: Option<ConnectionId>,
    /// Whether the connection the snapshot was taken for holds the host role
    pub is_host: bool,
    pub call: CallPhase,
}

impl RoomSnapshot {
    pub fn to_event(&self, sync_tolerance: f64) -> ServerEvent {
        ServerEvent::RoomState {
            video_id: self.video_id.clone(),
            is_playing: self.is_playing,
            timestamp: self.timestamp,
            session_start_time: self.session_start_time.to_rfc3339(),
            user_count: self.member_count,
            is_host: self.is_host,
            sync_tolerance,
        }
    }
}
