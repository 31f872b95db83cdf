// ================
// common/src/lib.rs
// ================
//! Common types and structures
//! used for communication between `SyncWatch` clients and the server.
//! This module defines the WebSocket protocol events and supporting types.
//!
//! Every frame is a JSON text message of the form
//! `{"event": "<kebab-name>", "data": { ...camelCase fields... }}`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub mod follower;

/// Room identifier as chosen by clients (opaque string key)
pub type RoomId = String;

/// Ephemeral per-connection identifier assigned by the server
pub type ConnectionId = String;

/// Playback action reported by a client player
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackAction {
    Play,
    Pause,
}

/// Media transport state observed by a call participant
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MediaConnectionState {
    Connected,
    Disconnected,
    Failed,
}

/// Events sent from client to server
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ClientEvent {
    /// Join (or create) a room
    Join { room_id: RoomId },
    /// Change the active video (host only)
    ChangeVideo { room_id: RoomId, video_id: String },
    /// Report a local play/pause with the observed position
    SyncAction {
        room_id: RoomId,
        #[serde(rename = "type")]
        action: PlaybackAction,
        timestamp: f64,
        is_playing: bool,
    },
    /// Ask every member to pause, seek and resume together
    HardSync {
        room_id: RoomId,
        timestamp: f64,
        #[serde(default)]
        video_id: Option<String>,
    },
    /// Ask for the authoritative playback state
    RequestSync { room_id: RoomId },
    /// Chat line for the room
    ChatMessage { room_id: RoomId, message: String },
    /// Start ringing the other room members
    CallUser { room_id: RoomId },
    /// Accept a ringing call from `caller_id`
    CallAccepted { room_id: RoomId, caller_id: ConnectionId },
    /// Reject a ringing call from `caller_id`
    CallRejected { room_id: RoomId, caller_id: ConnectionId },
    /// Opaque session description offer
    VcOffer { room_id: RoomId, offer: Value },
    /// Opaque session description answer
    VcAnswer { room_id: RoomId, answer: Value },
    /// Opaque connectivity candidate
    VcIceCandidate { room_id: RoomId, candidate: Value },
    /// Hang up
    VcEnd { room_id: RoomId },
    /// Participant intends to renegotiate a disrupted call
    VcReconnect { room_id: RoomId },
    /// Media transport state change observed by the participant
    VcConnectionState {
        room_id: RoomId,
        state: MediaConnectionState,
    },
}

impl ClientEvent {
    /// Room the event is addressed to
    pub fn room_id(&self) -> &str {
        match self {
            ClientEvent::Join { room_id }
            | ClientEvent::ChangeVideo { room_id, .. }
            | ClientEvent::SyncAction { room_id, .. }
            | ClientEvent::HardSync { room_id, .. }
            | ClientEvent::RequestSync { room_id }
            | ClientEvent::ChatMessage { room_id, .. }
            | ClientEvent::CallUser { room_id }
            | ClientEvent::CallAccepted { room_id, .. }
            | ClientEvent::CallRejected { room_id, .. }
            | ClientEvent::VcOffer { room_id, .. }
            | ClientEvent::VcAnswer { room_id, .. }
            | ClientEvent::VcIceCandidate { room_id, .. }
            | ClientEvent::VcEnd { room_id }
            | ClientEvent::VcReconnect { room_id }
            | ClientEvent::VcConnectionState { room_id, .. } => room_id,
        }
    }

    /// Wire name of the event, for logs
    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::Join { .. } => "join",
            ClientEvent::ChangeVideo { .. } => "change-video",
            ClientEvent::SyncAction { .. } => "sync-action",
            ClientEvent::HardSync { .. } => "hard-sync",
            ClientEvent::RequestSync { .. } => "request-sync",
            ClientEvent::ChatMessage { .. } => "chat-message",
            ClientEvent::CallUser { .. } => "call-user",
            ClientEvent::CallAccepted { .. } => "call-accepted",
            ClientEvent::CallRejected { .. } => "call-rejected",
            ClientEvent::VcOffer { .. } => "vc-offer",
            ClientEvent::VcAnswer { .. } => "vc-answer",
            ClientEvent::VcIceCandidate { .. } => "vc-ice-candidate",
            ClientEvent::VcEnd { .. } => "vc-end",
            ClientEvent::VcReconnect { .. } => "vc-reconnect",
            ClientEvent::VcConnectionState { .. } => "vc-connection-state",
        }
    }
}

/// Soft-sync relay of another member's playback report
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SyncUpdate {
    #[serde(rename = "type")]
    pub action: PlaybackAction,
    pub timestamp: f64,
    pub is_playing: bool,
}

/// Phase one of a hard sync
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HardSyncPrepare {
    /// Identifies this hard sync; the matching resume carries the same id
    pub sync_id: u64,
    /// Room video every member should have loaded
    pub video_id: Option<String>,
    /// Position to pause at
    pub timestamp: f64,
}

/// Phase two of a hard sync
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HardSyncResume {
    pub sync_id: u64,
    pub timestamp: f64,
    pub is_playing: bool,
}

/// Events sent from server to client
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ServerEvent {
    /// Snapshot handed to a member right after joining
    RoomState {
        video_id: Option<String>,
        is_playing: bool,
        timestamp: f64,
        /// RFC 3339 creation time of the room
        session_start_time: String,
        user_count: usize,
        is_host: bool,
        sync_tolerance: f64,
    },
    /// Host changed the video
    UpdateVideo {
        video_id: String,
        is_playing: bool,
        timestamp: f64,
    },
    SyncUpdate(SyncUpdate),
    HardSyncPrepare(HardSyncPrepare),
    HardSyncResume(HardSyncResume),
    /// Authoritative state, reply to `request-sync`
    ForceSync {
        video_id: Option<String>,
        timestamp: f64,
        is_playing: bool,
    },
    CallRequest {
        caller_id: ConnectionId,
        caller_name: String,
    },
    CallAccepted {
        accepter_id: ConnectionId,
        accepter_name: String,
    },
    CallRejected { rejecter_name: String },
    VcOffer { offer: Value, id: ConnectionId },
    VcAnswer { answer: Value, id: ConnectionId },
    VcIceCandidate { candidate: Value, id: ConnectionId },
    VcEnd { id: ConnectionId },
    VcReconnect { id: ConnectionId },
    /// Disrupted call is flowing again
    VcRecovered,
    /// Disrupted call could not be recovered in time and was ended
    VcRecoveryTimeout,
    UpdateUserCount { count: usize },
    SystemMessage { message: String },
    NewChat {
        sender: String,
        message: String,
        id: ConnectionId,
    },
    /// Error addressed to the requester only
    Error { code: String, message: String },
}

impl ServerEvent {
    /// Wire name of the event, for logs
    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::RoomState { .. } => "room-state",
            ServerEvent::UpdateVideo { .. } => "update-video",
            ServerEvent::SyncUpdate(_) => "sync-update",
            ServerEvent::HardSyncPrepare(_) => "hard-sync-prepare",
            ServerEvent::HardSyncResume(_) => "hard-sync-resume",
            ServerEvent::ForceSync { .. } => "force-sync",
            ServerEvent::CallRequest { .. } => "call-request",
            ServerEvent::CallAccepted { .. } => "call-accepted",
            ServerEvent::CallRejected { .. } => "call-rejected",
            ServerEvent::VcOffer { .. } => "vc-offer",
            ServerEvent::VcAnswer { .. } => "vc-answer",
            ServerEvent::VcIceCandidate { .. } => "vc-ice-candidate",
            ServerEvent::VcEnd { .. } => "vc-end",
            ServerEvent::VcReconnect { .. } => "vc-reconnect",
            ServerEvent::VcRecovered => "vc-recovered",
            ServerEvent::VcRecoveryTimeout => "vc-recovery-timeout",
            ServerEvent::UpdateUserCount { .. } => "update-user-count",
            ServerEvent::SystemMessage { .. } => "system-message",
            ServerEvent::NewChat { .. } => "new-chat",
            ServerEvent::Error { .. } => "error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_client_event_wire_format() {
        let raw = json!({
            "event": "sync-action",
            "data": { "roomId": "abc123", "type": "pause", "timestamp": 42.0, "isPlaying": false }
        });
        let event: ClientEvent = serde_json::from_value(raw).unwrap();
        assert_eq!(
            event,
            ClientEvent::SyncAction {
                room_id: "abc123".to_string(),
                action: PlaybackAction::Pause,
                timestamp: 42.0,
                is_playing: false,
            }
        );
        assert_eq!(event.room_id(), "abc123");
        assert_eq!(event.name(), "sync-action");
    }

    #[test]
    fn test_hard_sync_video_is_optional() {
        let raw = json!({ "event": "hard-sync", "data": { "roomId": "r1", "timestamp": 3.5 } });
        let event: ClientEvent = serde_json::from_value(raw).unwrap();
        assert!(matches!(event, ClientEvent::HardSync { video_id: None, .. }));
    }

    #[test]
    fn test_wrong_types_are_rejected() {
        let raw = json!({
            "event": "sync-action",
            "data": { "roomId": "abc123", "type": "pause", "timestamp": "42", "isPlaying": false }
        });
        assert!(serde_json::from_value::<ClientEvent>(raw).is_err());

        let unknown = json!({ "event": "drop-tables", "data": {} });
        assert!(serde_json::from_value::<ClientEvent>(unknown).is_err());
    }

    #[test]
    fn test_server_event_wire_format() {
        let event = ServerEvent::SyncUpdate(SyncUpdate {
            action: PlaybackAction::Play,
            timestamp: 10.0,
            is_playing: true,
        });
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["event"], "sync-update");
        assert_eq!(value["data"]["type"], "play");
        assert_eq!(value["data"]["isPlaying"], true);

        let count = serde_json::to_value(ServerEvent::UpdateUserCount { count: 2 }).unwrap();
        assert_eq!(count, json!({ "event": "update-user-count", "data": { "count": 2 } }));

        let timeout = serde_json::to_value(ServerEvent::VcRecoveryTimeout).unwrap();
        assert_eq!(timeout["event"], "vc-recovery-timeout");
    }
}
