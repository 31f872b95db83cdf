// ============================
// crates/backend-lib/src/validation/mod.rs
// ============================
//! Message validation module.
//!
//! Validation is shape-and-size only and deliberately lenient: anything it
//! rejects is dropped by the caller without a reply.

use std::sync::LazyLock;

use regex::Regex;
use syncwatch_common::ClientEvent;
use thiserror::Error;

use crate::config::Limits;

// Regex patterns for validation
static CONTROL_CHARS_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\x00-\x1F\x7F]").expect("static regex"));
static VIDEO_ID_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]+$").expect("static regex"));

/// Possible validation errors
#[derive(Error, Debug, PartialEq)]
pub enum ValidationError {
    #[error("Invalid room ID: {0}")]
    InvalidRoomId(String),

    #[error("Invalid video ID: {0}")]
    InvalidVideoId(String),

    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(f64),

    #[error("Invalid chat message: {0}")]
    InvalidChat(String),

    #[error("Invalid signaling payload: {0}")]
    InvalidPayload(String),

    #[error("Invalid connection ID: {0}")]
    InvalidConnectionId(String),
}

/// Result type for validation operations
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Validate a room ID
pub fn validate_room_id<'a>(room_id: &'a str, limits: &Limits) -> ValidationResult<&'a str> {
    if room_id.is_empty() {
        return Err(ValidationError::InvalidRoomId(
            "Room ID must not be empty".to_string(),
        ));
    }

    if room_id.chars().count() > limits.max_room_id_len {
        return Err(ValidationError::InvalidRoomId(format!(
            "Room ID must be at most {} characters",
            limits.max_room_id_len
        )));
    }

    if CONTROL_CHARS_REGEX.is_match(room_id) {
        return Err(ValidationError::InvalidRoomId(
            "Room ID contains control characters".to_string(),
        ));
    }

    Ok(room_id)
}

/// Validate a video ID
pub fn validate_video_id<'a>(video_id: &'a str, limits: &Limits) -> ValidationResult<&'a str> {
    let len = video_id.len();
    if len < limits.min_video_id_len || len > limits.max_video_id_len {
        return Err(ValidationError::InvalidVideoId(format!(
            "Video ID must be between {} and {} characters",
            limits.min_video_id_len, limits.max_video_id_len
        )));
    }

    if !VIDEO_ID_REGEX.is_match(video_id) {
        return Err(ValidationError::InvalidVideoId(
            "Video ID must contain only alphanumeric characters, '-' and '_'".to_string(),
        ));
    }

    Ok(video_id)
}

/// Validate a playback position in seconds
pub fn validate_timestamp(timestamp: f64) -> ValidationResult<f64> {
    if !timestamp.is_finite() || timestamp < 0.0 {
        return Err(ValidationError::InvalidTimestamp(timestamp));
    }
    Ok(timestamp)
}

/// Validate a chat line and return it HTML-escaped
pub fn validate_chat(message: &str, limits: &Limits) -> ValidationResult<()> {
    if message.trim().is_empty() {
        return Err(ValidationError::InvalidChat(
            "Message must not be empty".to_string(),
        ));
    }

    if message.chars().count() > limits.max_chat_len {
        return Err(ValidationError::InvalidChat(format!(
            "Message must be at most {} characters",
            limits.max_chat_len
        )));
    }

    Ok(())
}

/// Opaque signaling payloads only need to be present
pub fn validate_payload(payload: &serde_json::Value) -> ValidationResult<()> {
    if payload.is_null() {
        return Err(ValidationError::InvalidPayload(
            "Payload must not be null".to_string(),
        ));
    }
    Ok(())
}

/// Validate a peer connection ID named by a client
pub fn validate_connection_id(connection_id: &str) -> ValidationResult<&str> {
    if uuid::Uuid::parse_str(connection_id).is_err() {
        return Err(ValidationError::InvalidConnectionId(
            "Connection ID must be a UUID".to_string(),
        ));
    }
    Ok(connection_id)
}

/// Escape text that is re-broadcast to other participants
pub fn sanitize(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}

/// Normalize a display name supplied by the identity collaborator.
///
/// Empty names fall back to `fallback`; the result is escaped and truncated.
pub fn display_name(raw: &str, fallback: &str, limits: &Limits) -> String {
    let trimmed = raw.trim();
    let base = if trimmed.is_empty() { fallback.trim() } else { trimmed };
    let truncated: String = base
        .chars()
        .filter(|c| !c.is_control())
        .take(limits.max_display_name_len)
        .collect();
    sanitize(&truncated)
}

/// Validate every field of a client event
pub fn validate_client_event(event: &ClientEvent, limits: &Limits) -> ValidationResult<()> {
    validate_room_id(event.room_id(), limits)?;

    match event {
        ClientEvent::ChangeVideo { video_id, .. } => {
            validate_video_id(video_id, limits)?;
        },
        ClientEvent::SyncAction { timestamp, .. } => {
            validate_timestamp(*timestamp)?;
        },
        ClientEvent::HardSync {
            timestamp,
            video_id,
            ..
        } => {
            validate_timestamp(*timestamp)?;
            if let Some(video_id) = video_id {
                validate_video_id(video_id, limits)?;
            }
        },
        ClientEvent::ChatMessage { message, .. } => {
            validate_chat(message, limits)?;
        },
        ClientEvent::CallAccepted { caller_id, .. } | ClientEvent::CallRejected { caller_id, .. } => {
            validate_connection_id(caller_id)?;
        },
        ClientEvent::VcOffer { offer: payload, .. }
        | ClientEvent::VcAnswer {
            answer: payload, ..
        }
        | ClientEvent::VcIceCandidate {
            candidate: payload,
            ..
        } => {
            validate_payload(payload)?;
        },
        ClientEvent::Join { .. }
        | ClientEvent::RequestSync { .. }
        | ClientEvent::CallUser { .. }
        | ClientEvent::VcEnd { .. }
        | ClientEvent::VcReconnect { .. }
        | ClientEvent::VcConnectionState { .. } => {},
    }

    Ok(())
}
