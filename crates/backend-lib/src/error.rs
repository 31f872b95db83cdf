// crates/backend-lib/src/error.rs

//! Central error type + Axum integration.
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use syncwatch_common::ServerEvent;
use thiserror::Error;

/// Application error types with error codes and context
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Room capacity reached")]
    ServerBusy,

    #[error("Room is full")]
    RoomFull,

    #[error("Only the host may do this")]
    NotHost,

    #[error("Connection has not joined room {0}")]
    NotInRoom(String),

    #[error("Room closed while handling the request")]
    RoomClosed,

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Rate limit exceeded")]
    RateLimitExceeded,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl AppError {
    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::ServerBusy | AppError::RoomClosed => StatusCode::SERVICE_UNAVAILABLE,
            AppError::RoomFull => StatusCode::CONFLICT,
            AppError::NotHost | AppError::NotInRoom(_) => StatusCode::FORBIDDEN,
            AppError::InvalidInput(_) | AppError::Json(_) => StatusCode::BAD_REQUEST,
            AppError::RateLimitExceeded => StatusCode::TOO_MANY_REQUESTS,
            AppError::Config(_) | AppError::Internal(_) | AppError::Io(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            },
        }
    }

    /// Get the error code for this error
    pub fn error_code(&self) -> &'static str {
        match self {
            AppError::ServerBusy => "ROOM_001",
            AppError::RoomFull => "ROOM_002",
            AppError::RoomClosed => "ROOM_003",
            AppError::NotInRoom(_) => "ROOM_004",
            AppError::NotHost => "HOST_001",
            AppError::InvalidInput(_) => "VAL_001",
            AppError::RateLimitExceeded => "RATE_001",
            AppError::Config(_) => "CFG_001",
            AppError::Internal(_) => "INT_001",
            AppError::Io(_) => "IO_001",
            AppError::Json(_) => "JSON_001",
        }
    }

    /// Message suitable for showing to a participant
    pub fn client_message(&self) -> String {
        match self {
            AppError::ServerBusy => "Server busy, try later.".to_string(),
            AppError::RoomFull => "Room is full.".to_string(),
            AppError::NotHost => "Only host can change video.".to_string(),
            AppError::NotInRoom(_) => "Join the room first.".to_string(),
            AppError::RateLimitExceeded => "Slow down.".to_string(),
            AppError::InvalidInput(_) | AppError::Json(_) => "Invalid request.".to_string(),
            AppError::RoomClosed
            | AppError::Config(_)
            | AppError::Internal(_)
            | AppError::Io(_) => "Something went wrong, try again.".to_string(),
        }
    }

    /// `error` event addressed to the requester
    pub fn to_event(&self) -> ServerEvent {
        ServerEvent::Error {
            code: self.error_code().to_string(),
            message: self.client_message(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let error_code = self.error_code();

        // Use detailed messages in development, sanitized in production
        let message = if cfg!(debug_assertions) {
            self.to_string()
        } else {
            self.client_message()
        };

        let body = serde_json::json!({
            "error": {
                "code": error_code,
                "message": message,
            }
        });

        (status, axum::Json(body)).into_response()
    }
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for AppError {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        AppError::RoomClosed
    }
}

impl From<tokio::sync::oneshot::error::RecvError> for AppError {
    fn from(_: tokio::sync::oneshot::error::RecvError) -> Self {
        AppError::RoomClosed
    }
}

impl From<String> for AppError {
    fn from(msg: String) -> Self {
        AppError::Internal(msg)
    }
}

impl From<&str> for AppError {
    fn from(msg: &str) -> Self {
        AppError::Internal(msg.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use axum::response::IntoResponse;
    use std::io::{Error as IoError, ErrorKind};

    #[test]
    fn test_app_error_display() {
        assert_eq!(AppError::RoomFull.to_string(), "Room is full");
        assert_eq!(
            AppError::InvalidInput("roomId too long".to_string()).to_string(),
            "Invalid input: roomId too long"
        );

        let io_error = AppError::Io(IoError::new(ErrorKind::NotFound, "File not found"));
        assert!(io_error.to_string().contains("IO error"));
    }

    #[test]
    fn test_app_error_status_codes() {
        assert_eq!(AppError::ServerBusy.status_code(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(AppError::RoomFull.status_code(), StatusCode::CONFLICT);
        assert_eq!(AppError::NotHost.status_code(), StatusCode::FORBIDDEN);
        assert_eq!(
            AppError::RateLimitExceeded.status_code(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            AppError::Internal("test".to_string()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_dropped_event_errors() {
        let e = AppError::NotInRoom("abc123".to_string());
        assert_eq!(e.to_string(), "Connection has not joined room abc123");
        assert_eq!(e.error_code(), "ROOM_004");
        assert_eq!(e.status_code(), StatusCode::FORBIDDEN);
        assert_eq!(AppError::RateLimitExceeded.error_code(), "RATE_001");
        assert_eq!(AppError::RateLimitExceeded.client_message(), "Slow down.");
    }

    #[test]
    fn test_client_messages_match_ui_copy() {
        assert_eq!(AppError::RoomFull.client_message(), "Room is full.");
        assert_eq!(AppError::ServerBusy.client_message(), "Server busy, try later.");
        assert_eq!(AppError::NotHost.client_message(), "Only host can change video.");
    }

    #[test]
    fn test_to_event() {
        match AppError::NotHost.to_event() {
            ServerEvent::Error { code, message } => {
                assert_eq!(code, "HOST_001");
                assert_eq!(message, "Only host can change video.");
            },
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn test_error_from_impls() {
        let io_err = IoError::new(ErrorKind::PermissionDenied, "Permission denied");
        let app_err: AppError = io_err.into();
        assert!(matches!(app_err, AppError::Io(_)));

        let json_err: serde_json::Error =
            serde_json::from_str::<serde_json::Value>("invalid json").unwrap_err();
        let app_err: AppError = json_err.into();
        assert!(matches!(app_err, AppError::Json(_)));

        let (tx, rx) = tokio::sync::mpsc::channel::<u8>(1);
        drop(rx);
        let app_err: AppError = tx.blocking_send(1).unwrap_err().into();
        assert!(matches!(app_err, AppError::RoomClosed));

        let app_err: AppError = "boom".into();
        assert!(matches!(app_err, AppError::Internal(_)));
    }

    #[tokio::test]
    async fn test_error_into_response() {
        let response = AppError::RoomFull.into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);
        assert!(response
            .headers()
            .get("content-type")
            .unwrap()
            .to_str()
            .unwrap()
            .contains("application/json"));
    }
}
