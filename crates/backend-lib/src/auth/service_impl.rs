use async_trait::async_trait;
use uuid::Uuid;

use crate::auth::{HandshakeParams, Identity, IdentityProvider};
use crate::error::AppError;

const MAX_USER_ID_LEN: usize = 128;

/// Trusts `userId` and `name` query parameters.
///
/// Meant to run behind a reverse proxy that has already authenticated the
/// user and rewrites those parameters.
#[derive(Debug, Default, Clone)]
pub struct TrustedQueryIdentity;

impl TrustedQueryIdentity {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl IdentityProvider for TrustedQueryIdentity {
    async fn identify(&self, handshake: &HandshakeParams) -> Result<Identity, AppError> {
        let user_id = handshake
            .get("userId")
            .map(|id| id.trim())
            .filter(|id| !id.is_empty())
            .ok_or_else(|| AppError::InvalidInput("missing userId".to_string()))?;

        if user_id.len() > MAX_USER_ID_LEN {
            return Err(AppError::InvalidInput("userId too long".to_string()));
        }

        let display_name = match handshake.get("name").map(|n| n.trim()) {
            Some(name) if !name.is_empty() => name.to_string(),
            // same fallback as an e-mail login: the local part
            _ => user_id.split('@').next().unwrap_or(user_id).to_string(),
        };

        Ok(Identity {
            user_id: user_id.to_string(),
            display_name,
        })
    }
}

/// Mints a throwaway identity for every connection (development and tests)
#[derive(Debug, Default, Clone)]
pub struct AnonymousIdentity;

impl AnonymousIdentity {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl IdentityProvider for AnonymousIdentity {
    async fn identify(&self, _handshake: &HandshakeParams) -> Result<Identity, AppError> {
        let user_id = Uuid::new_v4().to_string();
        let display_name = format!("Guest-{}", &user_id[..4]);
        Ok(Identity {
            user_id,
            display_name,
        })
    }
}
