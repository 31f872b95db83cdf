use std::collections::HashMap;

use async_trait::async_trait;

use crate::error::AppError;

/// Query parameters presented with the WebSocket upgrade
pub type HandshakeParams = HashMap<String, String>;

/// Authenticated participant identity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    /// Durable id; survives reconnects and keys the host privilege
    pub user_id: String,
    pub display_name: String,
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Resolve the handshake into an identity, or refuse the connection
    async fn identify(&self, handshake: &HandshakeParams) -> Result<Identity, AppError>;
}
