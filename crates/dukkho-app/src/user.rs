// Signed-in identity. Stands in for the hosted auth provider: the only thing
// the rest of the client needs from it is an opaque user id.

use std::sync::Arc;

use tracing::info;

use dukkho_core::db::Database;

use crate::error::ClientError;
use crate::relay_client::RelayClient;
use crate::session::ChatSession;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserContext {
    user_id: String,
}

impl UserContext {
    pub fn sign_in(user_id: impl Into<String>) -> Result<Self, ClientError> {
        let user_id = user_id.into();
        if user_id.trim().is_empty() {
            return Err(ClientError::EmptyUserId);
        }
        info!(%user_id, "signed in");
        Ok(Self { user_id })
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Start a chat session owned by this user. The session starts with no
    /// active chat.
    pub fn open_session(self, db: Arc<Database>, relay: RelayClient) -> ChatSession {
        ChatSession::new(self, db, relay)
    }

    pub fn sign_out(self) {
        info!(user_id = %self.user_id, "signed out");
    }
}
