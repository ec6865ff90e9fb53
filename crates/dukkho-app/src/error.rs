use thiserror::Error;

/// Errors surfaced by the chat client.
///
/// Relay failures (`Status`, `Transport`) end an exchange with the apology
/// turn; store failures are returned to the caller.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("user id must not be empty")]
    EmptyUserId,

    #[error("relay returned HTTP {status}: {message}")]
    Status { status: u16, message: String },

    #[error("relay transport error: {0}")]
    Transport(String),

    #[error("chat {0} not found")]
    ChatNotFound(String),

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}
