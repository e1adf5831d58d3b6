use thiserror::Error;

/// Common error types for Dark Messenger
#[derive(Debug, Error)]
pub enum DarkMsgError {
    #[error("Binary staging failed: {0}")]
    Staging(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to spawn Tor: {0}")]
    Spawn(String),

    #[error("Hidden service error: {0}")]
    HiddenService(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Result type for Dark Messenger operations
pub type Result<T> = std::result::Result<T, DarkMsgError>;

impl DarkMsgError {
    pub fn staging(msg: impl Into<String>) -> Self {
        Self::Staging(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn spawn(msg: impl Into<String>) -> Self {
        Self::Spawn(msg.into())
    }

    pub fn hidden_service(msg: impl Into<String>) -> Self {
        Self::HiddenService(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}
