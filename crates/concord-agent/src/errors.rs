//! Runtime errors

use concord_core::{ConfigError, CoordinatorError};
use concord_session::SessionError;
use thiserror::Error;

/// Result type for runtime operations
pub type Result<T> = std::result::Result<T, AgentError>;

/// Errors surfaced by [`AuthRuntime`](crate::AuthRuntime) and its builder
#[derive(Debug, Error)]
pub enum AgentError {
    /// Builder was missing a required collaborator or got bad settings
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration file or overrides could not be loaded
    #[error("Configuration load failed: {0}")]
    ConfigLoad(#[from] ConfigError),

    /// Session operation failed
    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    /// Runtime was already shut down
    #[error("Runtime has been shut down")]
    ShutDown,
}

impl AgentError {
    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }
}

impl From<AgentError> for CoordinatorError {
    fn from(err: AgentError) -> Self {
        match err {
            AgentError::Session(inner) => inner.into(),
            AgentError::Config(message) => CoordinatorError::invalid(message),
            AgentError::ConfigLoad(inner) => CoordinatorError::invalid(inner.to_string()),
            AgentError::ShutDown => CoordinatorError::internal("runtime has been shut down"),
        }
    }
}
