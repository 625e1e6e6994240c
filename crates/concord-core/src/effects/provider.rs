//! Identity provider interface
//!
//! The provider issues and verifies credentials. Concord only consumes its
//! refresh capability, its view of the current session, and its out-of-band
//! event stream.

use crate::errors::{CoordinatorError, ErrorClass};
use crate::types::Credential;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Errors returned by the identity provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum ProviderError {
    /// Request never reached the provider or the connection dropped
    #[error("network failure: {message}")]
    Network {
        /// Transport detail
        message: String,
    },
    /// Provider rejected the credential (expired or revoked refresh token)
    #[error("credential rejected: {message}")]
    Unauthorized {
        /// Provider detail
        message: String,
    },
    /// Provider is up but not serving (5xx, maintenance)
    #[error("provider unavailable: {message}")]
    Unavailable {
        /// Provider detail
        message: String,
    },
    /// Provider answered with something that is not a credential
    #[error("invalid provider response: {message}")]
    InvalidResponse {
        /// Parse or shape detail
        message: String,
    },
}

impl ProviderError {
    /// Create a network error
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    /// Create an unauthorized error
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Unauthorized {
            message: message.into(),
        }
    }

    /// Create an unavailable error
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }

    /// Classify within the coordinator taxonomy
    pub fn class(&self) -> ErrorClass {
        CoordinatorError::from(self.clone()).class()
    }
}

impl From<ProviderError> for CoordinatorError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::Network { message } => CoordinatorError::network(message),
            ProviderError::Unauthorized { message } => CoordinatorError::authentication(message),
            ProviderError::Unavailable { message } => CoordinatorError::unavailable(message),
            ProviderError::InvalidResponse { message } => CoordinatorError::corruption(message),
        }
    }
}

/// Out-of-band credential changes pushed by the provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderEvent {
    /// Provider-initiated sign-out (revocation, sign-out elsewhere)
    SignedOut,
    /// Provider replaced the credential without a local refresh
    CredentialChanged(Credential),
}

/// Identity provider capabilities consumed by the session lifecycle manager
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Exchange the current refresh token for a new credential
    async fn refresh_credential(&self) -> Result<Credential, ProviderError>;

    /// Credential the provider currently considers active, if any
    async fn current_session(&self) -> Result<Option<Credential>, ProviderError>;

    /// Stream of out-of-band changes; `None` if the provider has none
    fn events(&self) -> Option<broadcast::Receiver<ProviderEvent>> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_errors_classify() {
        assert_eq!(ProviderError::network("x").class(), ErrorClass::Transient);
        assert_eq!(ProviderError::unavailable("x").class(), ErrorClass::Transient);
        assert_eq!(
            ProviderError::unauthorized("x").class(),
            ErrorClass::Authentication
        );
        assert_eq!(
            ProviderError::InvalidResponse {
                message: "x".into()
            }
            .class(),
            ErrorClass::Corruption
        );
    }
}
