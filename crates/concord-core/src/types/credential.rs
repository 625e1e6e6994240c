//! Credential issued by the identity provider
//!
//! Owned exclusively by the session lifecycle manager. Only the derived expiry
//! and subject identity ever leave that manager, via [`AuthSnapshot`].
//!
//! [`AuthSnapshot`]: super::AuthSnapshot

use serde::{Deserialize, Serialize};
use std::fmt;

/// Subject claims embedded in a credential
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubjectClaims {
    /// Stable subject identifier
    pub id: String,
    /// Subject email address
    pub email: String,
    /// Account creation time (epoch ms)
    pub created_at_ms: i64,
    /// Last account update time (epoch ms)
    pub updated_at_ms: i64,
}

impl fmt::Debug for SubjectClaims {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubjectClaims")
            .field("id", &self.id)
            .field("email", &"<redacted>")
            .field("created_at_ms", &self.created_at_ms)
            .field("updated_at_ms", &self.updated_at_ms)
            .finish()
    }
}

/// Access + optional refresh token pair with expiry metadata
///
/// Replaced wholesale on refresh; never mutated field by field.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    /// JWT-shaped access token (`header.payload.signature`)
    pub access_token: String,
    /// Refresh token, if the provider issued one
    pub refresh_token: Option<String>,
    /// Stated absolute expiry (epoch ms)
    pub expires_at_ms: i64,
    /// Stated lifetime in seconds, as reported by the provider
    pub expires_in_secs: Option<i64>,
    /// Issue time (epoch ms)
    pub issued_at_ms: i64,
    /// Embedded subject
    pub subject: SubjectClaims,
}

impl Credential {
    /// Milliseconds until expiry relative to `now_ms` (negative once expired)
    pub fn time_until_expiry_ms(&self, now_ms: i64) -> i64 {
        self.expires_at_ms.saturating_sub(now_ms)
    }

    /// Whether the credential is still inside its own validity window
    pub fn is_live(&self, now_ms: i64) -> bool {
        self.expires_at_ms > now_ms
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("access_token", &"<redacted>")
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "<redacted>"),
            )
            .field("expires_at_ms", &self.expires_at_ms)
            .field("expires_in_secs", &self.expires_in_secs)
            .field("issued_at_ms", &self.issued_at_ms)
            .field("subject", &self.subject)
            .finish()
    }
}
