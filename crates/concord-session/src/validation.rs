//! Credential validation
//!
//! Three independent checks, all reported together, plus a corruption scan:
//!
//! | check | fails when |
//! |---|---|
//! | token integrity | access token is not three non-empty base64url segments |
//! | subject consistency | empty id, malformed email, or created after updated |
//! | expiration validity | already expired, or expires beyond the horizon |
//! | corruption scan | stated expires-at disagrees with issued-at + expires-in |
//!
//! An expiry beyond the horizon counts as corruption as well: no provider
//! issues credentials that long-lived.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use concord_core::{Credential, SessionConfig};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

static EMAIL: Lazy<Regex> = Lazy::new(|| {
    #[allow(clippy::unwrap_used)]
    Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").unwrap()
});

/// Outcome of validating a credential
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    /// Access token has a well-formed three-part structure
    pub token_integrity: bool,
    /// Subject claims are complete and coherent
    pub subject_consistency: bool,
    /// Expiry is in the future and within the horizon
    pub expiration_validity: bool,
    /// Fields contradict each other in a way no provider would produce
    pub corruption_detected: bool,
    /// Human readable failures, in check order
    pub issues: Vec<String>,
}

impl ValidationResult {
    /// Result when there is no credential at all
    pub fn no_session() -> Self {
        Self {
            token_integrity: false,
            subject_consistency: false,
            expiration_validity: false,
            corruption_detected: false,
            issues: vec!["no active session".to_string()],
        }
    }

    /// Every check passed
    pub fn is_valid(&self) -> bool {
        self.token_integrity
            && self.subject_consistency
            && self.expiration_validity
            && !self.corruption_detected
    }

    /// Failure requires terminating the session
    pub fn is_corrupted(&self) -> bool {
        !self.token_integrity || !self.subject_consistency || self.corruption_detected
    }
}

/// Check that `token` is three non-empty base64url segments
pub fn validate_token_structure(token: &str) -> Result<(), String> {
    let segments: Vec<&str> = token.split('.').collect();
    if segments.len() != 3 {
        return Err(format!(
            "access token has {} segments, expected 3",
            segments.len()
        ));
    }
    for (index, segment) in segments.iter().enumerate() {
        if segment.is_empty() {
            return Err(format!("access token segment {index} is empty"));
        }
        if URL_SAFE_NO_PAD.decode(segment).is_err() {
            return Err(format!("access token segment {index} is not base64url"));
        }
    }
    Ok(())
}

/// Run every check against `credential` at `now_ms`
pub fn validate_credential(
    credential: &Credential,
    now_ms: i64,
    config: &SessionConfig,
) -> ValidationResult {
    let mut issues = Vec::new();

    let token_integrity = match validate_token_structure(&credential.access_token) {
        Ok(()) => true,
        Err(issue) => {
            issues.push(issue);
            false
        }
    };

    let subject = &credential.subject;
    let mut subject_consistency = true;
    if subject.id.trim().is_empty() {
        issues.push("subject id is empty".to_string());
        subject_consistency = false;
    }
    if !EMAIL.is_match(&subject.email) {
        issues.push("subject email is malformed".to_string());
        subject_consistency = false;
    }
    if subject.created_at_ms > subject.updated_at_ms {
        issues.push("subject created after its last update".to_string());
        subject_consistency = false;
    }

    let mut corruption_detected = false;
    let remaining_ms = credential.expires_at_ms.saturating_sub(now_ms);
    let horizon_ms = config.max_expiry_horizon_ms as i64;
    let expiration_validity = if remaining_ms <= 0 {
        issues.push("credential has expired".to_string());
        false
    } else if remaining_ms > horizon_ms {
        issues.push(format!(
            "credential expires {remaining_ms}ms from now, beyond the {horizon_ms}ms horizon"
        ));
        corruption_detected = true;
        false
    } else {
        true
    };

    if let Some(expires_in_secs) = credential.expires_in_secs {
        let stated = credential
            .issued_at_ms
            .saturating_add(expires_in_secs.saturating_mul(1_000));
        let drift = stated.abs_diff(credential.expires_at_ms);
        if drift > config.expiry_tolerance_ms {
            issues.push(format!(
                "expires-at and expires-in disagree by {drift}ms"
            ));
            corruption_detected = true;
        }
    }

    ValidationResult {
        token_integrity,
        subject_consistency,
        expiration_validity,
        corruption_detected,
        issues,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use concord_testkit::credential_for;
    use std::time::Duration;

    const NOW: i64 = 1_700_000_000_000;

    fn config() -> SessionConfig {
        SessionConfig::default()
    }

    #[test]
    fn well_formed_credential_passes() {
        let credential = credential_for("u1", NOW, Duration::from_secs(3_600));
        let result = validate_credential(&credential, NOW, &config());
        assert!(result.is_valid(), "{:?}", result.issues);
        assert!(!result.is_corrupted());
    }

    #[test]
    fn two_segment_token_fails_integrity() {
        let mut credential = credential_for("u1", NOW, Duration::from_secs(3_600));
        credential.access_token = "abc.def".to_string();

        let result = validate_credential(&credential, NOW, &config());
        assert!(!result.token_integrity);
        assert!(!result.is_valid());
        assert!(result.is_corrupted());
        assert!(result.subject_consistency);
        assert!(result.expiration_validity);
    }

    #[test]
    fn empty_or_non_base64_segments_fail() {
        assert!(validate_token_structure("a..c").is_err());
        assert!(validate_token_structure("a.b+c.d").is_err());
        assert!(validate_token_structure("YQ.Yg.Yw").is_ok());
    }

    #[test]
    fn subject_checks_are_reported_together() {
        let mut credential = credential_for("u1", NOW, Duration::from_secs(3_600));
        credential.subject.id = String::new();
        credential.subject.email = "not-an-email".to_string();
        credential.subject.created_at_ms = credential.subject.updated_at_ms + 1;

        let result = validate_credential(&credential, NOW, &config());
        assert!(!result.subject_consistency);
        assert!(result.token_integrity);
        assert_eq!(result.issues.len(), 3);
    }

    #[test]
    fn expired_credential_is_invalid_but_not_corrupted() {
        let credential = credential_for("u1", NOW - 7_200_000, Duration::from_secs(3_600));
        let result = validate_credential(&credential, NOW, &config());
        assert!(!result.expiration_validity);
        assert!(!result.is_valid());
        assert!(!result.is_corrupted());
    }

    #[test]
    fn expiry_beyond_horizon_is_corruption() {
        let credential = credential_for("u1", NOW, Duration::from_secs(25 * 3_600));
        let result = validate_credential(&credential, NOW, &config());
        assert!(!result.expiration_validity);
        assert!(result.corruption_detected);
    }

    #[test]
    fn expires_in_mismatch_is_corruption() {
        let mut credential = credential_for("u1", NOW, Duration::from_secs(3_600));
        credential.expires_at_ms += 61_000;
        let result = validate_credential(&credential, NOW, &config());
        assert!(result.corruption_detected);
        assert!(result.expiration_validity);

        // Within tolerance.
        let mut credential = credential_for("u1", NOW, Duration::from_secs(3_600));
        credential.expires_at_ms += 59_000;
        assert!(validate_credential(&credential, NOW, &config()).is_valid());
    }
}
