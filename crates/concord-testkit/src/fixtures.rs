//! Credential fixtures

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use concord_core::{Credential, SubjectClaims};
use std::time::Duration;

/// Three base64url segments shaped like a signed JWT
pub fn jwt_like_token(subject: &str, issued_at_ms: i64, expires_at_ms: i64) -> String {
    let header = serde_json::json!({ "alg": "HS256", "typ": "JWT" });
    let claims = serde_json::json!({
        "sub": subject,
        "iat": issued_at_ms / 1_000,
        "exp": expires_at_ms / 1_000,
    });
    format!(
        "{}.{}.{}",
        URL_SAFE_NO_PAD.encode(header.to_string()),
        URL_SAFE_NO_PAD.encode(claims.to_string()),
        URL_SAFE_NO_PAD.encode(format!("sig-{subject}-{issued_at_ms}")),
    )
}

/// Well-formed credential for `subject`, issued at `now_ms`, valid for `ttl`
pub fn credential_for(subject: &str, now_ms: i64, ttl: Duration) -> Credential {
    let ttl_ms = ttl.as_millis() as i64;
    let expires_at_ms = now_ms + ttl_ms;
    Credential {
        access_token: jwt_like_token(subject, now_ms, expires_at_ms),
        refresh_token: Some(format!("refresh-{subject}-{now_ms}")),
        expires_at_ms,
        expires_in_secs: Some(ttl_ms / 1_000),
        issued_at_ms: now_ms,
        subject: SubjectClaims {
            id: subject.to_string(),
            email: format!("{subject}@example.com"),
            created_at_ms: now_ms - 86_400_000,
            updated_at_ms: now_ms - 3_600_000,
        },
    }
}

/// Install a test-writer subscriber honouring `RUST_LOG`; safe to call twice
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
