//! Configuration for every Concord service
//!
//! Durations are stored as integer milliseconds so the TOML form stays flat:
//!
//! ```toml
//! [sync]
//! poll_interval_ms = 1000
//!
//! [session]
//! refresh_threshold_ms = 1800000
//!
//! [dispatch]
//! transition_policy = "fail-open"
//! ```
//!
//! Environment overrides use the `CONCORD_<SECTION>_<FIELD>` naming scheme,
//! e.g. `CONCORD_SESSION_REFRESH_TIMEOUT_MS=5000`.

use crate::reliability::{BackoffStrategy, RetryPolicy};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

const ENV_PREFIX: &str = "CONCORD_";

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// File could not be read
    #[error("failed to read config file {path}: {source}")]
    Read {
        /// Path that was read
        path: String,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },
    /// TOML did not match the schema
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
    /// Environment override could not be applied
    #[error("invalid value {value:?} for {key}")]
    InvalidOverride {
        /// Environment variable name
        key: String,
        /// Offending value
        value: String,
    },
    /// Values parsed but are inconsistent
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// What the dispatcher does with a structurally impossible transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransitionPolicy {
    /// Log a warning and deliver anyway
    #[default]
    FailOpen,
    /// Log a warning and drop the update
    FailClosed,
}

/// State synchronizer settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Durable store key holding the serialized snapshot
    pub storage_key: String,
    /// Safety-net `refresh_from_store` interval
    pub poll_interval_ms: u64,
    /// Version distance beyond which two snapshots conflict
    pub max_version_gap: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            storage_key: "concord.auth.snapshot".to_string(),
            poll_interval_ms: 1_000,
            max_version_gap: 10,
        }
    }
}

impl SyncConfig {
    /// Safety-net polling interval
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Session lifecycle manager settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Refresh once less than this much validity is left
    pub refresh_threshold_ms: u64,
    /// Budget for a whole refresh, retries included
    pub refresh_timeout_ms: u64,
    /// Periodic session check interval
    pub check_interval_ms: u64,
    /// Emit `session-warning` once less than this much validity is left
    pub warning_window_ms: u64,
    /// Credentials expiring further out than this are treated as forged
    pub max_expiry_horizon_ms: u64,
    /// Allowed disagreement between stated expires-at and expires-in
    pub expiry_tolerance_ms: u64,
    /// Consecutive refresh timeouts before the session is treated as corrupted
    pub timeout_escalation_threshold: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            refresh_threshold_ms: 30 * 60 * 1_000,
            refresh_timeout_ms: 10_000,
            check_interval_ms: 5 * 60 * 1_000,
            warning_window_ms: 10 * 60 * 1_000,
            max_expiry_horizon_ms: 24 * 60 * 60 * 1_000,
            expiry_tolerance_ms: 60_000,
            timeout_escalation_threshold: 2,
        }
    }
}

impl SessionConfig {
    /// Refresh lead time
    pub fn refresh_threshold(&self) -> Duration {
        Duration::from_millis(self.refresh_threshold_ms)
    }

    /// Refresh budget
    pub fn refresh_timeout(&self) -> Duration {
        Duration::from_millis(self.refresh_timeout_ms)
    }

    /// Periodic check interval
    pub fn check_interval(&self) -> Duration {
        Duration::from_millis(self.check_interval_ms)
    }

    /// Expiry warning window
    pub fn warning_window(&self) -> Duration {
        Duration::from_millis(self.warning_window_ms)
    }
}

/// Update dispatcher settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Coalescing window for non-critical updates (one display frame)
    pub batch_window_ms: u64,
    /// Dispatches slower than this are logged as performance warnings
    pub slow_dispatch_ms: u64,
    /// Number of recent dispatches in the rolling latency average
    pub latency_window: usize,
    /// Handling of structurally impossible transitions
    pub transition_policy: TransitionPolicy,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            batch_window_ms: 16,
            slow_dispatch_ms: 100,
            latency_window: 100,
            transition_policy: TransitionPolicy::FailOpen,
        }
    }
}

impl DispatchConfig {
    /// Coalescing window
    pub fn batch_window(&self) -> Duration {
        Duration::from_millis(self.batch_window_ms)
    }

    /// Slow dispatch threshold
    pub fn slow_dispatch(&self) -> Duration {
        Duration::from_millis(self.slow_dispatch_ms)
    }
}

/// Retry settings for provider and store calls
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Delay before the first retry
    pub base_delay_ms: u64,
    /// Cap for any single delay
    pub max_delay_ms: u64,
    /// Jitter fraction in `[0, 1]`
    pub jitter: f64,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 500,
            max_delay_ms: 8_000,
            jitter: 0.1,
        }
    }
}

impl RecoveryConfig {
    /// Exponential retry policy built from these settings
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            strategy: BackoffStrategy::Exponential,
            jitter: self.jitter.clamp(0.0, 1.0),
        }
    }
}

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// State synchronizer
    pub sync: SyncConfig,
    /// Session lifecycle manager
    pub session: SessionConfig,
    /// Update dispatcher
    pub dispatch: DispatchConfig,
    /// Retry settings for fallible edges
    pub recovery: RecoveryConfig,
}

impl CoordinatorConfig {
    /// Short intervals for tests
    pub fn for_testing() -> Self {
        Self {
            sync: SyncConfig {
                poll_interval_ms: 50,
                ..SyncConfig::default()
            },
            session: SessionConfig {
                refresh_timeout_ms: 1_000,
                check_interval_ms: 100,
                ..SessionConfig::default()
            },
            dispatch: DispatchConfig::default(),
            recovery: RecoveryConfig {
                max_retries: 2,
                base_delay_ms: 10,
                max_delay_ms: 50,
                jitter: 0.0,
            },
        }
    }

    /// Parse from a TOML document; missing sections keep their defaults
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML file
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }

    /// Apply `CONCORD_*` overrides from the process environment
    pub fn merge_with_env(&mut self) -> Result<(), ConfigError> {
        self.merge_with_vars(std::env::vars())
    }

    /// Apply `CONCORD_*` overrides from an explicit variable list
    pub fn merge_with_vars<I, K, V>(&mut self, vars: I) -> Result<(), ConfigError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        for (key, value) in vars {
            let key = key.as_ref();
            let Some(name) = key.strip_prefix(ENV_PREFIX) else {
                continue;
            };
            self.set_from_string(&name.to_ascii_lowercase(), value.as_ref())
                .map_err(|_| ConfigError::InvalidOverride {
                    key: key.to_string(),
                    value: value.as_ref().to_string(),
                })?;
        }
        self.validate()
    }

    /// Set one field from its `section_field` name
    pub fn set_from_string(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        fn num<T: std::str::FromStr>(value: &str) -> Result<T, ConfigError> {
            value
                .trim()
                .parse()
                .map_err(|_| ConfigError::Invalid(format!("not a number: {value}")))
        }

        match key {
            "sync_storage_key" => self.sync.storage_key = value.to_string(),
            "sync_poll_interval_ms" => self.sync.poll_interval_ms = num(value)?,
            "sync_max_version_gap" => self.sync.max_version_gap = num(value)?,
            "session_refresh_threshold_ms" => self.session.refresh_threshold_ms = num(value)?,
            "session_refresh_timeout_ms" => self.session.refresh_timeout_ms = num(value)?,
            "session_check_interval_ms" => self.session.check_interval_ms = num(value)?,
            "session_warning_window_ms" => self.session.warning_window_ms = num(value)?,
            "session_max_expiry_horizon_ms" => self.session.max_expiry_horizon_ms = num(value)?,
            "session_expiry_tolerance_ms" => self.session.expiry_tolerance_ms = num(value)?,
            "session_timeout_escalation_threshold" => {
                self.session.timeout_escalation_threshold = num(value)?;
            }
            "dispatch_batch_window_ms" => self.dispatch.batch_window_ms = num(value)?,
            "dispatch_slow_dispatch_ms" => self.dispatch.slow_dispatch_ms = num(value)?,
            "dispatch_latency_window" => self.dispatch.latency_window = num(value)?,
            "dispatch_transition_policy" => {
                self.dispatch.transition_policy = match value.trim() {
                    "fail-open" => TransitionPolicy::FailOpen,
                    "fail-closed" => TransitionPolicy::FailClosed,
                    other => {
                        return Err(ConfigError::Invalid(format!(
                            "unknown transition policy {other}"
                        )))
                    }
                };
            }
            "recovery_max_retries" => self.recovery.max_retries = num(value)?,
            "recovery_base_delay_ms" => self.recovery.base_delay_ms = num(value)?,
            "recovery_max_delay_ms" => self.recovery.max_delay_ms = num(value)?,
            "recovery_jitter" => self.recovery.jitter = num(value)?,
            other => return Err(ConfigError::Invalid(format!("unknown key {other}"))),
        }
        Ok(())
    }

    /// Check cross-field consistency
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sync.storage_key.trim().is_empty() {
            return Err(ConfigError::Invalid("sync.storage_key is empty".into()));
        }
        if self.sync.poll_interval_ms == 0 || self.session.check_interval_ms == 0 {
            return Err(ConfigError::Invalid("intervals must be non-zero".into()));
        }
        if self.session.warning_window_ms > self.session.max_expiry_horizon_ms {
            return Err(ConfigError::Invalid(
                "session.warning_window_ms exceeds max_expiry_horizon_ms".into(),
            ));
        }
        if self.session.timeout_escalation_threshold == 0 {
            return Err(ConfigError::Invalid(
                "session.timeout_escalation_threshold must be at least 1".into(),
            ));
        }
        if self.dispatch.latency_window == 0 {
            return Err(ConfigError::Invalid(
                "dispatch.latency_window must be non-zero".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.recovery.jitter) {
            return Err(ConfigError::Invalid("recovery.jitter must be in [0, 1]".into()));
        }
        if self.recovery.base_delay_ms > self.recovery.max_delay_ms {
            return Err(ConfigError::Invalid(
                "recovery.base_delay_ms exceeds max_delay_ms".into(),
            ));
        }
        Ok(())
    }
}
