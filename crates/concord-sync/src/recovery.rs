//! Store-domain recovery pattern

use concord_core::{CoordinatorError, RecoveryPattern, RecoveryResult};

/// A full store stays full; retrying the same write only delays the error
#[derive(Debug, Default)]
pub struct StoreQuotaRecovery;

impl RecoveryPattern for StoreQuotaRecovery {
    fn name(&self) -> &str {
        "store-quota"
    }

    fn can_handle(&self, error: &CoordinatorError) -> bool {
        matches!(error, CoordinatorError::Storage { message } if message.contains("quota exceeded"))
    }

    fn recover(&self, error: &CoordinatorError) -> RecoveryResult {
        RecoveryResult::give_up(format!("store is full, not retrying: {error}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use concord_core::{RecoveryRegistry, StoreError};

    #[test]
    fn quota_is_not_retried_but_outages_are() {
        let mut registry = RecoveryRegistry::with_builtin_patterns();
        registry.register_first(StoreQuotaRecovery);

        let quota = CoordinatorError::from(StoreError::QuotaExceeded { key: "k".into() });
        assert!(!registry.should_retry(&quota));

        let outage = CoordinatorError::from(StoreError::unavailable("locked"));
        assert!(registry.should_retry(&outage));

        let io = CoordinatorError::from(StoreError::Io("disk".into()));
        assert!(registry.should_retry(&io));
    }
}
