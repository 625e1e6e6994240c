//! Runtime builder

use crate::errors::{AgentError, Result};
use crate::runtime::AuthRuntime;
use concord_core::{
    ContextChannel, ContextId, CoordinatorConfig, DurableStore, IdentityProvider, PhysicalClock,
    RecoveryPattern, RecoveryRegistry,
};
use concord_effects::{MemoryChannelHub, MemoryStore, SystemClock};
use std::path::Path;
use std::sync::Arc;
use tracing::warn;

/// Builder for [`AuthRuntime`]
///
/// Only the identity provider is required. Without a store or channel the
/// runtime gets private in-memory ones, which is only useful for a single
/// context.
pub struct AuthRuntimeBuilder {
    config: CoordinatorConfig,
    context_id: Option<ContextId>,
    store: Option<Arc<dyn DurableStore>>,
    channel: Option<Arc<dyn ContextChannel>>,
    provider: Option<Arc<dyn IdentityProvider>>,
    clock: Option<Arc<dyn PhysicalClock>>,
    recovery: RecoveryRegistry,
}

impl AuthRuntimeBuilder {
    /// Create a builder with default configuration and built-in recovery patterns
    pub fn new() -> Self {
        Self {
            config: CoordinatorConfig::default(),
            context_id: None,
            store: None,
            channel: None,
            provider: None,
            clock: None,
            recovery: RecoveryRegistry::with_builtin_patterns(),
        }
    }

    /// Set the configuration
    pub fn with_config(mut self, config: CoordinatorConfig) -> Self {
        self.config = config;
        self
    }

    /// Load configuration from a TOML file, then apply `CONCORD_*` overrides
    pub fn with_config_file(mut self, path: &Path) -> Result<Self> {
        let mut config = CoordinatorConfig::load_from_file(path)?;
        config.merge_with_env()?;
        self.config = config;
        Ok(self)
    }

    /// Set the context identifier (random by default)
    pub fn with_context_id(mut self, context_id: ContextId) -> Self {
        self.context_id = Some(context_id);
        self
    }

    /// Set the durable store shared by every context of the origin
    pub fn with_store(mut self, store: Arc<dyn DurableStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Set the broadcast channel shared by every context of the origin
    pub fn with_channel(mut self, channel: Arc<dyn ContextChannel>) -> Self {
        self.channel = Some(channel);
        self
    }

    /// Set the identity provider
    pub fn with_provider(mut self, provider: Arc<dyn IdentityProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Set the wall clock
    pub fn with_clock(mut self, clock: Arc<dyn PhysicalClock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Add a recovery pattern, checked before the built-in ones
    pub fn with_recovery_pattern(mut self, pattern: impl RecoveryPattern + 'static) -> Self {
        self.recovery.register_first(pattern);
        self
    }

    /// Build the runtime; nothing runs until [`AuthRuntime::start`]
    pub fn build(self) -> Result<AuthRuntime> {
        let provider = self
            .provider
            .ok_or_else(|| AgentError::config("identity provider required"))?;
        self.config
            .validate()
            .map_err(|err| AgentError::config(err.to_string()))?;

        let store = self.store.unwrap_or_else(|| {
            warn!("no durable store configured, state will not survive a restart");
            Arc::new(MemoryStore::new())
        });
        let channel = self.channel.unwrap_or_else(|| {
            warn!("no broadcast channel configured, other contexts will not be notified");
            Arc::new(MemoryChannelHub::new().endpoint())
        });
        let clock = self
            .clock
            .unwrap_or_else(|| Arc::new(SystemClock::new()));

        Ok(AuthRuntime::assemble(
            self.config,
            self.context_id.unwrap_or_default(),
            store,
            channel,
            provider,
            clock,
            self.recovery,
        ))
    }
}

impl Default for AuthRuntimeBuilder {
    fn default() -> Self {
        Self::new()
    }
}
