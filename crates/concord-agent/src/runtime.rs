//! Auth runtime
//!
//! One [`AuthRuntime`] per execution context. It owns the three services and
//! the wiring between them:
//!
//! ```text
//! SessionLifecycleManager ──snapshot──▶ StateSynchronizer ──observer──┐
//!          │                                                          ▼
//!          └────────────lifecycle events (EventBus)──────────▶ StateBridge ──▶ UpdateDispatcher
//! ```

use crate::bridge::StateBridge;
use crate::errors::{AgentError, Result};
use concord_core::{
    AuthEvent, AuthSnapshot, ContextChannel, ContextId, CoordinatorConfig, Credential,
    DurableStore, EventBus, EventSubscription, IdentityProvider, PhysicalClock, RecoveryRegistry,
};
use concord_dispatch::{AuthState, SubscribeOptions, SubscriptionHandle, UpdateDispatcher};
use concord_effects::TaskRegistry;
use concord_session::SessionLifecycleManager;
use concord_sync::StateSynchronizer;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

struct RuntimeInner {
    context_id: ContextId,
    sync: StateSynchronizer,
    session: SessionLifecycleManager,
    dispatcher: UpdateDispatcher,
    events: EventBus<AuthEvent>,
    bridge: Arc<StateBridge>,
    tasks: TaskRegistry,
    event_subscription: Mutex<Option<EventSubscription>>,
    started: AtomicBool,
    shut_down: AtomicBool,
}

/// Client-side auth coordinator for one execution context
///
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct AuthRuntime {
    inner: Arc<RuntimeInner>,
}

impl AuthRuntime {
    pub(crate) fn assemble(
        config: CoordinatorConfig,
        context_id: ContextId,
        store: Arc<dyn DurableStore>,
        channel: Arc<dyn ContextChannel>,
        provider: Arc<dyn IdentityProvider>,
        clock: Arc<dyn PhysicalClock>,
        recovery: RecoveryRegistry,
    ) -> Self {
        let events = EventBus::new();
        let retry = config.recovery.retry_policy();

        let sync = StateSynchronizer::new(
            context_id,
            config.sync.clone(),
            store,
            channel,
            clock.clone(),
            events.clone(),
            retry.clone(),
            recovery.clone(),
        );
        let session = SessionLifecycleManager::new(
            config.session.clone(),
            provider,
            sync.clone(),
            clock,
            events.clone(),
            retry,
            recovery,
        );
        let dispatcher = UpdateDispatcher::new(config.dispatch.clone());

        let bridge = Arc::new(StateBridge::new(dispatcher.clone()));
        let observer = bridge.clone();
        sync.add_observer(Arc::new(move |snapshot: &AuthSnapshot| {
            observer.on_snapshot(snapshot);
        }));
        let listener = bridge.clone();
        let subscription = events.subscribe(move |event: &AuthEvent| listener.on_event(event));

        Self {
            inner: Arc::new(RuntimeInner {
                context_id,
                sync,
                session,
                dispatcher,
                events,
                bridge,
                tasks: TaskRegistry::new(),
                event_subscription: Mutex::new(Some(subscription)),
                started: AtomicBool::new(false),
                shut_down: AtomicBool::new(false),
            }),
        }
    }

    // -------------------------------------------------------------------------
    // Lifecycle
    // -------------------------------------------------------------------------

    /// Join the origin's shared state and resolve the current session
    ///
    /// Provider failures during startup do not fail `start`; they show up as
    /// the `error` of the returned state. Calling `start` twice is a no-op.
    pub async fn start(&self) -> Result<AuthState> {
        if self.inner.shut_down.load(Ordering::SeqCst) {
            return Err(AgentError::ShutDown);
        }
        if self.inner.started.swap(true, Ordering::SeqCst) {
            return Ok(self.current_state());
        }

        self.inner.sync.start(&self.inner.tasks).await;
        if let Err(err) = self.inner.session.initialize().await {
            warn!(context_id = %self.inner.context_id, error = %err, "session initialization failed");
        }
        self.inner.bridge.settle();

        let state = self.current_state();
        info!(
            context_id = %self.inner.context_id,
            authenticated = state.is_authenticated(),
            "auth runtime started"
        );
        Ok(state)
    }

    /// Stop every background task; pending dispatcher updates are delivered first
    pub fn shutdown(&self) {
        if self.inner.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner.session.cleanup();
        self.inner.tasks.shutdown();
        if let Some(subscription) = self.inner.event_subscription.lock().take() {
            self.inner.events.unsubscribe(subscription);
        }
        self.inner.dispatcher.flush();
        info!(context_id = %self.inner.context_id, "auth runtime shut down");
    }

    // -------------------------------------------------------------------------
    // UI surface
    // -------------------------------------------------------------------------

    /// Subscribe to state changes; called at once with the current state
    pub fn subscribe<F>(&self, callback: F, options: SubscribeOptions) -> SubscriptionHandle
    where
        F: Fn(&AuthState) + Send + Sync + 'static,
    {
        self.inner.dispatcher.subscribe(callback, options)
    }

    /// Latest state, including updates still waiting for their batch window
    pub fn current_state(&self) -> AuthState {
        self.inner.dispatcher.current_state()
    }

    /// Redeliver the current state to every subscriber now
    pub fn force_update(&self) {
        self.inner.dispatcher.force_update();
    }

    /// Lifecycle and sync diagnostics
    pub fn events(&self) -> &EventBus<AuthEvent> {
        &self.inner.events
    }

    // -------------------------------------------------------------------------
    // Session shortcuts
    // -------------------------------------------------------------------------

    /// Sign in with a credential obtained from the provider
    pub async fn sign_in(&self, credential: Credential) -> Result<()> {
        self.ensure_running()?;
        self.inner.session.establish(credential).await?;
        Ok(())
    }

    /// Sign out in every context
    pub async fn sign_out(&self) -> Result<()> {
        self.ensure_running()?;
        self.inner.session.sign_out().await;
        Ok(())
    }

    /// Record that profile data for the signed-in subject is available
    pub async fn mark_profile_loaded(&self) -> Result<()> {
        self.ensure_running()?;
        self.inner.session.mark_profile_loaded().await?;
        Ok(())
    }

    fn ensure_running(&self) -> Result<()> {
        if self.inner.shut_down.load(Ordering::SeqCst) {
            return Err(AgentError::ShutDown);
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Services
    // -------------------------------------------------------------------------

    /// Identifier of this execution context
    pub fn context_id(&self) -> ContextId {
        self.inner.context_id
    }

    /// Session lifecycle manager
    pub fn session(&self) -> &SessionLifecycleManager {
        &self.inner.session
    }

    /// State synchronizer
    pub fn synchronizer(&self) -> &StateSynchronizer {
        &self.inner.sync
    }

    /// Update dispatcher
    pub fn dispatcher(&self) -> &UpdateDispatcher {
        &self.inner.dispatcher
    }
}

impl std::fmt::Debug for AuthRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthRuntime")
            .field("context_id", &self.inner.context_id)
            .field("started", &self.inner.started.load(Ordering::Relaxed))
            .field("shut_down", &self.inner.shut_down.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}
