//! Tunnel orchestrator
//!
//! Public façade over the tunnel engine. Every profile is re-materialized
//! through the processor hook and the configuration builder before it reaches
//! the engine. The engine's notifications are authoritative: the orchestrator
//! never writes tunnel status itself, it only reads what the
//! [`StateReconciler`] publishes.

use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use tw_core::config::TunnelConfig;
use tw_core::profile::Profile;
use tw_core::traits::{
    InstallOptions, KeyValueStore, MemoryStore, ProfileProcessor, SystemExtensionManager,
    SystemExtensionResult, TunnelConfiguration, TunnelEngine,
};
use tw_core::{
    ActiveProfileState, AtomicState, DataCount, ErrorCode, ProfileId, TunnelError, TunnelStatus,
};

use crate::builder::ConfigurationBuilder;
use crate::reconciler::{ActiveProfiles, StateReconciler};

/// Store key of the last connected profile
pub const LAST_USED_PROFILE_KEY: &str = "tunnel.last_used_profile";

/// Install, connect, reconnect and disconnect tunnels
pub struct TunnelOrchestrator {
    engine: Arc<dyn TunnelEngine>,
    config: TunnelConfig,
    processor: Option<Arc<dyn ProfileProcessor>>,
    system_extension: Option<Arc<dyn SystemExtensionManager>>,
    store: Arc<dyn KeyValueStore>,
    reconciler: StateReconciler,
    /// Profile this orchestrator last asked the engine to connect
    session: Mutex<Option<ProfileId>>,
}

impl TunnelOrchestrator {
    /// Create an orchestrator over `engine`.
    ///
    /// Must be called within a tokio runtime.
    pub fn new(engine: Arc<dyn TunnelEngine>, config: TunnelConfig) -> Self {
        let reconciler = StateReconciler::new(Arc::clone(&engine), config.data_count_interval);
        Self {
            engine,
            config,
            processor: None,
            system_extension: None,
            store: Arc::new(MemoryStore::new()),
            reconciler,
            session: Mutex::new(None),
        }
    }

    /// Materialize profiles through `processor` before installing them
    pub fn with_processor(mut self, processor: Arc<dyn ProfileProcessor>) -> Self {
        self.processor = Some(processor);
        self
    }

    /// Require an activated system extension before connecting
    pub fn with_system_extension(mut self, manager: Arc<dyn SystemExtensionManager>) -> Self {
        if let Some(extension) = &self.config.system_extension {
            tracing::info!(
                "Using system extension {} {} ({})",
                extension.identifier,
                extension.version,
                extension.build
            );
        }
        self.system_extension = Some(manager);
        self
    }

    /// Persist the last used profile in `store`
    pub fn with_store(mut self, store: Arc<dyn KeyValueStore>) -> Self {
        self.store = store;
        self
    }

    /// Install `profile` without starting traffic.
    ///
    /// The published state of a profile that is not inactive is left as is.
    pub async fn install(&self, profile: &Profile) -> Result<(), TunnelError> {
        tracing::info!("Installing profile {} ({})", profile.name, profile.id);
        let (processed, title) = self.process(profile).await?;
        let configuration = ConfigurationBuilder::new().title(title).build(&processed)?;

        self.reconciler.track_if_idle(
            configuration.profile_id,
            self.engine.instance_id(),
            configuration.on_demand,
        );
        self.install_configuration(&configuration).await
    }

    /// Install and connect `profile`.
    ///
    /// Unless `force` is set, a profile that needs interactive input fails
    /// with [`TunnelError::InteractiveLogin`].
    pub async fn connect(&self, profile: &Profile, force: bool) -> Result<(), TunnelError> {
        self.connect_with_cancel(profile, force, &CancellationToken::new())
            .await
    }

    /// [`connect`](Self::connect), interruptible until the engine is asked to
    /// start traffic
    pub async fn connect_with_cancel(
        &self,
        profile: &Profile,
        force: bool,
        cancel: &CancellationToken,
    ) -> Result<(), TunnelError> {
        tracing::info!("Connecting profile {} ({})", profile.name, profile.id);
        let status = self.reconciler.status(&profile.id);
        if status.is_engaged() {
            tracing::debug!("Profile {} is already {}, connecting again", profile.name, status);
        }

        let (processed, title) = self.process(profile).await?;
        if !force && processed.is_interactive() {
            tracing::info!("Profile {} requires interactive login", profile.name);
            return Err(TunnelError::InteractiveLogin);
        }
        let configuration = ConfigurationBuilder::new().title(title).build(&processed)?;

        self.ensure_system_extension().await?;
        self.reconciler.track(
            configuration.profile_id,
            self.engine.instance_id(),
            configuration.on_demand,
        );
        self.install_configuration(&configuration).await?;

        if cancel.is_cancelled() {
            tracing::info!("Connection to {} interrupted", profile.name);
            if let Err(e) = self.engine.disconnect(&profile.id).await {
                tracing::warn!("Unable to disconnect interrupted profile {}: {}", profile.id, e);
            }
            return Err(TunnelError::Interrupted);
        }

        *self.session_lock() = Some(profile.id);
        if let Err(e) = self.engine.connect(&profile.id).await {
            tracing::error!("Unable to connect {}: {}", profile.name, e);
            return Err(e);
        }

        self.store
            .set_string(LAST_USED_PROFILE_KEY, profile.id.to_string());
        Ok(())
    }

    /// Disconnect, then connect `profile` again with `force`
    pub async fn reconnect(&self, profile: &Profile) -> Result<(), TunnelError> {
        self.reconnect_with_cancel(profile, &CancellationToken::new())
            .await
    }

    /// [`reconnect`](Self::reconnect), interruptible between its phases
    pub async fn reconnect_with_cancel(
        &self,
        profile: &Profile,
        cancel: &CancellationToken,
    ) -> Result<(), TunnelError> {
        tracing::info!("Reconnecting profile {} ({})", profile.name, profile.id);
        self.disconnect(&profile.id).await?;

        let delay = self.config.reconnection_delay;
        if !delay.is_zero() {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = cancel.cancelled() => {}
            }
        }
        if cancel.is_cancelled() {
            tracing::info!("Reconnection of {} interrupted", profile.name);
            return Err(TunnelError::Interrupted);
        }

        self.connect_with_cancel(profile, true, cancel).await
    }

    /// Stop traffic for `profile_id`.
    ///
    /// A profile that is neither this orchestrator's session nor active is
    /// left alone.
    pub async fn disconnect(&self, profile_id: &ProfileId) -> Result<(), TunnelError> {
        let is_session = *self.session_lock() == Some(*profile_id);
        if !is_session && self.reconciler.status(profile_id) == TunnelStatus::Inactive {
            tracing::debug!("Profile {} is not active, nothing to disconnect", profile_id);
            return Ok(());
        }

        tracing::info!("Disconnecting profile {}", profile_id);
        self.engine.disconnect(profile_id).await?;

        let mut session = self.session_lock();
        if *session == Some(*profile_id) {
            *session = None;
        }
        Ok(())
    }

    /// Published profile states, falling back to the last used profile as
    /// inactive when nothing is tracked
    pub fn active_profiles(&self) -> ActiveProfiles {
        let mut profiles = self.reconciler.active_profiles();
        if profiles.is_empty() {
            if let Some(id) = self.last_used_profile_id() {
                profiles.insert(id, ActiveProfileState::inactive());
            }
        }
        profiles
    }

    /// Receive every change of the published profile states
    pub fn subscribe_active_profiles(&self) -> watch::Receiver<ActiveProfiles> {
        self.reconciler.subscribe_active_profiles()
    }

    /// Whether `profile_id` is among the active profiles
    pub fn is_active_profile(&self, profile_id: &ProfileId) -> bool {
        self.active_profiles().contains_key(profile_id)
    }

    /// Tunnel status of a profile
    pub fn status(&self, profile_id: &ProfileId) -> TunnelStatus {
        self.reconciler.status(profile_id)
    }

    /// Tunnel status refined by the engine's connection status
    pub fn connection_status(&self, profile_id: &ProfileId) -> TunnelStatus {
        let connection = self
            .reconciler
            .handle()
            .and_then(|handle| self.engine.connection_status(&handle));
        self.status(profile_id).with_connection_status(connection)
    }

    pub fn data_count(&self, profile_id: &ProfileId) -> Option<DataCount> {
        self.reconciler.data_count(profile_id)
    }

    pub fn last_error_code(&self, profile_id: &ProfileId) -> Option<ErrorCode> {
        self.reconciler.last_error_code(profile_id)
    }

    pub fn atomic_state(&self) -> AtomicState {
        self.reconciler.atomic_state()
    }

    pub fn subscribe_atomic_state(&self) -> watch::Receiver<AtomicState> {
        self.reconciler.subscribe_atomic_state()
    }

    /// Last profile connected through this orchestrator, as persisted
    pub fn last_used_profile_id(&self) -> Option<ProfileId> {
        let value = self.store.string(LAST_USED_PROFILE_KEY)?;
        let id = ProfileId::parse(&value);
        if id.is_none() {
            tracing::warn!("Discarding malformed last used profile {:?}", value);
            self.store.remove(LAST_USED_PROFILE_KEY);
        }
        id
    }

    /// The reconciler owning the published state
    pub fn reconciler(&self) -> &StateReconciler {
        &self.reconciler
    }

    /// Stop consuming engine notifications
    pub async fn shutdown(&self) {
        self.reconciler.shutdown().await;
    }

    async fn process(&self, profile: &Profile) -> Result<(Profile, String), TunnelError> {
        match &self.processor {
            Some(processor) => {
                let processed = processor.will_install(profile).await?;
                let title = processor.title(&processed);
                Ok((processed, title))
            }
            None => Ok((profile.clone(), profile.name.clone())),
        }
    }

    async fn ensure_system_extension(&self) -> Result<(), TunnelError> {
        let Some(manager) = &self.system_extension else {
            return Ok(());
        };
        let current = manager.current_result();
        if current == SystemExtensionResult::Success {
            return Ok(());
        }

        tracing::info!("System extension is {}, requesting activation", current);
        let result = manager.install().await?;
        if result != SystemExtensionResult::Success {
            tracing::warn!("System extension activation returned {}", result);
            return Err(TunnelError::SystemExtension(result));
        }
        Ok(())
    }

    async fn install_configuration(
        &self,
        configuration: &TunnelConfiguration,
    ) -> Result<(), TunnelError> {
        let preferences = serde_json::to_string(&self.config.preferences)
            .map_err(|e| TunnelError::Other(anyhow::Error::new(e).context("encoding preferences")))?;
        let options = InstallOptions {
            is_manual: true,
            preferences: Some(preferences),
        };
        self.engine.install(configuration, &options).await
    }

    fn session_lock(&self) -> std::sync::MutexGuard<'_, Option<ProfileId>> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
