//! Application context
//!
//! Composition root wiring the tunnel orchestrator to the app-level
//! collaborators. Every app event (launch, foreground, eligibility change,
//! profile save) runs through one [`TaskSerializer`], so the launch sequence
//! happens-before everything else and the other events never overlap.
//!
//! Observers do not call back into the context. They forward [`AppEvent`]s
//! into a channel drained by [`AppContext::run`].

use std::collections::BTreeSet;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::Context as _;
use futures::future::{BoxFuture, FutureExt};
use tokio::sync::{broadcast, mpsc, watch};
use tokio_util::sync::CancellationToken;

use tw_core::profile::Profile;
use tw_core::traits::{
    CatalogService, FeatureVerifier, ProfileEvent, ProfileRepository, SystemExtensionManager,
};
use tw_core::{AppFeature, TunnelError};

use crate::orchestrator::TunnelOrchestrator;
use crate::reconnect::{self, ReconnectDecision};
use crate::serializer::TaskSerializer;

/// Default capacity of the app event channel
const DEFAULT_EVENT_BUFFER: usize = 64;

/// Handler run when the eligible features change
pub type EligibilityHandler =
    Arc<dyn Fn(BTreeSet<AppFeature>) -> BoxFuture<'static, Result<(), TunnelError>> + Send + Sync>;

/// Events forwarded by the observers installed at launch
#[derive(Debug, Clone)]
pub enum AppEvent {
    /// The set of eligible features changed
    EligibleFeatures(BTreeSet<AppFeature>),
    /// A profile was saved
    SaveProfile {
        profile: Profile,
        previous: Option<Profile>,
    },
}

/// Builder for [`AppContext`]
pub struct AppContextBuilder {
    orchestrator: Arc<TunnelOrchestrator>,
    repository: Arc<dyn ProfileRepository>,
    verifier: Arc<dyn FeatureVerifier>,
    catalog: Arc<dyn CatalogService>,
    system_extension: Option<Arc<dyn SystemExtensionManager>>,
    eligibility_handler: Option<EligibilityHandler>,
    event_buffer: usize,
}

impl AppContextBuilder {
    /// Reload the system extension at launch and on foreground
    pub fn system_extension(mut self, manager: Arc<dyn SystemExtensionManager>) -> Self {
        self.system_extension = Some(manager);
        self
    }

    /// Run `handler` on every change of the eligible features
    pub fn on_eligible_features<F, Fut>(mut self, handler: F) -> Self
    where
        F: Fn(BTreeSet<AppFeature>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), TunnelError>> + Send + 'static,
    {
        self.eligibility_handler = Some(Arc::new(move |features| handler(features).boxed()));
        self
    }

    /// Capacity of the app event channel
    pub fn event_buffer(mut self, capacity: usize) -> Self {
        self.event_buffer = capacity.max(1);
        self
    }

    pub fn build(self) -> AppContext {
        let (events_tx, events_rx) = mpsc::channel(self.event_buffer);
        let observers = CancellationToken::new();

        let launch = LaunchSequence {
            repository: self.repository,
            verifier: Arc::clone(&self.verifier),
            catalog: self.catalog,
            system_extension: self.system_extension.clone(),
            events: events_tx,
            observers: observers.clone(),
        };
        let serializer = TaskSerializer::new(move || launch.clone().run());

        AppContext {
            orchestrator: self.orchestrator,
            serializer,
            verifier: self.verifier,
            system_extension: self.system_extension,
            eligibility_handler: self.eligibility_handler,
            events: Mutex::new(Some(events_rx)),
            observers,
        }
    }
}

/// Side effects of the one-time launch
#[derive(Clone)]
struct LaunchSequence {
    repository: Arc<dyn ProfileRepository>,
    verifier: Arc<dyn FeatureVerifier>,
    catalog: Arc<dyn CatalogService>,
    system_extension: Option<Arc<dyn SystemExtensionManager>>,
    events: mpsc::Sender<AppEvent>,
    observers: CancellationToken,
}

impl LaunchSequence {
    async fn run(self) -> anyhow::Result<()> {
        tracing::info!("Application did launch");

        self.repository
            .observe_local()
            .await
            .context("Unable to load local profiles")?;

        let verifier = Arc::clone(&self.verifier);
        tokio::spawn(async move { verifier.reload().await });

        if let Some(manager) = self.system_extension.clone() {
            tokio::spawn(async move {
                match manager.load().await {
                    Ok(result) => tracing::info!("System extension: {}", result),
                    Err(e) => tracing::error!("Unable to load system extension: {}", e),
                }
            });
        }

        let mut features = self.verifier.eligible_features();
        let current = features.borrow_and_update().clone();
        tokio::spawn(forward_eligible_features(
            features,
            current,
            self.events.clone(),
            self.observers.clone(),
        ));
        tokio::spawn(forward_profile_events(
            self.repository.subscribe(),
            self.events.clone(),
            self.observers.clone(),
        ));

        if let Err(e) = self.catalog.fetch_index().await {
            tracing::error!("Unable to fetch providers index: {}", e);
        }
        Ok(())
    }
}

/// Forward eligibility changes that differ from `last`
async fn forward_eligible_features(
    mut features: watch::Receiver<BTreeSet<AppFeature>>,
    mut last: BTreeSet<AppFeature>,
    events: mpsc::Sender<AppEvent>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            changed = features.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = features.borrow_and_update().clone();
                if current == last {
                    continue;
                }
                last = current.clone();
                if events.send(AppEvent::EligibleFeatures(current)).await.is_err() {
                    break;
                }
            }
        }
    }
}

async fn forward_profile_events(
    mut profiles: broadcast::Receiver<ProfileEvent>,
    events: mpsc::Sender<AppEvent>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            event = profiles.recv() => match event {
                Ok(ProfileEvent::Save { profile, previous }) => {
                    if events.send(AppEvent::SaveProfile { profile, previous }).await.is_err() {
                        break;
                    }
                }
                Ok(ProfileEvent::Remove { ids }) => {
                    tracing::debug!("Removed {} profiles", ids.len());
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!("Missed {} profile events", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }
}

/// App-level event handling around a [`TunnelOrchestrator`]
pub struct AppContext {
    orchestrator: Arc<TunnelOrchestrator>,
    serializer: TaskSerializer,
    verifier: Arc<dyn FeatureVerifier>,
    system_extension: Option<Arc<dyn SystemExtensionManager>>,
    eligibility_handler: Option<EligibilityHandler>,
    events: Mutex<Option<mpsc::Receiver<AppEvent>>>,
    observers: CancellationToken,
}

impl AppContext {
    pub fn builder(
        orchestrator: Arc<TunnelOrchestrator>,
        repository: Arc<dyn ProfileRepository>,
        verifier: Arc<dyn FeatureVerifier>,
        catalog: Arc<dyn CatalogService>,
    ) -> AppContextBuilder {
        AppContextBuilder {
            orchestrator,
            repository,
            verifier,
            catalog,
            system_extension: None,
            eligibility_handler: None,
            event_buffer: DEFAULT_EVENT_BUFFER,
        }
    }

    pub fn orchestrator(&self) -> &Arc<TunnelOrchestrator> {
        &self.orchestrator
    }

    /// Run the launch sequence unless it already succeeded
    pub async fn on_launch(&self) -> Result<(), TunnelError> {
        self.serializer.ensure_launched().await.map(|_| ())
    }

    /// Refresh the system extension and eligibility.
    ///
    /// Skipped when this call performed the launch.
    pub async fn on_foreground(&self) -> Result<(), TunnelError> {
        if self.serializer.ensure_launched().await? {
            tracing::debug!("Skipping foreground refresh right after launch");
            return Ok(());
        }
        self.serializer
            .run_exclusive(|| async {
                tracing::info!("Application did enter foreground");
                if let Some(manager) = &self.system_extension {
                    if let Err(e) = manager.load().await {
                        tracing::error!("Unable to load system extension: {}", e);
                    }
                }
                self.verifier.reload().await;
                Ok(())
            })
            .await
    }

    /// Run the eligibility handler for `features`
    pub async fn on_eligible_features(
        &self,
        features: BTreeSet<AppFeature>,
    ) -> Result<(), TunnelError> {
        self.serializer
            .run_exclusive(|| async {
                tracing::info!("Eligible features changed ({} features)", features.len());
                match &self.eligibility_handler {
                    Some(handler) => handler(features).await,
                    None => Ok(()),
                }
            })
            .await
    }

    /// Reconnect the active tunnel if the saved change requires it.
    ///
    /// A profile that now needs interactive login is left disconnected.
    pub async fn on_save_profile(
        &self,
        profile: &Profile,
        previous: Option<&Profile>,
    ) -> Result<(), TunnelError> {
        self.serializer
            .run_exclusive(|| async {
                let orchestrator = &self.orchestrator;
                let decision = reconnect::decide(
                    profile,
                    previous,
                    orchestrator.is_active_profile(&profile.id),
                    orchestrator.status(&profile.id),
                );
                match decision {
                    ReconnectDecision::Skip(reason) => {
                        tracing::debug!("Not reconnecting {} after save: {}", profile.name, reason);
                        Ok(())
                    }
                    ReconnectDecision::Reconnect => {
                        tracing::info!("Reconnecting {} after save", profile.name);
                        orchestrator.disconnect(&profile.id).await?;
                        match orchestrator.connect(profile, false).await {
                            Err(TunnelError::InteractiveLogin) => {
                                tracing::info!(
                                    "Profile {} requires interactive login, leaving it disconnected",
                                    profile.name
                                );
                                Ok(())
                            }
                            result => result,
                        }
                    }
                }
            })
            .await
    }

    /// Drain the events forwarded by the launch observers until cancelled.
    ///
    /// Only the first call drains; later calls return immediately.
    pub async fn run(&self, cancel: CancellationToken) {
        let events = self
            .events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(mut events) = events else {
            tracing::warn!("Application events are already being handled");
            return;
        };

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                event = events.recv() => match event {
                    Some(event) => self.handle(event).await,
                    None => break,
                },
            }
        }
    }

    async fn handle(&self, event: AppEvent) {
        match event {
            AppEvent::EligibleFeatures(features) => {
                if let Err(e) = self.on_eligible_features(features).await {
                    tracing::error!("Unable to handle eligible features: {}", e);
                }
            }
            AppEvent::SaveProfile { profile, previous } => {
                if let Err(e) = self.on_save_profile(&profile, previous.as_ref()).await {
                    tracing::error!("Unable to handle saved profile {}: {}", profile.name, e);
                }
            }
        }
    }
}

impl Drop for AppContext {
    fn drop(&mut self) {
        self.observers.cancel();
    }
}
