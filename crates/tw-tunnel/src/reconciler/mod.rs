//! Reconciliation of tunnel engine notifications
//!
//! The `StateReconciler` is the only writer of the published tunnel state.
//! It consumes the engine's event stream, drops notifications that belong to
//! other tunnel instances, collapses the rest into a de-duplicated
//! [`AtomicState`] and drives the data counter poll while the tunnel is
//! active.
//!
//! # Instance handle
//!
//! The handle of the owned tunnel instance is set at most once, either when a
//! profile is tracked or, on cold start, from the first status notification.
//!
//! # Consistency
//!
//! The event task and the poll task write through the same mutex and publish
//! while holding it, so readers of the watch channels never observe a partial
//! update. Every poll carries a generation number; a poll whose generation
//! was stopped never writes.

mod poll;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use tw_core::traits::{TunnelEngine, TunnelEvent};
use tw_core::{
    ActiveProfileState, AtomicState, DataCount, ErrorCode, InstanceId, ProfileId, TunnelStatus,
};

/// Shortest accepted data counter poll interval
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Published state of the profiles known to the tunnel
pub type ActiveProfiles = HashMap<ProfileId, ActiveProfileState>;

/// Profile currently bound to the owned tunnel instance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct TrackedProfile {
    id: ProfileId,
    on_demand: bool,
}

/// Running data counter poll
struct PollHandle {
    generation: u64,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

#[derive(Default)]
struct ReconcilerState {
    handle: Option<InstanceId>,
    profile: Option<TrackedProfile>,
    atomic: AtomicState,
    data_count: Option<DataCount>,
    last_error: Option<ErrorCode>,
    poll: Option<PollHandle>,
    generation: u64,
}

impl ReconcilerState {
    fn profile_state(&self) -> Option<(ProfileId, ActiveProfileState)> {
        self.profile.map(|profile| {
            (
                profile.id,
                ActiveProfileState {
                    status: self.atomic.status,
                    on_demand: profile.on_demand,
                    data_count: self.data_count,
                    last_error_code: self.last_error,
                },
            )
        })
    }

    fn set_profile(&mut self, id: ProfileId, on_demand: Option<bool>) {
        match &mut self.profile {
            Some(current) if current.id == id => {
                if let Some(on_demand) = on_demand {
                    current.on_demand = on_demand;
                }
            }
            _ => {
                self.profile = Some(TrackedProfile {
                    id,
                    on_demand: on_demand.unwrap_or(false),
                });
                self.data_count = None;
                self.last_error = None;
            }
        }
    }

    fn stop_poll(&mut self) {
        if let Some(poll) = self.poll.take() {
            tracing::debug!("Stopping data count poll (generation {})", poll.generation);
            poll.cancel.cancel();
        }
        self.data_count = None;
    }
}

struct Inner {
    engine: Arc<dyn TunnelEngine>,
    poll_interval: Duration,
    state: Mutex<ReconcilerState>,
    atomic_tx: watch::Sender<AtomicState>,
    profiles_tx: watch::Sender<ActiveProfiles>,
    cancel: CancellationToken,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, ReconcilerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn apply(self: &Arc<Self>, event: TunnelEvent) {
        let mut state = self.lock();

        if let TunnelEvent::DidChangeStatus { instance, .. } = &event {
            if state.handle.is_none() {
                tracing::info!("Adopting tunnel instance {}", instance);
                state.handle = Some(instance.clone());
            }
        }
        if state.handle.as_ref() != Some(event.instance()) {
            tracing::debug!(
                "Dropping notification from foreign instance {}",
                event.instance()
            );
            return;
        }

        match event {
            TunnelEvent::DidReinstall { is_enabled, .. } => {
                tracing::debug!("Tunnel reinstalled (enabled: {})", is_enabled);
                state.atomic.is_enabled = is_enabled;
            }
            TunnelEvent::DidChangeStatus {
                instance,
                is_enabled,
                status,
                profile_id,
            } => {
                if let Some(id) = profile_id {
                    state.set_profile(id, None);
                }
                let previous = state.atomic.status;
                state.atomic = AtomicState::new(is_enabled, status);
                if previous != status {
                    tracing::info!("Tunnel status: {} -> {}", previous, status);
                }

                match status {
                    TunnelStatus::Active => {
                        if state.poll.is_none() {
                            self.start_poll(&mut state, instance);
                        }
                    }
                    TunnelStatus::Activating => {
                        state.last_error = None;
                    }
                    TunnelStatus::Deactivating | TunnelStatus::Inactive => {
                        state.stop_poll();
                        if let Some(code) = self.engine.last_error(&instance) {
                            state.last_error = Some(code);
                        }
                    }
                }
            }
            TunnelEvent::DidFail {
                instance,
                is_enabled,
                error,
            } => {
                let code = error.or_else(|| self.engine.last_error(&instance));
                tracing::error!(
                    "Tunnel failed: {}",
                    code.map(|c| c.to_string())
                        .unwrap_or_else(|| "no error code".to_string())
                );
                state.stop_poll();
                state.atomic = AtomicState::new(is_enabled, TunnelStatus::Inactive);
                state.last_error = code;
            }
        }

        self.publish(&state);
    }

    fn start_poll(self: &Arc<Self>, state: &mut ReconcilerState, instance: InstanceId) {
        state.generation += 1;
        let generation = state.generation;
        let cancel = self.cancel.child_token();
        tracing::debug!(
            "Starting data count poll every {:?} (generation {})",
            self.poll_interval,
            generation
        );
        let task = tokio::spawn(poll::run_data_count_poll(
            Arc::clone(self),
            instance,
            generation,
            cancel.clone(),
        ));
        state.poll = Some(PollHandle {
            generation,
            cancel,
            task,
        });
    }

    fn record_data_count(&self, generation: u64, count: Option<DataCount>) {
        let mut state = self.lock();
        let current = state.poll.as_ref().map(|poll| poll.generation);
        if current != Some(generation) || state.atomic.status != TunnelStatus::Active {
            tracing::trace!("Discarding data count from stopped poll {}", generation);
            return;
        }
        state.data_count = count;
        self.publish(&state);
    }

    fn publish(&self, state: &ReconcilerState) {
        let atomic = state.atomic;
        self.atomic_tx.send_if_modified(|current| {
            if *current == atomic {
                return false;
            }
            *current = atomic;
            true
        });

        let profiles: ActiveProfiles = state.profile_state().into_iter().collect();
        self.profiles_tx.send_if_modified(|current| {
            if *current == profiles {
                return false;
            }
            *current = profiles;
            true
        });
    }
}

/// Single writer of the published tunnel state
pub struct StateReconciler {
    inner: Arc<Inner>,
    event_task: Mutex<Option<JoinHandle<()>>>,
}

impl StateReconciler {
    /// Subscribe to `engine` and start consuming its notifications.
    ///
    /// Must be called within a tokio runtime.
    pub fn new(engine: Arc<dyn TunnelEngine>, poll_interval: Duration) -> Self {
        let poll_interval = if poll_interval < MIN_POLL_INTERVAL {
            tracing::warn!(
                "Data count interval {:?} is too short, using {:?}",
                poll_interval,
                MIN_POLL_INTERVAL
            );
            MIN_POLL_INTERVAL
        } else {
            poll_interval
        };
        let (atomic_tx, _) = watch::channel(AtomicState::default());
        let (profiles_tx, _) = watch::channel(ActiveProfiles::new());
        let events = engine.subscribe();

        let inner = Arc::new(Inner {
            engine,
            poll_interval,
            state: Mutex::new(ReconcilerState::default()),
            atomic_tx,
            profiles_tx,
            cancel: CancellationToken::new(),
        });

        let event_task = tokio::spawn(run_event_loop(
            Arc::clone(&inner),
            events,
            inner.cancel.clone(),
        ));

        Self {
            inner,
            event_task: Mutex::new(Some(event_task)),
        }
    }

    /// Apply a single engine notification
    pub fn apply(&self, event: TunnelEvent) {
        self.inner.apply(event);
    }

    /// Bind `profile_id` to the tunnel instance `instance`.
    ///
    /// The instance handle is write-once: a different handle is rejected and
    /// the original one is kept.
    pub fn track(&self, profile_id: ProfileId, instance: InstanceId, on_demand: bool) {
        let mut state = self.inner.lock();
        self.bind(&mut state, profile_id, instance, on_demand);
    }

    /// [`track`](Self::track) `profile_id` unless another profile is bound
    /// and not inactive.
    ///
    /// Returns whether the profile is now tracked.
    pub fn track_if_idle(
        &self,
        profile_id: ProfileId,
        instance: InstanceId,
        on_demand: bool,
    ) -> bool {
        let mut state = self.inner.lock();
        if let Some(current) = state.profile {
            if current.id != profile_id && state.atomic.status != TunnelStatus::Inactive {
                tracing::debug!(
                    "Profile {} is {}, not tracking {}",
                    current.id,
                    state.atomic.status,
                    profile_id
                );
                return false;
            }
        }
        self.bind(&mut state, profile_id, instance, on_demand);
        true
    }

    fn bind(
        &self,
        state: &mut ReconcilerState,
        profile_id: ProfileId,
        instance: InstanceId,
        on_demand: bool,
    ) {
        match &state.handle {
            None => {
                tracing::debug!("Tracking tunnel instance {}", instance);
                state.handle = Some(instance);
            }
            Some(current) if *current == instance => {}
            Some(current) => {
                tracing::error!(
                    "Tunnel instance handle is already {}, refusing {}",
                    current,
                    instance
                );
                debug_assert!(false, "tunnel instance handle set twice");
            }
        }
        state.set_profile(profile_id, Some(on_demand));
        self.inner.publish(state);
    }

    /// Handle of the owned tunnel instance
    pub fn handle(&self) -> Option<InstanceId> {
        self.inner.lock().handle.clone()
    }

    /// Profile bound to the tunnel instance
    pub fn current_profile_id(&self) -> Option<ProfileId> {
        self.inner.lock().profile.map(|p| p.id)
    }

    /// Current de-duplicated state
    pub fn atomic_state(&self) -> AtomicState {
        self.inner.lock().atomic
    }

    /// Receive every change of the atomic state
    pub fn subscribe_atomic_state(&self) -> watch::Receiver<AtomicState> {
        self.inner.atomic_tx.subscribe()
    }

    /// Status of a profile; `Inactive` unless it is the tracked profile
    pub fn status(&self, profile_id: &ProfileId) -> TunnelStatus {
        let state = self.inner.lock();
        match state.profile {
            Some(profile) if profile.id == *profile_id => state.atomic.status,
            _ => TunnelStatus::Inactive,
        }
    }

    /// Last polled data counter; `None` unless the profile is active
    pub fn data_count(&self, profile_id: &ProfileId) -> Option<DataCount> {
        let state = self.inner.lock();
        match state.profile {
            Some(profile)
                if profile.id == *profile_id && state.atomic.status == TunnelStatus::Active =>
            {
                state.data_count
            }
            _ => None,
        }
    }

    /// Last error reported for a profile
    pub fn last_error_code(&self, profile_id: &ProfileId) -> Option<ErrorCode> {
        let state = self.inner.lock();
        match state.profile {
            Some(profile) if profile.id == *profile_id => state.last_error,
            _ => None,
        }
    }

    /// Snapshot of the published profile states
    pub fn active_profiles(&self) -> ActiveProfiles {
        self.inner.profiles_tx.borrow().clone()
    }

    /// Receive every change of the published profile states
    pub fn subscribe_active_profiles(&self) -> watch::Receiver<ActiveProfiles> {
        self.inner.profiles_tx.subscribe()
    }

    /// Whether the data counter poll is running
    pub fn is_polling(&self) -> bool {
        self.inner.lock().poll.is_some()
    }

    /// Stop the event and poll tasks and wait for them to finish
    pub async fn shutdown(&self) {
        self.inner.cancel.cancel();

        let poll = self.inner.lock().poll.take();
        if let Some(poll) = poll {
            let _ = poll.task.await;
        }

        let event_task = self
            .event_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = event_task {
            let _ = task.await;
        }
        tracing::debug!("State reconciler stopped");
    }
}

impl Drop for StateReconciler {
    fn drop(&mut self) {
        self.inner.cancel.cancel();
    }
}

async fn run_event_loop(
    inner: Arc<Inner>,
    mut events: broadcast::Receiver<TunnelEvent>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            event = events.recv() => match event {
                Ok(event) => inner.apply(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!("Missed {} tunnel notifications", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => {
                    tracing::info!("Tunnel engine closed its notification channel");
                    break;
                }
            },
        }
    }
}
