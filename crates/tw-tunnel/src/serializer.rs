//! Serialized execution of app-level tasks
//!
//! A one-time launch sequence happens-before every other task. Follow-up
//! tasks (foreground, eligibility change, profile save) run one at a time in
//! arrival order.
//!
//! # Launch attempts
//!
//! The first caller of [`TaskSerializer::ensure_launched`] starts the launch
//! sequence on its own task; concurrent callers await the same attempt. A
//! failed attempt is discarded so that the next caller starts a fresh one,
//! while every waiter of the failed attempt receives
//! [`TunnelError::CouldNotLaunch`].

use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};

use futures::future::{BoxFuture, FutureExt, Shared};

use tw_core::TunnelError;

type LaunchFn = Arc<dyn Fn() -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

type LaunchAttempt = Shared<BoxFuture<'static, Result<(), Arc<anyhow::Error>>>>;

/// Happens-before coordinator for launch and follow-up tasks
pub struct TaskSerializer {
    /// Caller-supplied launch side effects
    launch: LaunchFn,
    /// In-flight or completed launch attempt
    attempt: Mutex<Option<LaunchAttempt>>,
    /// Held by the pending follow-up unit. Tokio's mutex is FIFO-fair.
    pending: tokio::sync::Mutex<()>,
}

impl TaskSerializer {
    /// Create a serializer with the given launch sequence
    pub fn new<F, Fut>(launch: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Self {
            launch: Arc::new(move || launch().boxed()),
            attempt: Mutex::new(None),
            pending: tokio::sync::Mutex::new(()),
        }
    }

    /// Start the launch sequence unless an attempt is recorded, then await it.
    ///
    /// Returns `true` if this call started the attempt.
    pub async fn ensure_launched(&self) -> Result<bool, TunnelError> {
        let (attempt, did_launch) = {
            let mut slot = self.attempt.lock().unwrap_or_else(PoisonError::into_inner);
            match slot.as_ref() {
                Some(attempt) => (attempt.clone(), false),
                None => {
                    tracing::info!("Launching");
                    let attempt = self.start_attempt();
                    *slot = Some(attempt.clone());
                    (attempt, true)
                }
            }
        };

        match attempt.clone().await {
            Ok(()) => Ok(did_launch),
            Err(e) => {
                {
                    let mut slot = self.attempt.lock().unwrap_or_else(PoisonError::into_inner);
                    if slot.as_ref().is_some_and(|current| current.ptr_eq(&attempt)) {
                        *slot = None;
                    }
                }
                if did_launch {
                    tracing::error!("Unable to launch: {:#}", e);
                }
                Err(TunnelError::CouldNotLaunch {
                    reason: format!("{:#}", e),
                })
            }
        }
    }

    /// Run `work` after the launch and after any pending unit completes.
    ///
    /// Units never overlap. An error returned by `work` reaches this caller
    /// only.
    pub async fn run_exclusive<T, F, Fut>(&self, work: F) -> Result<T, TunnelError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, TunnelError>>,
    {
        self.ensure_launched().await?;
        let _pending = self.pending.lock().await;
        work().await
    }

    /// Whether a launch attempt is in flight or has completed
    pub fn has_launch_attempt(&self) -> bool {
        self.attempt
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    fn start_attempt(&self) -> LaunchAttempt {
        let handle = tokio::spawn((self.launch)());
        async move {
            match handle.await {
                Ok(result) => result.map_err(Arc::new),
                Err(e) => Err(Arc::new(anyhow::anyhow!("launch task failed: {}", e))),
            }
        }
        .boxed()
        .shared()
    }
}
