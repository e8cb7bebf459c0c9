//! Data counter poll

use std::sync::Arc;

use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use tw_core::InstanceId;

use super::Inner;

/// Poll the engine's data counter at a fixed interval until cancelled.
///
/// The first read happens one interval after the tunnel became active.
pub(super) async fn run_data_count_poll(
    inner: Arc<Inner>,
    instance: InstanceId,
    generation: u64,
    cancel: CancellationToken,
) {
    let period = inner.poll_interval;
    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {
                let count = inner.engine.data_count(&instance).await;
                if cancel.is_cancelled() {
                    break;
                }
                tracing::trace!("Data count of {}: {:?}", instance, count);
                inner.record_data_count(generation, count);
            }
        }
    }
}
