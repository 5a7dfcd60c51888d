//! Periodic export task.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;

use super::{Exporter, Metrics};

/// Owned handle over the background export loop.
///
/// The loop stops on [`Scheduler::stop`] or when the handle is dropped.
pub struct Scheduler {
    token: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl Scheduler {
    /// Spawn the loop. First push happens one `period` after start.
    pub fn start(exporter: Exporter, metrics: Metrics, period: Duration) -> Self {
        let token = CancellationToken::new();
        let cancelled = token.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = cancelled.cancelled() => break,
                    _ = ticker.tick() => exporter.tick(&metrics).await,
                }
            }

            tracing::debug!("metrics scheduler stopped");
        });

        tracing::info!(period_ms = period.as_millis() as u64, "metrics scheduler started");

        Self {
            token,
            handle: Some(handle),
        }
    }

    /// Cancel the loop and wait for an in-flight push to finish.
    pub async fn stop(mut self) {
        self.token.cancel();

        if let Some(handle) = self.handle.take() {
            if let Err(err) = handle.await {
                tracing::error!(error = %err, "metrics scheduler task failed");
            }
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.token.cancel();
    }
}
