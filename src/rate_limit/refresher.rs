use super::limiter::RateLimiter;
use crate::metrics;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info};

/// Periodically re-reads the limiter threshold
///
/// A failed refresh is logged and counted; the limiter keeps running on the
/// threshold it already has.
pub struct ThresholdRefresher {
    limiter: Arc<RateLimiter>,
    period: Duration,
}

/// Handle to a running refresher task
pub struct RefresherHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl RefresherHandle {
    /// Stop the refresher and wait for the task to finish
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            error!(error = %e, "Threshold refresher task failed");
        }
    }
}

impl ThresholdRefresher {
    pub fn new(limiter: Arc<RateLimiter>, period: Duration) -> Self {
        Self { limiter, period }
    }

    /// Spawn the refresh loop
    ///
    /// The first refresh happens immediately.
    pub fn start(self) -> RefresherHandle {
        let (shutdown, mut shutdown_rx) = watch::channel(false);

        let task = tokio::spawn(async move {
            let mut ticker = interval(self.period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            info!(
                interval_secs = self.period.as_secs_f64(),
                key = %self.limiter.threshold_key(),
                "Started threshold refresher"
            );

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        refresh_once(&self.limiter).await;
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }

            info!("Threshold refresher stopped");
        });

        RefresherHandle { shutdown, task }
    }
}

/// Refresh the threshold once, logging and counting the outcome
pub async fn refresh_once(limiter: &RateLimiter) -> bool {
    match limiter.refresh_threshold().await {
        Ok(threshold) => {
            debug!(threshold = threshold, "Threshold refresh succeeded");
            metrics::record_refresh(true);
            true
        }
        Err(e) => {
            error!(
                error = %e,
                threshold = limiter.threshold(),
                "Threshold refresh failed, keeping current threshold"
            );
            metrics::record_refresh(false);
            false
        }
    }
}
