//! Fixed-rate maintenance and anomaly evaluation jobs.

mod maintenance;
mod monitors;

use std::sync::Arc;
use std::time::Duration;

use log::{error, info};
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};

pub use maintenance::{ContactRecorder, DeauthEvaluator, OuiUpdater, ProbeHealthCheck, SentrySync, PROBES_INDICATOR};
pub use monitors::{
    BeaconRateAnomalyMonitor, BeaconRateWriter, RecentFramesReset, RetentionCleaner, SignalTrackMonitor,
};

pub trait Periodical: Send + Sync {
    fn name(&self) -> &str;

    /// Runs on a blocking thread. Must handle its own errors.
    fn execute(&self);
}

/// Owns one tokio task per scheduled periodical.
pub struct PeriodicalManager {
    shutdown: watch::Receiver<bool>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl PeriodicalManager {
    pub fn new(shutdown: watch::Receiver<bool>) -> Self {
        Self {
            shutdown,
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Must be called from within a tokio runtime. A tick that comes due
    /// while `execute` is still running is skipped, so one periodical never
    /// runs twice at the same time.
    pub fn schedule_at_fixed_rate(&self, periodical: Arc<dyn Periodical>, initial_delay: Duration, period: Duration) {
        info!(
            "Scheduling [{}] every {:?} after {:?}",
            periodical.name(),
            period,
            initial_delay
        );
        let mut shutdown = self.shutdown.clone();

        let handle = tokio::spawn(async move {
            tokio::select! {
                _ = time::sleep(initial_delay) => {}
                _ = wait_for_shutdown(&mut shutdown) => return,
            }

            let mut ticker = time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let job = Arc::clone(&periodical);
                        if let Err(e) = tokio::task::spawn_blocking(move || job.execute()).await {
                            error!("Periodical [{}] failed: {}", periodical.name(), e);
                        }
                    }
                    _ = wait_for_shutdown(&mut shutdown) => break,
                }
            }
            info!("Periodical [{}] stopped", periodical.name());
        });

        self.handles.lock().push(handle);
    }

    pub fn scheduled(&self) -> usize {
        self.handles.lock().len()
    }

    /// Waits for every task to observe the shutdown signal.
    pub async fn join(&self) {
        let handles: Vec<JoinHandle<()>> = self.handles.lock().drain(..).collect();
        for handle in handles {
            if let Err(e) = handle.await {
                error!("Periodical task ended abnormally: {}", e);
            }
        }
    }
}

/// Resolves once the flag is set or its sender is gone.
pub(crate) async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow() {
            return;
        }
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}
