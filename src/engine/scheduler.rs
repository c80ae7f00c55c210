//! Recurring timer driving poll cycles.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::engine::poll::PollEngine;
use crate::error::SchedulerError;

struct RunningPoller {
    handle: JoinHandle<()>,
    shutdown: watch::Sender<bool>,
    interval: Duration,
}

/// Handle owning the polling task. `start` and `stop` are idempotent.
pub struct PollScheduler {
    engine: Arc<PollEngine>,
    running: Mutex<Option<RunningPoller>>,
}

impl PollScheduler {
    pub fn new(engine: Arc<PollEngine>) -> Self {
        Self {
            engine,
            running: Mutex::new(None),
        }
    }

    pub fn engine(&self) -> &Arc<PollEngine> {
        &self.engine
    }

    /// Start polling every `interval_secs`. Returns false if already running.
    ///
    /// The first cycle runs one interval after start.
    pub async fn start(&self, interval_secs: u64) -> Result<bool, SchedulerError> {
        if interval_secs == 0 {
            return Err(SchedulerError::InvalidInterval);
        }

        let mut running = self.running.lock().await;
        if running.as_ref().is_some_and(|r| !r.handle.is_finished()) {
            return Ok(false);
        }

        let interval = Duration::from_secs(interval_secs);
        let (shutdown, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(run_loop(Arc::clone(&self.engine), interval, shutdown_rx));
        info!("Polling started, every {interval_secs}s");

        *running = Some(RunningPoller {
            handle,
            shutdown,
            interval,
        });
        Ok(true)
    }

    /// Stop polling and wait for the task to exit. A cycle in flight is
    /// abandoned at its current await point. Returns false if not running.
    pub async fn stop(&self) -> bool {
        let Some(poller) = self.running.lock().await.take() else {
            return false;
        };

        let _ = poller.shutdown.send(true);
        if let Err(e) = poller.handle.await {
            warn!("Polling task ended abnormally: {e}");
        }
        info!("Polling stopped");
        true
    }

    pub async fn is_running(&self) -> bool {
        self.running
            .lock()
            .await
            .as_ref()
            .is_some_and(|r| !r.handle.is_finished())
    }

    /// Current polling period, if running.
    pub async fn interval(&self) -> Option<Duration> {
        self.running.lock().await.as_ref().map(|r| r.interval)
    }
}

async fn run_loop(
    engine: Arc<PollEngine>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // Skip immediate first tick
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = ticker.tick() => {}
        }

        tokio::select! {
            _ = shutdown.changed() => {
                debug!("Abandoning in-flight poll cycle");
                break;
            }
            report = engine.try_run_once() => {
                if let Some(report) = report {
                    debug!(?report, "Scheduled poll cycle complete");
                }
            }
        }
    }
}
