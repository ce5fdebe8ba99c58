//! Background jobs.
//!
//! Each job is its own task with its own interval. A job never overlaps
//! itself: the tick loop awaits the run, and ticks missed during a long run
//! are skipped rather than queued. All jobs stop when the shared
//! cancellation token fires.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::panel::{Panel, SyncStatus, TickOutcome};

pub struct Scheduler {
    shutdown: CancellationToken,
    jobs: Vec<(&'static str, JoinHandle<()>)>,
}

impl Scheduler {
    pub fn new(shutdown: CancellationToken) -> Self {
        Self {
            shutdown,
            jobs: Vec::new(),
        }
    }

    /// Start the rotation check and the log sweep for `panel`
    pub fn for_panel(panel: Arc<Panel>, shutdown: CancellationToken) -> Self {
        let mut scheduler = Self::new(shutdown);
        let config = panel.config().clone();

        let rotating = panel.clone();
        scheduler.spawn("rotation-check", config.rotation_check_interval(), move || {
            let panel = rotating.clone();
            async move {
                match panel.rotation_tick().await {
                    Ok(TickOutcome::Rotated(SyncStatus::Applied(path))) => {
                        info!("Scheduled rotation applied via {}", path)
                    }
                    Ok(TickOutcome::Rotated(SyncStatus::Stale(e))) => {
                        warn!("Scheduled rotation stored but engine is stale: {}", e)
                    }
                    Ok(TickOutcome::Unchanged) | Ok(TickOutcome::Skipped) => {}
                    Err(e) => warn!("Scheduled rotation failed: {}", e),
                }
            }
        });

        let sweeping = panel;
        scheduler.spawn("log-sweep", config.log_sweep_interval(), move || {
            let panel = sweeping.clone();
            async move {
                if let Err(e) = panel.sweep_logs().await {
                    warn!("Log sweep failed: {}", e);
                }
            }
        });

        scheduler
    }

    /// Run `job` every `interval` until shutdown. The first run is immediate.
    pub fn spawn<F, Fut>(&mut self, name: &'static str, interval: Duration, mut job: F)
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let shutdown = self.shutdown.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    biased;

                    _ = shutdown.cancelled() => {
                        debug!("{} job shutting down", name);
                        return;
                    }

                    _ = ticker.tick() => {
                        tokio::select! {
                            biased;
                            _ = shutdown.cancelled() => return,
                            _ = job() => {}
                        }
                    }
                }
            }
        });

        debug!("Scheduled {} every {:?}", name, interval);
        self.jobs.push((name, handle));
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Cancel every job and wait for them to finish
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        self.join().await;
    }

    /// Wait for every job to finish
    pub async fn join(self) {
        for (name, handle) in self.jobs {
            if let Err(e) = handle.await {
                warn!("{} job ended abnormally: {}", name, e);
            }
        }
    }
}
