//! Periodic retention cleanup.
//!
//! Drops month partitions older than the store's retention horizon on a
//! fixed cadence. The first tick fires immediately, so startup performs a
//! cleanup pass before the first interval elapses. Failures are logged and
//! never abort the task.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::interval;
use tracedb_store::TraceStore;
use tracing::{debug, warn};

/// Default interval between cleanup passes.
const CLEANUP_INTERVAL: Duration = Duration::from_secs(3600);

/// Background retention job over a shared store.
pub struct RetentionJob {
    store: Arc<TraceStore>,
    interval: Duration,
}

impl RetentionJob {
    /// Create a job with the default hourly cadence.
    pub fn new(store: Arc<TraceStore>) -> Self {
        Self {
            store,
            interval: CLEANUP_INTERVAL,
        }
    }

    /// Override the cadence.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    fn run_cycle(&self) {
        match self.store.cleanup() {
            Ok(()) => debug!("retention cleanup complete"),
            Err(error) => warn!(%error, "retention cleanup failed"),
        }
    }

    /// Start the background task. Returns a handle that can be aborted.
    pub fn start(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval(self.interval);
            loop {
                ticker.tick().await;
                self.run_cycle();
            }
        })
    }
}
