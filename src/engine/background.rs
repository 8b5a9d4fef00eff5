//! Background worker: periodic sync and merge-threshold checks

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{bounded, never, select, tick, Receiver, Sender};
use tracing::{debug, warn};

use crate::error::{CaskError, Result};

use super::state::Core;

/// Handle to the worker thread; dropping the sender tells it to exit
pub(crate) struct BackgroundWorker {
    shutdown: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl BackgroundWorker {
    /// Start the worker, or return `None` when no periodic duty is configured
    pub(crate) fn spawn(core: Arc<Core>) -> Result<Option<Self>> {
        let sync_interval = core.config.sync_interval;
        let merge_interval = core.config.merge_check_interval;
        if sync_interval.is_none() && merge_interval.is_none() {
            return Ok(None);
        }

        let (shutdown_tx, shutdown_rx) = bounded::<()>(0);
        let handle = thread::Builder::new()
            .name("shardcask-bg".to_string())
            .spawn(move || run(core, shutdown_rx, sync_interval, merge_interval))?;

        Ok(Some(Self {
            shutdown: Some(shutdown_tx),
            handle: Some(handle),
        }))
    }

    /// Signal the worker and wait for it to finish its current duty
    pub(crate) fn stop(&mut self) {
        self.shutdown.take();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("background worker panicked");
            }
        }
    }
}

impl Drop for BackgroundWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

fn ticker(interval: Option<Duration>) -> Receiver<std::time::Instant> {
    interval.map(tick).unwrap_or_else(never)
}

fn run(
    core: Arc<Core>,
    shutdown: Receiver<()>,
    sync_interval: Option<Duration>,
    merge_interval: Option<Duration>,
) {
    let sync_tick = ticker(sync_interval);
    let merge_tick = ticker(merge_interval);
    debug!("background worker started");

    loop {
        select! {
            recv(shutdown) -> _ => break,
            recv(sync_tick) -> _ => {
                if let Err(e) = core.sync() {
                    warn!(error = %e, "background sync failed");
                }
            }
            recv(merge_tick) -> _ => check_merge(&core),
        }
    }

    debug!("background worker stopped");
}

fn check_merge(core: &Core) {
    let ratio = match core.reclaim_ratio() {
        Ok(ratio) => ratio,
        Err(e) => {
            warn!(error = %e, "failed to compute reclaim ratio");
            return;
        }
    };
    if ratio <= 0.0 || ratio < core.config.merge_ratio {
        return;
    }

    debug!(ratio, threshold = core.config.merge_ratio, "reclaim threshold reached");
    match core.merge(true) {
        Ok(()) | Err(CaskError::MergeInProgress) | Err(CaskError::MergeRatioUnreached { .. }) => {}
        Err(e) => warn!(error = %e, "background merge failed"),
    }
}
