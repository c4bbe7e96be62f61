//! Operation timing statistics with an explicit reporting lifecycle.
//!
//! The sink only observes; nothing in the pipeline reads it back. A
//! reporting thread, started with [`StatisticsSink::start`], logs the
//! aggregated counts at a fixed interval until [`StatisticsSink::stop`].

use std::collections::BTreeMap;
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use serde::Serialize;

use carrel_core::{RegistryError, RegistryResult};

use crate::operation::Operation;

pub const DEFAULT_REPORT_INTERVAL: Duration = Duration::from_secs(60);

/// Aggregated timings for one operation kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OperationStats {
    pub count: u64,
    pub total_micros: u64,
    pub max_micros: u64,
}

impl OperationStats {
    pub fn mean_micros(&self) -> u64 {
        if self.count == 0 {
            0
        } else {
            self.total_micros / self.count
        }
    }
}

struct Worker {
    stop: Sender<()>,
    handle: JoinHandle<()>,
}

pub struct StatisticsSink {
    records: Mutex<BTreeMap<Operation, OperationStats>>,
    interval: Duration,
    worker: Mutex<Option<Worker>>,
}

impl Default for StatisticsSink {
    fn default() -> Self {
        Self::new(DEFAULT_REPORT_INTERVAL)
    }
}

impl StatisticsSink {
    pub fn new(interval: Duration) -> Self {
        Self {
            records: Mutex::new(BTreeMap::new()),
            interval,
            worker: Mutex::new(None),
        }
    }

    pub fn record(&self, operation: Operation, elapsed: Duration) {
        let micros = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX);
        let mut records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        let stats = records.entry(operation).or_default();
        stats.count += 1;
        stats.total_micros = stats.total_micros.saturating_add(micros);
        stats.max_micros = stats.max_micros.max(micros);
    }

    pub fn snapshot(&self) -> BTreeMap<Operation, OperationStats> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Log the current aggregates.
    pub fn report(&self) {
        for (operation, stats) in self.snapshot() {
            tracing::info!(
                operation = %operation,
                count = stats.count,
                mean_micros = stats.mean_micros(),
                max_micros = stats.max_micros,
                "Registry operation statistics"
            );
        }
    }

    /// Start the reporting thread. Starting twice is a no-op.
    pub fn start(self: &Arc<Self>) -> RegistryResult<()> {
        let mut worker = self.worker.lock().unwrap_or_else(PoisonError::into_inner);
        if worker.is_some() {
            return Ok(());
        }
        let (stop, signal) = mpsc::channel::<()>();
        let sink: Weak<Self> = Arc::downgrade(self);
        let interval = self.interval;
        let handle = thread::Builder::new()
            .name("carrel-statistics".to_string())
            .spawn(move || loop {
                match signal.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => match sink.upgrade() {
                        Some(sink) => sink.report(),
                        None => break,
                    },
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            })
            .map_err(|e| RegistryError::server_content(format!("statistics thread: {}", e)))?;
        *worker = Some(Worker { stop, handle });
        tracing::debug!(interval_secs = interval.as_secs(), "Statistics reporting started");
        Ok(())
    }

    /// Stop and join the reporting thread.
    pub fn stop(&self) {
        let worker = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(worker) = worker {
            let _ = worker.stop.send(());
            if worker.handle.join().is_err() {
                tracing::warn!("Statistics thread panicked");
            }
            tracing::debug!("Statistics reporting stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}

impl Drop for StatisticsSink {
    fn drop(&mut self) {
        // Not joined: the last reference may be released on the reporting thread.
        if let Some(worker) = self
            .worker
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            drop(worker.stop);
        }
    }
}
