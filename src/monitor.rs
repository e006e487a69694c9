//! Snapshot-evaluation loop: the producer side of the pipeline
//!
//! Pulls one snapshot per tick from an external [`SnapshotSource`],
//! evaluates it through the rule engine, and appends every resulting
//! event to the ledger. Storage failures are logged and the loop
//! continues with its next cycle — no failure is fatal to the process.

use crate::engine::RuleEngine;
use crate::error::Result;
use crate::ledger::EvidenceLedger;
use crate::types::Snapshot;
use async_trait::async_trait;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Seam to the external telemetry producers
///
/// Implementations sample the platform and assemble one snapshot;
/// returning `None` skips the tick (the sampler logs its own trouble).
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    async fn capture(&self) -> Option<Snapshot>;
}

/// Periodic capture → evaluate → append driver
pub struct Monitor {
    source: Arc<dyn SnapshotSource>,
    engine: Arc<RuleEngine>,
    ledger: Arc<EvidenceLedger>,
    sample_interval: Duration,
    task: Mutex<MonitorTask>,
}

struct MonitorTask {
    handle: Option<JoinHandle<()>>,
    stop_tx: Option<watch::Sender<bool>>,
}

impl Monitor {
    pub fn new(
        source: Arc<dyn SnapshotSource>,
        engine: Arc<RuleEngine>,
        ledger: Arc<EvidenceLedger>,
        sample_interval: Duration,
    ) -> Self {
        Self {
            source,
            engine,
            ledger,
            sample_interval,
            task: Mutex::new(MonitorTask {
                handle: None,
                stop_tx: None,
            }),
        }
    }

    /// Start the evaluation loop; returns false (no-op) if already running
    pub fn start(&self) -> bool {
        let mut task = lock_recover(&self.task);
        if task
            .handle
            .as_ref()
            .map_or(false, |handle| !handle.is_finished())
        {
            return false;
        }

        let (stop_tx, stop_rx) = watch::channel(false);
        let source = Arc::clone(&self.source);
        let engine = Arc::clone(&self.engine);
        let ledger = Arc::clone(&self.ledger);
        let sample_interval = self.sample_interval;
        task.handle = Some(tokio::spawn(async move {
            run_loop(source, engine, ledger, sample_interval, stop_rx).await;
        }));
        task.stop_tx = Some(stop_tx);
        tracing::info!("Snapshot evaluation loop started");
        true
    }

    /// Cooperatively stop the loop, aborting any in-flight sleep
    pub fn stop(&self) {
        let mut task = lock_recover(&self.task);
        if let Some(stop_tx) = task.stop_tx.take() {
            let _ = stop_tx.send(true);
            tracing::info!("Snapshot evaluation loop stopping");
        }
    }

    /// Run one capture → evaluate → append cycle, returning the number
    /// of events appended
    ///
    /// Append failures after the first event still try the rest of the
    /// batch; the first error is returned once every event was offered
    /// to the ledger.
    pub async fn sample_now(&self) -> Result<usize> {
        sample_once(self.source.as_ref(), &self.engine, &self.ledger).await
    }
}

async fn run_loop(
    source: Arc<dyn SnapshotSource>,
    engine: Arc<RuleEngine>,
    ledger: Arc<EvidenceLedger>,
    sample_interval: Duration,
    mut stop_rx: watch::Receiver<bool>,
) {
    while !*stop_rx.borrow() {
        if let Err(e) = sample_once(source.as_ref(), &engine, &ledger).await {
            tracing::warn!(error = %e, "Evaluation cycle failed, continuing");
        }

        tokio::select! {
            _ = stop_rx.changed() => break,
            _ = tokio::time::sleep(sample_interval) => {}
        }
    }
}

async fn sample_once(
    source: &dyn SnapshotSource,
    engine: &RuleEngine,
    ledger: &EvidenceLedger,
) -> Result<usize> {
    let Some(snapshot) = source.capture().await else {
        return Ok(0);
    };

    let events = engine.evaluate(&snapshot);
    let mut appended = 0usize;
    let mut first_error = None;
    for event in &events {
        match ledger.append(event).await {
            Ok(()) => appended += 1,
            Err(e) => {
                tracing::error!(
                    event_id = %event.id,
                    error = %e,
                    "Failed to persist event"
                );
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        }
    }

    match first_error {
        Some(e) => Err(e),
        None => Ok(appended),
    }
}

fn lock_recover<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
