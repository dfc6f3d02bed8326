//! Progress relay: one per scan.
//!
//! Every update goes to the scan's [`ScanEventBus`] for live subscribers and,
//! when the caller supplied an address, to the [`CallbackDispatcher`]. Both
//! paths are best effort; durable state lives in the scan store.

pub mod callback;
pub mod event_bus;
pub mod outbound;

use std::{
    sync::atomic::{AtomicU8, Ordering},
    time::Duration,
};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;
use vigil_model::{
    ProgressEvent, Scan, ScanId, ScanStreamEventType, ServiceGroup, StatusUpdate,
    progress_percentage,
};

pub use callback::{CallbackDispatcher, CallbackSettings};
pub use event_bus::{ScanEventBus, ScanEventFrame};
pub use outbound::{OutboundQueue, OverflowPolicy};

#[derive(Debug, Clone)]
pub struct RelaySettings {
    pub history_capacity: usize,
    pub broadcast_capacity: usize,
    pub callback: CallbackSettings,
    /// How long queued callbacks may keep draining once a scan ends.
    pub drain_grace: Duration,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            history_capacity: event_bus::DEFAULT_HISTORY_CAPACITY,
            broadcast_capacity: event_bus::DEFAULT_BROADCAST_CAPACITY,
            callback: CallbackSettings::default(),
            drain_grace: Duration::from_secs(10),
        }
    }
}

/// Outcome label of one batch in `batch-completed` events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Success,
    SetupFailed,
    Aborted,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchCompleted {
    pub scan_id: ScanId,
    pub batch: String,
    pub group: ServiceGroup,
    pub status: BatchStatus,
    pub checks_executed: u32,
    pub error: Option<String>,
}

#[derive(Debug)]
pub struct ProgressRelay {
    bus: ScanEventBus,
    callback: Mutex<Option<CallbackDispatcher>>,
    percentage: AtomicU8,
    drain_grace: Duration,
}

impl ProgressRelay {
    pub fn new(settings: &RelaySettings, callback: Option<CallbackDispatcher>) -> Self {
        Self {
            bus: ScanEventBus::new(settings.history_capacity, settings.broadcast_capacity),
            callback: Mutex::new(callback),
            percentage: AtomicU8::new(0),
            drain_grace: settings.drain_grace,
        }
    }

    pub fn bus(&self) -> &ScanEventBus {
        &self.bus
    }

    /// Progress for `completed` of `total`, never lower than any value this
    /// relay has returned before.
    pub fn advance(&self, completed: u32, total: u32) -> u8 {
        let candidate = progress_percentage(completed, total);
        let previous = self.percentage.fetch_max(candidate, Ordering::AcqRel);
        previous.max(candidate)
    }

    pub fn percentage(&self) -> u8 {
        self.percentage.load(Ordering::Acquire)
    }

    pub fn scan_started(&self, scan: &Scan, batches: &[(String, usize)]) {
        let batches: Vec<_> = batches
            .iter()
            .map(|(name, checks)| json!({ "name": name, "checks": checks }))
            .collect();
        self.bus.publish(
            ScanStreamEventType::ScanStarted,
            json!({
                "scan_id": scan.id,
                "technology": scan.technology,
                "total_checks": scan.total_checks,
                "batches": batches,
                "warnings": scan.warnings,
                "started_at": scan.started_at,
            }),
        );
        self.callback(ProgressEvent::from_scan(scan));
    }

    /// Publish the scan's current state as a `status` event and a callback.
    pub fn status(&self, scan: &Scan) {
        let update = StatusUpdate::from_scan(scan);
        match serde_json::to_value(&update) {
            Ok(payload) => {
                self.bus.publish(ScanStreamEventType::Status, payload);
            }
            Err(err) => debug!(error = %err, "failed to encode status update"),
        }
        self.callback(update.progress);
    }

    pub fn results_inserted(&self, scan: &Scan, batch: &str, inserted: usize) {
        self.bus.publish(
            ScanStreamEventType::ResultsInserted,
            json!({
                "scan_id": scan.id,
                "batch": batch,
                "inserted": inserted,
                "passed": scan.passed,
                "failed": scan.failed,
                "errors": scan.errors,
                "completed_checks": scan.completed_checks(),
            }),
        );
    }

    pub fn batch_completed(&self, report: &BatchCompleted) {
        match serde_json::to_value(report) {
            Ok(payload) => {
                self.bus
                    .publish(ScanStreamEventType::BatchCompleted, payload);
            }
            Err(err) => debug!(error = %err, "failed to encode batch report"),
        }
    }

    fn callback(&self, event: ProgressEvent) {
        if let Some(dispatcher) = self.callback.lock().as_ref() {
            dispatcher.enqueue(event);
        }
    }

    /// Detach and drain the callback dispatcher. Live subscribers keep their
    /// history.
    pub async fn close(&self) {
        let dispatcher = self.callback.lock().take();
        if let Some(dispatcher) = dispatcher {
            dispatcher.shutdown(self.drain_grace).await;
        }
    }
}
