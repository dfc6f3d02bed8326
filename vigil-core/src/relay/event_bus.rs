use std::{
    collections::VecDeque,
    sync::atomic::{AtomicU64, Ordering},
};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use vigil_model::ScanStreamEventType;

pub const DEFAULT_HISTORY_CAPACITY: usize = 512;
pub const DEFAULT_BROADCAST_CAPACITY: usize = 1024;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanEventFrame {
    pub sequence: u64,
    pub emitted_at: DateTime<Utc>,
    pub event: ScanStreamEventType,
    pub payload: serde_json::Value,
}

impl ScanEventFrame {
    /// A `status` frame carrying a terminal status ends a subscription.
    pub fn is_terminal(&self) -> bool {
        self.event == ScanStreamEventType::Status
            && self
                .payload
                .get("status")
                .and_then(|status| status.as_str())
                .is_some_and(|status| matches!(status, "completed" | "failed" | "cancelled"))
    }
}

/// Per-scan live event fan-out with a bounded replay history.
#[derive(Debug)]
pub struct ScanEventBus {
    tx: broadcast::Sender<ScanEventFrame>,
    history: Mutex<VecDeque<ScanEventFrame>>,
    history_capacity: usize,
    sequence: AtomicU64,
}

impl Default for ScanEventBus {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY, DEFAULT_BROADCAST_CAPACITY)
    }
}

impl ScanEventBus {
    pub fn new(history_capacity: usize, broadcast_capacity: usize) -> Self {
        let history_capacity = history_capacity.max(1);
        let broadcast_capacity = broadcast_capacity.max(1);
        let (tx, _rx) = broadcast::channel(broadcast_capacity);
        Self {
            tx,
            history: Mutex::new(VecDeque::with_capacity(history_capacity)),
            history_capacity,
            sequence: AtomicU64::new(0),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ScanEventFrame> {
        self.tx.subscribe()
    }

    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub fn last_sequence(&self) -> u64 {
        self.sequence.load(Ordering::Acquire)
    }

    pub fn publish(&self, event: ScanStreamEventType, payload: serde_json::Value) -> ScanEventFrame {
        // History and sequence advance together so replay never skips.
        let mut history = self.history.lock();
        let sequence = self.sequence.fetch_add(1, Ordering::AcqRel) + 1;
        let frame = ScanEventFrame {
            sequence,
            emitted_at: Utc::now(),
            event,
            payload,
        };
        if history.len() == self.history_capacity {
            history.pop_front();
        }
        history.push_back(frame.clone());
        let _ = self.tx.send(frame.clone());
        frame
    }

    pub fn history_since_sequence(&self, sequence: u64) -> Vec<ScanEventFrame> {
        self.history
            .lock()
            .iter()
            .filter(|frame| frame.sequence > sequence)
            .cloned()
            .collect()
    }

    /// History snapshot plus a receiver positioned right after it.
    pub fn subscribe_with_history(
        &self,
        since: u64,
    ) -> (Vec<ScanEventFrame>, broadcast::Receiver<ScanEventFrame>) {
        let history = self.history.lock();
        let rx = self.tx.subscribe();
        let frames = history
            .iter()
            .filter(|frame| frame.sequence > since)
            .cloned()
            .collect();
        (frames, rx)
    }
}
