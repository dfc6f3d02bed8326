use std::{
    collections::VecDeque,
    fmt,
    str::FromStr,
    sync::atomic::{AtomicBool, AtomicU64, Ordering},
};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;

/// Which item to discard when the queue is full.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OverflowPolicy {
    /// Evict the oldest queued item; the newest state always gets through.
    #[default]
    DropOldest,
    /// Refuse the incoming item.
    DropNewest,
}

impl fmt::Display for OverflowPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OverflowPolicy::DropOldest => f.write_str("drop-oldest"),
            OverflowPolicy::DropNewest => f.write_str("drop-newest"),
        }
    }
}

impl FromStr for OverflowPolicy {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "drop-oldest" => Ok(Self::DropOldest),
            "drop-newest" => Ok(Self::DropNewest),
            other => Err(format!("unknown overflow policy `{other}`")),
        }
    }
}

/// Bounded multi-producer queue whose `push` never waits.
#[derive(Debug)]
pub struct OutboundQueue<T> {
    items: Mutex<VecDeque<T>>,
    capacity: usize,
    policy: OverflowPolicy,
    notify: Notify,
    closed: AtomicBool,
    dropped: AtomicU64,
}

impl<T> OutboundQueue<T> {
    pub fn new(capacity: usize, policy: OverflowPolicy) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            policy,
            notify: Notify::new(),
            closed: AtomicBool::new(false),
            dropped: AtomicU64::new(0),
        }
    }

    /// Enqueue `item`; returns `false` when an item was discarded.
    pub fn push(&self, item: T) -> bool {
        if self.closed.load(Ordering::Acquire) {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return false;
        }
        let accepted_without_loss = {
            let mut items = self.items.lock();
            if items.len() < self.capacity {
                items.push_back(item);
                true
            } else {
                match self.policy {
                    OverflowPolicy::DropOldest => {
                        items.pop_front();
                        items.push_back(item);
                    }
                    OverflowPolicy::DropNewest => {}
                }
                false
            }
        };
        if !accepted_without_loss {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        self.notify.notify_one();
        accepted_without_loss
    }

    /// Wait for the next item. `None` once closed and drained.
    pub async fn pop(&self) -> Option<T> {
        loop {
            let notified = self.notify.notified();
            if let Some(item) = self.items.lock().pop_front() {
                return Some(item);
            }
            if self.closed.load(Ordering::Acquire) {
                return None;
            }
            notified.await;
        }
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{sync::Arc, time::Duration};

    #[tokio::test]
    async fn drop_oldest_keeps_the_newest_items() {
        let queue = OutboundQueue::new(2, OverflowPolicy::DropOldest);
        assert!(queue.push(1));
        assert!(queue.push(2));
        assert!(!queue.push(3));
        assert_eq!(queue.dropped(), 1);
        assert_eq!(queue.pop().await, Some(2));
        assert_eq!(queue.pop().await, Some(3));
    }

    #[tokio::test]
    async fn drop_newest_keeps_the_queued_items() {
        let queue = OutboundQueue::new(2, OverflowPolicy::DropNewest);
        queue.push(1);
        queue.push(2);
        assert!(!queue.push(3));
        assert_eq!(queue.pop().await, Some(1));
        assert_eq!(queue.pop().await, Some(2));
        assert_eq!(queue.len(), 0);
    }

    #[tokio::test]
    async fn pop_wakes_on_push_and_ends_after_close() {
        let queue = Arc::new(OutboundQueue::new(4, OverflowPolicy::DropOldest));
        let consumer = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move {
                let mut seen = Vec::new();
                while let Some(item) = queue.pop().await {
                    seen.push(item);
                }
                seen
            })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        queue.push("a");
        queue.push("b");
        queue.close();
        assert!(!queue.push("late"));

        let seen = tokio::time::timeout(Duration::from_secs(1), consumer)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(seen, vec!["a", "b"]);
    }

    #[test]
    fn policies_parse_from_config_spellings() {
        assert_eq!("drop_newest".parse(), Ok(OverflowPolicy::DropNewest));
        assert_eq!("Drop-Oldest".parse(), Ok(OverflowPolicy::DropOldest));
        assert!("drop".parse::<OverflowPolicy>().is_err());
    }
}
