//! Fire-and-forget delivery of progress events to a caller-supplied URL.

use std::{sync::Arc, time::Duration};

use tokio::task::JoinHandle;
use tracing::{debug, info};
use url::Url;
use vigil_model::ProgressEvent;

use super::outbound::{OutboundQueue, OverflowPolicy};

pub const DEFAULT_CALLBACK_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

#[derive(Debug, Clone)]
pub struct CallbackSettings {
    pub timeout: Duration,
    pub queue_capacity: usize,
    pub overflow: OverflowPolicy,
}

impl Default for CallbackSettings {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_CALLBACK_TIMEOUT,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            overflow: OverflowPolicy::default(),
        }
    }
}

/// One POST per event, sent from a background task so check execution
/// never waits on the network. Failures are logged and dropped.
#[derive(Debug)]
pub struct CallbackDispatcher {
    queue: Arc<OutboundQueue<ProgressEvent>>,
    task: JoinHandle<()>,
}

impl CallbackDispatcher {
    pub fn spawn(http: reqwest::Client, url: Url, settings: &CallbackSettings) -> Self {
        let queue = Arc::new(OutboundQueue::new(
            settings.queue_capacity,
            settings.overflow,
        ));
        let timeout = settings.timeout;
        let task = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move {
                while let Some(event) = queue.pop().await {
                    deliver(&http, &url, timeout, &event).await;
                }
            })
        };
        Self { queue, task }
    }

    pub fn enqueue(&self, event: ProgressEvent) {
        if !self.queue.push(event) {
            debug!(dropped = self.queue.dropped(), "progress callback queue overflow");
        }
    }

    /// Stop accepting events and give queued ones up to `grace` to drain.
    pub async fn shutdown(self, grace: Duration) {
        self.queue.close();
        let dropped = self.queue.dropped();
        let mut task = self.task;
        if tokio::time::timeout(grace, &mut task).await.is_err() {
            task.abort();
        }
        if dropped > 0 {
            info!(dropped, "progress callbacks dropped");
        }
    }
}

async fn deliver(http: &reqwest::Client, url: &Url, timeout: Duration, event: &ProgressEvent) {
    let result = http
        .post(url.clone())
        .timeout(timeout)
        .json(event)
        .send()
        .await
        .and_then(|response| response.error_for_status());
    if let Err(err) = result {
        debug!(scan_id = %event.scan_id, error = %err, "progress callback failed");
    }
}
