use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::warn;
use vigil_model::{BatchRequest, WorkerFrame};

use super::{
    batch_runner::BatchRunner,
    boundary::{BatchOutcome, IsolationBoundary},
};
use crate::error::BatchError;

/// Runs the batch on the coordinator's runtime.
///
/// Offers no library isolation. Suitable for tests and for deployments whose
/// checks are all external processes or all share one group.
#[derive(Debug, Clone)]
pub struct InProcessBoundary {
    runner: BatchRunner,
    timeout: Duration,
}

impl InProcessBoundary {
    pub fn new(runner: BatchRunner, timeout: Duration) -> Self {
        Self { runner, timeout }
    }
}

#[async_trait]
impl IsolationBoundary for InProcessBoundary {
    fn name(&self) -> &'static str {
        "in-process"
    }

    async fn execute(
        &self,
        request: BatchRequest,
        frames: mpsc::UnboundedSender<WorkerFrame>,
        cancel: CancellationToken,
    ) -> Result<BatchOutcome, BatchError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Ok(BatchOutcome::Cancelled),
            payload = self.runner.run(&request, frames) => Ok(BatchOutcome::Finished(payload)),
            _ = tokio::time::sleep(self.timeout) => {
                warn!(batch = %request.batch.name, timeout = ?self.timeout, "in-process batch timed out");
                Err(BatchError::Timeout(self.timeout))
            }
        }
    }
}
