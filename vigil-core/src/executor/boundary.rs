use std::fmt;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use vigil_model::{BatchRequest, CompletionPayload, WorkerFrame};

use crate::error::BatchError;

/// How a boundary finished a batch it was able to run.
#[derive(Debug, Clone, PartialEq)]
pub enum BatchOutcome {
    /// The batch ran to completion, or failed session setup as a unit
    /// (`CompletionStatus::Failed`).
    Finished(CompletionPayload),
    /// Terminated on request. Results already reported through
    /// `CheckCompleted` frames stand; the in-flight check is lost.
    Cancelled,
}

/// An execution context that keeps one batch's client libraries away from
/// every other batch's.
///
/// Implementations forward progress frames on `frames` while the batch runs
/// and must stop promptly once `cancel` fires.
#[async_trait]
pub trait IsolationBoundary: Send + Sync + fmt::Debug {
    fn name(&self) -> &'static str;

    async fn execute(
        &self,
        request: BatchRequest,
        frames: mpsc::UnboundedSender<WorkerFrame>,
        cancel: CancellationToken,
    ) -> Result<BatchOutcome, BatchError>;
}
