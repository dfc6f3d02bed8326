//! Sequential execution of one batch inside a boundary.

use std::{any::Any, panic::AssertUnwindSafe, sync::Arc, time::Instant};

use chrono::Utc;
use futures::FutureExt;
use tokio::sync::mpsc;
use tracing::{info, instrument, warn};
use vigil_model::{
    BatchCheck, BatchRequest, CheckCounters, CheckResult, CheckStatus, CompletionPayload,
    WorkerFrame,
};

use super::{
    context::BatchContext,
    runner::{CheckOutcome, CheckRunner},
    session::SessionProvider,
};
use crate::error::CheckError;

/// Establishes a batch's sessions, then runs its checks one by one.
///
/// Used directly by the in-process boundary and by the worker binary behind
/// the process boundary.
#[derive(Debug, Clone)]
pub struct BatchRunner {
    sessions: Arc<dyn SessionProvider>,
    runner: Arc<dyn CheckRunner>,
}

impl BatchRunner {
    pub fn new(sessions: Arc<dyn SessionProvider>, runner: Arc<dyn CheckRunner>) -> Self {
        Self { sessions, runner }
    }

    /// Run `request`, reporting every step on `frames`.
    ///
    /// Check failures become `Error` results and never stop the batch. A
    /// session failure fails the batch as a unit with no check attempted.
    /// The final frame is always [`WorkerFrame::Finished`].
    #[instrument(skip(self, request, frames), fields(batch = %request.batch.name, checks = request.batch.len()))]
    pub async fn run(
        &self,
        request: &BatchRequest,
        frames: mpsc::UnboundedSender<WorkerFrame>,
    ) -> CompletionPayload {
        let payload = self.run_inner(request, &frames).await;
        let _ = frames.send(WorkerFrame::Finished {
            payload: payload.clone(),
        });
        payload
    }

    async fn run_inner(
        &self,
        request: &BatchRequest,
        frames: &mpsc::UnboundedSender<WorkerFrame>,
    ) -> CompletionPayload {
        let batch = &request.batch;
        let sessions = match self.sessions.establish(&batch.credentials).await {
            Ok(sessions) => sessions,
            Err(err) => {
                warn!(batch = %batch.name, error = %err, "session setup failed; skipping batch");
                let error = err.to_string();
                let _ = frames.send(WorkerFrame::SetupFailed {
                    error: error.clone(),
                });
                return CompletionPayload::failed(Vec::new(), error);
            }
        };
        let _ = frames.send(WorkerFrame::SessionsReady);

        let context = BatchContext::new(request, sessions);
        let mut counters = CheckCounters::default();
        let mut results = Vec::with_capacity(batch.len());

        for check in &batch.checks {
            let _ = frames.send(WorkerFrame::CheckStarted {
                check_id: check.id.clone(),
            });

            let result = self.run_check(request, check, &context).await;
            counters.record(result.status);
            let _ = frames.send(WorkerFrame::CheckCompleted {
                result: result.clone(),
                counters,
            });
            results.push(result);
        }

        info!(
            batch = %batch.name,
            passed = counters.passed,
            failed = counters.failed,
            errors = counters.errors,
            "batch finished"
        );
        CompletionPayload::success(results)
    }

    async fn run_check(
        &self,
        request: &BatchRequest,
        check: &BatchCheck,
        context: &BatchContext,
    ) -> CheckResult {
        let start_time = Utc::now();
        let started = Instant::now();

        let outcome = match &check.rejection {
            Some(reason) => Err(CheckError::Failed(reason.clone())),
            None => AssertUnwindSafe(self.runner.run(check, context))
                .catch_unwind()
                .await
                .unwrap_or_else(|panic| Err(CheckError::Panicked(panic_message(panic)))),
        };

        let (status, details, error) = match outcome {
            Ok(CheckOutcome {
                status,
                details,
                error,
            }) => (status, details, error),
            Err(err) => {
                warn!(check = %check.id, error = %err, "check failed");
                (CheckStatus::Error, Vec::new(), Some(err.to_string()))
            }
        };

        CheckResult {
            scan_id: request.scan_id,
            check_id: check.id.clone(),
            status,
            category: request.batch.group,
            tenant_id: request.tenant_id.clone(),
            start_time,
            end_time: Utc::now(),
            duration: started.elapsed().as_secs_f64(),
            details,
            error,
            metadata: check.metadata.clone(),
        }
    }
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        return (*message).to_string();
    }
    if let Some(message) = panic.downcast_ref::<String>() {
        return message.clone();
    }
    "unknown panic".to_string()
}
