use std::sync::Arc;

use chrono::Utc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, instrument, warn};
use vigil_model::{
    Batch, BatchRequest, CheckCounters, CheckResult, Scan, ScanStatus, WorkerFrame,
};

use super::{
    ScanRequest,
    manager::{ScanManagerInner, ScanRun},
};
use crate::{
    executor::BatchOutcome,
    registry::RegistryQuery,
    relay::{BatchCompleted, BatchStatus, ProgressRelay},
};

/// How the coordinator leaves the batch loop.
enum Halt {
    Cancelled,
    Fatal(String),
}

impl ScanManagerInner {
    /// Walk one scan from `pending` to a terminal state.
    #[instrument(skip_all, fields(scan_id = %scan.id))]
    pub(super) async fn drive(&self, run: Arc<ScanRun>, mut scan: Scan, request: ScanRequest) -> Scan {
        let relay = Arc::clone(&run.relay);

        if run.cancel.is_cancelled() {
            return self.finish(&run, scan, ScanStatus::Cancelled, None).await;
        }

        let mut query = RegistryQuery::new(request.technology.clone());
        if let Some(ids) = request.check_ids.clone() {
            query = query.with_check_ids(ids);
        }
        if let Some(severity) = request.min_severity {
            query = query.with_min_severity(severity);
        }

        let registry = self.registry.clone();
        let loaded = match tokio::task::spawn_blocking(move || registry.load(&query)).await {
            Ok(Ok(loaded)) => loaded,
            Ok(Err(err)) => {
                error!(error = %err, "check registry unavailable");
                return self
                    .finish(&run, scan, ScanStatus::Failed, Some(err.to_string()))
                    .await;
            }
            Err(err) => {
                error!(error = %err, "check registry task failed");
                return self
                    .finish(&run, scan, ScanStatus::Failed, Some(err.to_string()))
                    .await;
            }
        };

        for warning in &loaded.warnings {
            warn!(%warning, "registry warning");
            scan.warnings.push(warning.to_string());
        }

        let plan = self.planner.plan(&loaded.checks, &request.credentials);
        for warning in &plan.warnings {
            warn!(%warning, "classification warning");
            scan.warnings.push(warning.to_string());
        }

        if run.cancel.is_cancelled() {
            return self.finish(&run, scan, ScanStatus::Cancelled, None).await;
        }

        scan.status = ScanStatus::Running;
        scan.started_at = Some(Utc::now());
        scan.total_checks = u32::try_from(plan.total_checks()).unwrap_or(u32::MAX);
        self.persist(&scan).await;

        let summary: Vec<(String, usize)> = plan
            .batches
            .iter()
            .map(|batch| (batch.name.clone(), batch.len()))
            .collect();
        info!(
            total_checks = scan.total_checks,
            batches = summary.len(),
            boundary = self.boundary.name(),
            "scan started"
        );
        relay.scan_started(&scan, &summary);
        relay.status(&scan);

        let mut setup_failures = Vec::new();
        let mut halt = None;

        for batch in plan.batches {
            if run.cancel.is_cancelled() {
                halt = Some(Halt::Cancelled);
                break;
            }

            match self.run_batch(&run, &mut scan, &request, batch).await {
                BatchEnd::Done => {}
                BatchEnd::SetupFailed(error) => setup_failures.push(error),
                BatchEnd::Halt(reason) => {
                    halt = Some(reason);
                    break;
                }
            }
        }

        let (status, error_message) = match halt {
            Some(Halt::Cancelled) => (ScanStatus::Cancelled, None),
            Some(Halt::Fatal(error)) => (ScanStatus::Failed, Some(error)),
            None if !setup_failures.is_empty() => {
                (ScanStatus::Failed, Some(setup_failures.join("; ")))
            }
            None => (ScanStatus::Completed, None),
        };
        self.finish(&run, scan, status, error_message).await
    }

    async fn run_batch(
        &self,
        run: &ScanRun,
        scan: &mut Scan,
        request: &ScanRequest,
        batch: Batch,
    ) -> BatchEnd {
        let relay = &run.relay;
        let name = batch.name.clone();
        let group = batch.group;
        let batch_request = BatchRequest {
            scan_id: scan.id,
            tenant_id: request.credentials.tenant_id.clone(),
            technology: request.technology.clone(),
            batch,
        };

        info!(batch = %name, checks = batch_request.batch.len(), "batch starting");

        let baseline = counters_of(scan);
        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = run.cancel.child_token();

        let (outcome, streamed) = tokio::join!(
            self.boundary.execute(batch_request, tx, cancel),
            self.consume_frames(relay, scan, baseline, rx),
        );

        let (results, end, status, error) = match outcome {
            Ok(BatchOutcome::Finished(payload)) if payload.is_success() => {
                (payload.results, BatchEnd::Done, BatchStatus::Success, None)
            }
            Ok(BatchOutcome::Finished(payload)) => {
                let error = payload
                    .error
                    .clone()
                    .unwrap_or_else(|| format!("batch {name} failed"));
                let results = if payload.results.is_empty() {
                    streamed
                } else {
                    payload.results
                };
                (
                    results,
                    BatchEnd::SetupFailed(format!("{name}: {error}")),
                    BatchStatus::SetupFailed,
                    Some(error),
                )
            }
            Ok(BatchOutcome::Cancelled) => (
                streamed,
                BatchEnd::Halt(Halt::Cancelled),
                BatchStatus::Cancelled,
                None,
            ),
            Err(err) => {
                error!(batch = %name, error = %err, "batch aborted");
                let message = format!("{name}: {err}");
                (
                    streamed,
                    BatchEnd::Halt(Halt::Fatal(message.clone())),
                    BatchStatus::Aborted,
                    Some(message),
                )
            }
        };

        let inserted = self.store_results(scan, &results).await;
        self.reconcile(relay, scan).await;
        relay.results_inserted(scan, &name, inserted);
        relay.batch_completed(&BatchCompleted {
            scan_id: scan.id,
            batch: name.clone(),
            group,
            status,
            checks_executed: u32::try_from(results.len()).unwrap_or(u32::MAX),
            error,
        });
        debug!(batch = %name, inserted, ?status, "batch finished");
        end
    }

    /// Apply live frames to the in-memory scan until the boundary drops its
    /// sender. Returns the results seen so far, for batches that never
    /// deliver a completion payload.
    async fn consume_frames(
        &self,
        relay: &ProgressRelay,
        scan: &mut Scan,
        baseline: CheckCounters,
        mut rx: mpsc::UnboundedReceiver<WorkerFrame>,
    ) -> Vec<CheckResult> {
        let mut streamed = Vec::new();
        while let Some(frame) = rx.recv().await {
            match frame {
                WorkerFrame::SessionsReady => debug!("batch sessions established"),
                WorkerFrame::CheckStarted { check_id } => {
                    scan.current_check = Some(check_id.to_string());
                    self.persist(scan).await;
                    relay.status(scan);
                }
                WorkerFrame::CheckCompleted { result, counters } => {
                    scan.apply_counters(&baseline.merged(counters));
                    scan.progress_percentage =
                        relay.advance(scan.completed_checks(), scan.total_checks);
                    streamed.push(result);
                    self.persist(scan).await;
                    relay.status(scan);
                }
                WorkerFrame::SetupFailed { error } => {
                    warn!(%error, "batch setup failed");
                }
                WorkerFrame::Finished { .. } => {}
            }
        }
        streamed
    }

    async fn store_results(&self, scan: &Scan, results: &[CheckResult]) -> usize {
        if results.is_empty() {
            return 0;
        }
        match self.store.append_results(scan.id, results).await {
            Ok(inserted) => inserted,
            Err(err) => {
                error!(error = %err, "failed to persist batch results");
                0
            }
        }
    }

    /// Rebuild counters and progress from persisted results.
    async fn reconcile(&self, relay: &ProgressRelay, scan: &mut Scan) {
        match self.store.counters(scan.id).await {
            Ok(counters) => scan.apply_counters(&counters),
            Err(err) => warn!(error = %err, "failed to reconcile counters"),
        }
        scan.current_check = None;
        scan.progress_percentage = relay.advance(scan.completed_checks(), scan.total_checks);
        self.persist(scan).await;
    }

    async fn persist(&self, scan: &Scan) {
        if let Err(err) = self.store.update_scan(scan).await {
            warn!(error = %err, "failed to persist scan state");
        }
    }

    async fn finish(
        &self,
        run: &ScanRun,
        mut scan: Scan,
        status: ScanStatus,
        error_message: Option<String>,
    ) -> Scan {
        if !scan.status.can_transition_to(status) {
            warn!(from = %scan.status, to = %status, "ignoring invalid scan transition");
            self.unregister_run(run.scan_id).await;
            return scan;
        }

        scan.status = status;
        scan.current_check = None;
        scan.completed_at = Some(Utc::now());
        scan.error_message = error_message;
        self.persist(&scan).await;

        info!(
            target: "scan::summary",
            scan_id = %scan.id,
            status = %scan.status,
            total = scan.total_checks,
            passed = scan.passed,
            failed = scan.failed,
            errors = scan.errors,
            progress = scan.progress_percentage,
            "scan finished"
        );

        run.relay.status(&scan);
        self.unregister_run(run.scan_id).await;
        run.relay.close().await;
        scan
    }
}

enum BatchEnd {
    Done,
    SetupFailed(String),
    Halt(Halt),
}

fn counters_of(scan: &Scan) -> CheckCounters {
    CheckCounters {
        completed: scan.completed_checks(),
        passed: scan.passed,
        failed: scan.failed,
        errors: scan.errors,
        unknown: scan.unknown,
        skipped: scan.skipped,
    }
}
