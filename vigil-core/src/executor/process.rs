//! OS-process isolation: one `vigil-worker` child per batch.
//!
//! The coordinator writes the [`BatchRequest`] as one JSON line to the
//! child's stdin and reads NDJSON [`WorkerFrame`]s from its stdout. The child
//! logs to stderr, whose tail is kept for error reports.
//!
//! Each worker leads its own process group. Cancellation, timeouts and the
//! end of a batch kill the whole group, so check processes the worker started
//! never outlive it.

use std::{
    path::{Path, PathBuf},
    process::Stdio,
    time::Duration,
};

use async_trait::async_trait;
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    process::{Child, Command},
    sync::mpsc,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use vigil_model::{BatchRequest, CompletionPayload, WorkerFrame};

use super::{
    boundary::{BatchOutcome, IsolationBoundary},
    child::{kill_group, lead_process_group, read_tail},
};
use crate::error::BatchError;

pub const WORKER_BINARY: &str = "vigil-worker";
const STDERR_LIMIT: usize = 8 * 1024;

#[derive(Debug, Clone)]
pub struct ProcessBoundary {
    worker_path: PathBuf,
    timeout: Duration,
    extra_args: Vec<String>,
}

impl ProcessBoundary {
    pub fn new(worker_path: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            worker_path: worker_path.into(),
            timeout,
            extra_args: Vec::new(),
        }
    }

    /// Arguments appended to every worker invocation, e.g. `--config`.
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.extra_args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn worker_path(&self) -> &Path {
        &self.worker_path
    }

    /// Locate the worker binary next to the current executable, in the cargo
    /// target directory, or on `PATH`.
    pub fn discover_worker() -> Option<PathBuf> {
        let mut candidates = Vec::new();
        if let Ok(exe) = std::env::current_exe()
            && let Some(dir) = exe.parent()
        {
            candidates.push(dir.join(WORKER_BINARY));
        }
        candidates.extend(
            [
                "./target/debug/vigil-worker",
                "./target/release/vigil-worker",
                "/usr/local/bin/vigil-worker",
            ]
            .map(PathBuf::from),
        );

        if let Some(found) = candidates.into_iter().find(|path| path.is_file()) {
            debug!(path = %found.display(), "found worker binary");
            return Some(found);
        }
        which::which(WORKER_BINARY).ok()
    }

    fn spawn(&self) -> Result<Child, BatchError> {
        let mut command = Command::new(&self.worker_path);
        lead_process_group(&mut command)
            .args(&self.extra_args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|err| {
                BatchError::Spawn(format!(
                    "failed to spawn {}: {err}",
                    self.worker_path.display()
                ))
            })
    }
}

#[async_trait]
impl IsolationBoundary for ProcessBoundary {
    fn name(&self) -> &'static str {
        "process"
    }

    #[instrument(skip_all, fields(batch = %request.batch.name, worker = %self.worker_path.display()))]
    async fn execute(
        &self,
        request: BatchRequest,
        frames: mpsc::UnboundedSender<WorkerFrame>,
        cancel: CancellationToken,
    ) -> Result<BatchOutcome, BatchError> {
        let mut line = serde_json::to_vec(&request)
            .map_err(|err| BatchError::Protocol(format!("failed to encode request: {err}")))?;
        line.push(b'\n');

        let mut child = self.spawn()?;
        let pgid = child.id();
        info!(pid = ?pgid, "worker started");

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| BatchError::Spawn("worker stdin unavailable".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| BatchError::Spawn("worker stdout unavailable".into()))?;
        let stderr = child.stderr.take();

        stdin
            .write_all(&line)
            .await
            .map_err(|err| BatchError::Crashed {
                status: "stdin closed".into(),
                stderr: err.to_string(),
            })?;
        drop(stdin);

        let stderr_task = tokio::spawn(read_tail(stderr, STDERR_LIMIT));
        let mut lines = BufReader::new(stdout).lines();
        let deadline = tokio::time::sleep(self.timeout);
        tokio::pin!(deadline);

        let mut finished: Option<CompletionPayload> = None;
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!("cancelling batch; terminating worker");
                    terminate(&mut child, pgid).await;
                    stderr_task.abort();
                    return Ok(BatchOutcome::Cancelled);
                }
                _ = &mut deadline => {
                    warn!(timeout = ?self.timeout, "worker timed out; terminating");
                    terminate(&mut child, pgid).await;
                    stderr_task.abort();
                    return Err(BatchError::Timeout(self.timeout));
                }
                next = lines.next_line() => match next {
                    Ok(Some(raw)) => {
                        let raw = raw.trim();
                        if raw.is_empty() {
                            continue;
                        }
                        match serde_json::from_str::<WorkerFrame>(raw) {
                            Ok(WorkerFrame::Finished { payload }) => {
                                finished = Some(payload);
                            }
                            Ok(frame) => {
                                let _ = frames.send(frame);
                            }
                            Err(err) => {
                                warn!(error = %err, line = raw, "ignoring unrecognised worker output");
                            }
                        }
                    }
                    Ok(None) => break,
                    Err(err) => {
                        terminate(&mut child, pgid).await;
                        stderr_task.abort();
                        return Err(BatchError::Protocol(format!("failed to read worker output: {err}")));
                    }
                }
            }
        }

        // Stdout closed: the worker is gone or about to be. Sweep checks it
        // left behind while the group id is still reserved.
        kill_group(pgid);
        let status = tokio::select! {
            status = child.wait() => status,
            _ = cancel.cancelled() => {
                terminate(&mut child, pgid).await;
                stderr_task.abort();
                return Ok(BatchOutcome::Cancelled);
            }
        };
        let stderr = stderr_task.await.unwrap_or_default();

        match (finished, status) {
            (Some(payload), Ok(status)) if status.success() => {
                debug!(checks = payload.checks_executed, "worker finished");
                Ok(BatchOutcome::Finished(payload))
            }
            (Some(payload), Ok(status)) => {
                // A completion payload was delivered; a dirty exit after it
                // does not invalidate the results.
                warn!(%status, "worker exited uncleanly after finishing");
                Ok(BatchOutcome::Finished(payload))
            }
            (None, Ok(status)) => {
                error!(%status, "worker exited without a completion payload");
                Err(BatchError::Crashed {
                    status: status.to_string(),
                    stderr,
                })
            }
            (_, Err(err)) => Err(BatchError::Crashed {
                status: format!("wait failed: {err}"),
                stderr,
            }),
        }
    }
}

async fn terminate(child: &mut Child, pgid: Option<u32>) {
    kill_group(pgid);
    if let Err(err) = child.kill().await {
        debug!(error = %err, "worker already exited");
    }
}
