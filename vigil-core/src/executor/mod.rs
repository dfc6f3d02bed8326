//! Isolated batch execution.
//!
//! A batch runs inside an [`IsolationBoundary`]: sessions for the batch's
//! service group are established first, then its checks run one after
//! another through a [`CheckRunner`]. Two boundaries ship: [`ProcessBoundary`]
//! spawns the `vigil-worker` binary per batch, [`InProcessBoundary`] runs on
//! the caller's runtime.

pub mod batch_runner;
pub mod boundary;
mod child;
pub mod context;
pub mod in_process;
pub mod process;
pub mod runner;
pub mod session;

use std::{path::PathBuf, sync::Arc, time::Duration};

use tracing::{info, warn};

pub use batch_runner::BatchRunner;
pub use boundary::{BatchOutcome, IsolationBoundary};
pub use context::BatchContext;
pub use in_process::InProcessBoundary;
pub use process::{ProcessBoundary, WORKER_BINARY};
pub use runner::{CheckOutcome, CheckRunner, Interpreter, ScriptCheckRunner, default_interpreters};
pub use session::{
    GroupScopes, OAuthSessionProvider, ServiceSession, SessionProvider, SessionSet,
    StaticSessionProvider,
};

pub const DEFAULT_BATCH_TIMEOUT: Duration = Duration::from_secs(60 * 60);

/// Which boundary to use for a deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BoundaryKind {
    /// Worker process when a worker binary can be found, else in-process.
    #[default]
    Auto,
    Process,
    InProcess,
}

impl std::fmt::Display for BoundaryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            BoundaryKind::Auto => "auto",
            BoundaryKind::Process => "process",
            BoundaryKind::InProcess => "in-process",
        })
    }
}

impl std::str::FromStr for BoundaryKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "auto" => Ok(BoundaryKind::Auto),
            "process" => Ok(BoundaryKind::Process),
            "in-process" | "inprocess" => Ok(BoundaryKind::InProcess),
            other => Err(format!("unknown isolation boundary `{other}`")),
        }
    }
}

/// Pick a boundary for `kind`.
///
/// `Auto` without a discoverable worker falls back to in-process execution.
/// `worker_args` are appended to every worker invocation.
pub fn select_boundary(
    kind: BoundaryKind,
    worker_path: Option<PathBuf>,
    worker_args: Vec<String>,
    batch_timeout: Duration,
    in_process: impl FnOnce() -> BatchRunner,
) -> Arc<dyn IsolationBoundary> {
    let worker = worker_path.or_else(ProcessBoundary::discover_worker);
    match (kind, worker) {
        (BoundaryKind::InProcess, _) => {
            info!("using in-process isolation boundary");
            Arc::new(InProcessBoundary::new(in_process(), batch_timeout))
        }
        (BoundaryKind::Process | BoundaryKind::Auto, Some(path)) => {
            info!(worker = %path.display(), "using worker process isolation boundary");
            Arc::new(ProcessBoundary::new(path, batch_timeout).with_args(worker_args))
        }
        (BoundaryKind::Process, None) => {
            // Spawning fails per batch and is reported as a batch error.
            warn!("worker binary not found; batches will fail to start");
            Arc::new(ProcessBoundary::new(WORKER_BINARY, batch_timeout).with_args(worker_args))
        }
        (BoundaryKind::Auto, None) => {
            warn!("worker binary not found, falling back to in-process execution (no library isolation)");
            Arc::new(InProcessBoundary::new(in_process(), batch_timeout))
        }
    }
}
