//! Execution of a single check unit.

use std::{collections::HashMap, path::Path, process::Stdio, time::Duration};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    process::{ChildStdout, Command},
};
use tracing::{debug, instrument};
use vigil_model::{BatchCheck, CheckStatus};

use super::{
    child::{read_tail, tail_text},
    context::BatchContext,
};
use crate::error::CheckError;

pub const DEFAULT_CHECK_TIMEOUT: Duration = Duration::from_secs(300);
const STDERR_TAIL: usize = 2048;

/// A check's own determination.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckOutcome {
    pub status: CheckStatus,
    #[serde(default)]
    pub details: Vec<serde_json::Value>,
    #[serde(default)]
    pub error: Option<String>,
}

impl CheckOutcome {
    pub fn new(status: CheckStatus) -> Self {
        Self {
            status,
            details: Vec::new(),
            error: None,
        }
    }

    pub fn with_details(mut self, details: Vec<serde_json::Value>) -> Self {
        self.details = details;
        self
    }
}

#[async_trait]
pub trait CheckRunner: Send + Sync + std::fmt::Debug {
    async fn run(&self, check: &BatchCheck, context: &BatchContext) -> Result<CheckOutcome, CheckError>;
}

/// Program plus leading arguments used to run units of one extension.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interpreter {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl Interpreter {
    pub fn new(program: impl Into<String>, args: &[&str]) -> Self {
        Self {
            program: program.into(),
            args: args.iter().map(|arg| arg.to_string()).collect(),
        }
    }
}

pub fn default_interpreters() -> HashMap<String, Interpreter> {
    HashMap::from([
        (
            "ps1".to_string(),
            Interpreter::new("pwsh", &["-NoLogo", "-NoProfile", "-NonInteractive", "-File"]),
        ),
        ("py".to_string(), Interpreter::new("python3", &[])),
        ("sh".to_string(), Interpreter::new("sh", &[])),
    ])
}

/// Runs each check unit as a child process.
///
/// The [`BatchContext`] is written to the child's stdin as JSON and the
/// essentials are mirrored into `VIGIL_*` environment variables. The child
/// reports `{"status": .., "details": [..]}` as the last JSON line on stdout.
#[derive(Debug, Clone)]
pub struct ScriptCheckRunner {
    interpreters: HashMap<String, Interpreter>,
    timeout: Duration,
}

impl Default for ScriptCheckRunner {
    fn default() -> Self {
        Self::new(default_interpreters(), DEFAULT_CHECK_TIMEOUT)
    }
}

impl ScriptCheckRunner {
    pub fn new(interpreters: HashMap<String, Interpreter>, timeout: Duration) -> Self {
        let interpreters = interpreters
            .into_iter()
            .map(|(ext, interpreter)| {
                (ext.trim_start_matches('.').to_ascii_lowercase(), interpreter)
            })
            .collect();
        Self {
            interpreters,
            timeout,
        }
    }

    fn interpreter_for(&self, path: &Path) -> Result<&Interpreter, CheckError> {
        let ext = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();
        self.interpreters
            .get(&ext)
            .ok_or(CheckError::UnsupportedUnit(ext))
    }
}

#[async_trait]
impl CheckRunner for ScriptCheckRunner {
    #[instrument(skip(self, check, context), fields(check = %check.id))]
    async fn run(&self, check: &BatchCheck, context: &BatchContext) -> Result<CheckOutcome, CheckError> {
        let interpreter = self.interpreter_for(&check.source_path)?;
        let context_json =
            serde_json::to_vec(context).map_err(|err| CheckError::Failed(err.to_string()))?;

        let mut command = Command::new(&interpreter.program);
        command
            .args(&interpreter.args)
            .arg(&check.source_path)
            .env("VIGIL_SCAN_ID", context.scan_id.to_string())
            .env("VIGIL_CHECK_ID", check.id.as_str())
            .env("VIGIL_TENANT_ID", &context.tenant_id)
            .env("VIGIL_SERVICE_GROUP", context.group.label())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(organization) = &context.organization {
            command.env("VIGIL_ORGANIZATION", organization);
        }
        if let Some(admin_url) = &context.admin_url {
            command.env("VIGIL_ADMIN_URL", admin_url.as_str());
        }
        if let Some(session) = context.sessions.primary() {
            command.env("VIGIL_ACCESS_TOKEN", session.access_token.expose());
        }

        let mut child = command.spawn().map_err(CheckError::Spawn)?;
        if let Some(mut stdin) = child.stdin.take() {
            // A unit that never reads stdin closes the pipe early.
            if let Err(err) = stdin.write_all(&context_json).await {
                debug!(error = %err, "check did not consume its context");
            }
        }

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let collect = async {
            let (stdout, stderr, status) = tokio::join!(
                read_stdout(stdout),
                read_tail(stderr, STDERR_TAIL),
                child.wait()
            );
            status.map(|status| (status, stdout, stderr))
        };
        let (status, stdout, stderr) = tokio::time::timeout(self.timeout, collect)
            .await
            .map_err(|_| CheckError::Timeout(self.timeout))?
            .map_err(CheckError::Spawn)?;

        if !status.success() {
            return Err(CheckError::NonZeroExit {
                code: status.code(),
                stderr,
            });
        }

        parse_outcome(&stdout)
    }
}

/// The last line of `stdout` that decodes as an outcome wins; anything the
/// unit printed before it is ignored.
pub fn parse_outcome(stdout: &str) -> Result<CheckOutcome, CheckError> {
    let trimmed = stdout.trim();
    if trimmed.is_empty() {
        return Err(CheckError::MalformedOutput("check produced no output".into()));
    }
    if let Ok(outcome) = decode_outcome(trimmed) {
        return Ok(outcome);
    }

    let mut last_error = None;
    for line in trimmed.lines().rev().map(str::trim).filter(|line| !line.is_empty()) {
        match decode_outcome(line) {
            Ok(outcome) => return Ok(outcome),
            Err(err) => {
                last_error.get_or_insert(err);
            }
        }
    }
    Err(CheckError::MalformedOutput(
        last_error.unwrap_or_else(|| "no JSON outcome found".into()),
    ))
}

#[derive(Deserialize)]
struct RawOutcome {
    #[serde(alias = "Status")]
    status: String,
    #[serde(default, alias = "Details")]
    details: Option<serde_json::Value>,
    #[serde(default, alias = "Error")]
    error: Option<String>,
}

fn decode_outcome(raw: &str) -> Result<CheckOutcome, String> {
    let parsed: RawOutcome = serde_json::from_str(raw).map_err(|err| err.to_string())?;
    let status = parsed
        .status
        .parse::<CheckStatus>()
        .map_err(|err| err.to_string())?;
    let details = match parsed.details {
        None | Some(serde_json::Value::Null) => Vec::new(),
        Some(serde_json::Value::Array(items)) => items,
        Some(other) => vec![other],
    };
    Ok(CheckOutcome {
        status,
        details,
        error: parsed.error,
    })
}

async fn read_stdout(stdout: Option<ChildStdout>) -> String {
    let mut buf = Vec::new();
    if let Some(mut stdout) = stdout
        && let Err(err) = stdout.read_to_end(&mut buf).await
    {
        debug!(error = %err, "failed to read check output");
    }
    String::from_utf8_lossy(&buf).into_owned()
}
