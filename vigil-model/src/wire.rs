//! Messages exchanged between the coordinator and an isolation boundary.
//!
//! The coordinator writes one [`BatchRequest`] as JSON to the worker's stdin;
//! the worker answers with newline-delimited [`WorkerFrame`]s on stdout.

use serde::{Deserialize, Serialize};

use crate::{Batch, CheckCounters, CheckId, CheckResult, ScanId};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchRequest {
    pub scan_id: ScanId,
    pub tenant_id: String,
    pub technology: String,
    pub batch: Batch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompletionStatus {
    Success,
    Failed,
}

/// Completion payload of one batch, or of a whole scan when written to an
/// output destination.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CompletionPayload {
    pub status: CompletionStatus,
    pub checks_executed: u32,
    pub results: Vec<CheckResult>,
    pub error: Option<String>,
}

impl CompletionPayload {
    pub fn success(results: Vec<CheckResult>) -> Self {
        Self {
            status: CompletionStatus::Success,
            checks_executed: results.len() as u32,
            results,
            error: None,
        }
    }

    pub fn failed(results: Vec<CheckResult>, error: impl Into<String>) -> Self {
        Self {
            status: CompletionStatus::Failed,
            checks_executed: results.len() as u32,
            results,
            error: Some(error.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == CompletionStatus::Success
    }
}

/// One NDJSON line written by a worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerFrame {
    /// Every session the batch needs has been established.
    SessionsReady,
    CheckStarted { check_id: CheckId },
    CheckCompleted {
        result: CheckResult,
        counters: CheckCounters,
    },
    /// Session setup failed; no check was attempted.
    SetupFailed { error: String },
    Finished { payload: CompletionPayload },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_are_tagged_by_type() {
        let line = serde_json::to_string(&WorkerFrame::CheckStarted {
            check_id: CheckId::new("1.2"),
        })
        .unwrap();
        assert_eq!(line, r#"{"type":"check_started","check_id":"1.2"}"#);

        let frame: WorkerFrame =
            serde_json::from_str(r#"{"type":"setup_failed","error":"denied"}"#).unwrap();
        assert_eq!(
            frame,
            WorkerFrame::SetupFailed {
                error: "denied".into()
            }
        );
    }

    #[test]
    fn completion_payload_uses_pascal_case() {
        let value = serde_json::to_value(CompletionPayload::failed(vec![], "boom")).unwrap();
        assert_eq!(value["Status"], "Failed");
        assert_eq!(value["ChecksExecuted"], 0);
        assert_eq!(value["Error"], "boom");
    }
}
