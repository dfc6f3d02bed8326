//! Completion payload writers for the `run` command.

use std::{
    fmt,
    fs::File,
    io::{self, BufWriter, Write},
    path::Path,
    str::FromStr,
};

use serde::{Deserialize, Serialize};
use serde_json::json;
use vigil_model::{CompletionPayload, CompletionStatus, Scan, ScanStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OutputFormat {
    /// One pretty-printed completion payload.
    #[default]
    Json,
    /// One result per line, then a summary line without `Results`.
    JsonLines,
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputFormat::Json => f.write_str("json"),
            OutputFormat::JsonLines => f.write_str("json-lines"),
        }
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(OutputFormat::Json),
            "json-lines" | "jsonl" | "ndjson" => Ok(OutputFormat::JsonLines),
            other => Err(format!("unknown output format `{other}`")),
        }
    }
}

/// Scan-level completion payload: `Success` only for a completed scan.
pub fn completion_payload(scan: &Scan, results: Vec<vigil_model::CheckResult>) -> CompletionPayload {
    match scan.status {
        ScanStatus::Completed => CompletionPayload::success(results),
        status => {
            let error = scan
                .error_message
                .clone()
                .unwrap_or_else(|| format!("scan {status}"));
            CompletionPayload::failed(results, error)
        }
    }
}

pub fn write_completion<W: Write>(
    mut writer: W,
    payload: &CompletionPayload,
    format: OutputFormat,
) -> io::Result<()> {
    match format {
        OutputFormat::Json => {
            serde_json::to_writer_pretty(&mut writer, payload)?;
            writeln!(writer)?;
        }
        OutputFormat::JsonLines => {
            for result in &payload.results {
                serde_json::to_writer(&mut writer, result)?;
                writeln!(writer)?;
            }
            let summary = json!({
                "Status": payload.status,
                "ChecksExecuted": payload.checks_executed,
                "Error": payload.error,
            });
            serde_json::to_writer(&mut writer, &summary)?;
            writeln!(writer)?;
        }
    }
    writer.flush()
}

pub fn write_completion_to_path(
    path: &Path,
    payload: &CompletionPayload,
    format: OutputFormat,
) -> io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let file = File::create(path)?;
    write_completion(BufWriter::new(file), payload, format)
}

/// Process exit code for a payload.
pub fn exit_code(payload: &CompletionPayload) -> i32 {
    match payload.status {
        CompletionStatus::Success => 0,
        CompletionStatus::Failed => 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use vigil_model::{CheckId, CheckResult, CheckStatus, ScanId, ServiceGroup, TargetRef};

    fn result(id: &str) -> CheckResult {
        CheckResult {
            scan_id: ScanId::new(),
            check_id: CheckId::new(id),
            status: CheckStatus::Pass,
            category: ServiceGroup::Mail,
            tenant_id: "tenant".into(),
            start_time: Utc::now(),
            end_time: Utc::now(),
            duration: 0.2,
            details: Vec::new(),
            error: None,
            metadata: None,
        }
    }

    #[test]
    fn json_lines_ends_with_summary() {
        let payload = CompletionPayload::success(vec![result("1.1"), result("1.2")]);
        let mut buffer = Vec::new();
        write_completion(&mut buffer, &payload, OutputFormat::JsonLines).unwrap();

        let text = String::from_utf8(buffer).unwrap();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["CheckId"], "1.1");
        let summary: serde_json::Value = serde_json::from_str(lines[2]).unwrap();
        assert_eq!(summary["Status"], "Success");
        assert_eq!(summary["ChecksExecuted"], 2);
        assert!(summary.get("Results").is_none());
    }

    #[test]
    fn cancelled_scan_is_reported_as_failed() {
        let mut scan = Scan::new(
            ScanId::new(),
            TargetRef {
                tenant_id: "tenant".into(),
                display_name: None,
            },
            "m365",
        );
        scan.status = ScanStatus::Cancelled;
        let payload = completion_payload(&scan, vec![result("1.1")]);
        assert_eq!(payload.status, CompletionStatus::Failed);
        assert_eq!(payload.error.as_deref(), Some("scan cancelled"));
        assert_eq!(exit_code(&payload), 1);
    }

    #[test]
    fn writes_pretty_json_to_nested_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out/report.json");
        let payload = CompletionPayload::success(vec![result("2.1")]);
        write_completion_to_path(&path, &payload, OutputFormat::Json).unwrap();

        let written: CompletionPayload =
            serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(written, payload);
    }

    #[test]
    fn parses_format_aliases() {
        assert_eq!("ndjson".parse::<OutputFormat>(), Ok(OutputFormat::JsonLines));
        assert!("xml".parse::<OutputFormat>().is_err());
    }
}
