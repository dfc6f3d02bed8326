use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{ModelError, Scan, ScanId};

/// `round(100 * completed / total)`, clamped to 100. Zero checks means zero.
pub fn progress_percentage(completed: u32, total: u32) -> u8 {
    if total == 0 {
        return 0;
    }
    let pct = (f64::from(completed) * 100.0 / f64::from(total)).round();
    pct.clamp(0.0, 100.0) as u8
}

/// Payload of the progress callback, one POST per event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub scan_id: ScanId,
    pub progress_percentage: u8,
    pub current_check: Option<String>,
    pub status: String,
    pub total_checks: u32,
    pub passed: Option<u32>,
    pub failed: Option<u32>,
    pub errors: Option<u32>,
}

impl ProgressEvent {
    pub fn from_scan(scan: &Scan) -> Self {
        Self {
            scan_id: scan.id,
            progress_percentage: scan.progress_percentage,
            current_check: scan.current_check.clone(),
            status: scan.status.as_str().to_string(),
            total_checks: scan.total_checks,
            passed: Some(scan.passed),
            failed: Some(scan.failed),
            errors: Some(scan.errors),
        }
    }
}

/// `status` stream event: the callback shape plus timestamps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusUpdate {
    #[serde(flatten)]
    pub progress: ProgressEvent,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
    pub error_message: Option<String>,
}

impl StatusUpdate {
    pub fn from_scan(scan: &Scan) -> Self {
        Self {
            progress: ProgressEvent::from_scan(scan),
            started_at: scan.started_at,
            completed_at: scan.completed_at,
            updated_at: Utc::now(),
            error_message: scan.error_message.clone(),
        }
    }

    /// Subscribers close on a terminal status and only then.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.progress.status.as_str(),
            "completed" | "failed" | "cancelled"
        )
    }
}

/// Named events of the live subscriber protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ScanStreamEventType {
    Snapshot,
    ScanStarted,
    Status,
    ResultsInserted,
    BatchCompleted,
}

impl ScanStreamEventType {
    pub const fn event_name(self) -> &'static str {
        match self {
            Self::Snapshot => "snapshot",
            Self::ScanStarted => "scan-started",
            Self::Status => "status",
            Self::ResultsInserted => "results-inserted",
            Self::BatchCompleted => "batch-completed",
        }
    }
}

impl fmt::Display for ScanStreamEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.event_name())
    }
}

impl FromStr for ScanStreamEventType {
    type Err = ModelError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "snapshot" => Ok(Self::Snapshot),
            "scan-started" => Ok(Self::ScanStarted),
            "status" => Ok(Self::Status),
            "results-inserted" => Ok(Self::ResultsInserted),
            "batch-completed" => Ok(Self::BatchCompleted),
            other => Err(ModelError::InvalidEventType(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percentage_rounds_to_nearest() {
        assert_eq!(progress_percentage(0, 0), 0);
        assert_eq!(progress_percentage(1, 3), 33);
        assert_eq!(progress_percentage(2, 3), 67);
        assert_eq!(progress_percentage(3, 3), 100);
        assert_eq!(progress_percentage(5, 3), 100);
    }

    #[test]
    fn event_names_round_trip() {
        for kind in [
            ScanStreamEventType::Snapshot,
            ScanStreamEventType::ScanStarted,
            ScanStreamEventType::Status,
            ScanStreamEventType::ResultsInserted,
            ScanStreamEventType::BatchCompleted,
        ] {
            assert_eq!(kind.event_name().parse::<ScanStreamEventType>(), Ok(kind));
        }
    }

    #[test]
    fn full_progress_is_not_terminal() {
        let mut scan = Scan::new(
            ScanId::new(),
            crate::TargetRef {
                tenant_id: "t".into(),
                display_name: None,
            },
            "m365",
        );
        scan.status = crate::ScanStatus::Running;
        scan.total_checks = 4;
        scan.passed = 4;
        scan.progress_percentage = 100;

        assert!(!StatusUpdate::from_scan(&scan).is_terminal());
        scan.status = crate::ScanStatus::Completed;
        assert!(StatusUpdate::from_scan(&scan).is_terminal());
    }
}
