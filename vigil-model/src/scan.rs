use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{ModelError, ScanId, result::CheckCounters};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl ScanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanStatus::Pending => "pending",
            ScanStatus::Running => "running",
            ScanStatus::Completed => "completed",
            ScanStatus::Failed => "failed",
            ScanStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// `pending -> running -> {completed, failed, cancelled}`. A pending scan
    /// may also fail (check source missing) or be cancelled before it starts.
    pub fn can_transition_to(self, next: ScanStatus) -> bool {
        match (self, next) {
            (ScanStatus::Pending, ScanStatus::Running)
            | (ScanStatus::Pending, ScanStatus::Failed)
            | (ScanStatus::Pending, ScanStatus::Cancelled) => true,
            (ScanStatus::Running, next) => next.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for ScanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScanStatus {
    type Err = ModelError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" | "canceled" => Ok(Self::Cancelled),
            other => Err(ModelError::InvalidStatus(other.to_string())),
        }
    }
}

/// Tenant the scan runs against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetRef {
    pub tenant_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

/// Durable scan record. Only the lifecycle manager mutates it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scan {
    pub id: ScanId,
    pub target: TargetRef,
    pub technology: String,
    pub status: ScanStatus,
    pub total_checks: u32,
    pub passed: u32,
    pub failed: u32,
    pub errors: u32,
    pub unknown: u32,
    pub skipped: u32,
    pub progress_percentage: u8,
    pub current_check: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    #[serde(default)]
    pub warnings: Vec<String>,
}

impl Scan {
    pub fn new(id: ScanId, target: TargetRef, technology: impl Into<String>) -> Self {
        Self {
            id,
            target,
            technology: technology.into(),
            status: ScanStatus::Pending,
            total_checks: 0,
            passed: 0,
            failed: 0,
            errors: 0,
            unknown: 0,
            skipped: 0,
            progress_percentage: 0,
            current_check: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            error_message: None,
            warnings: Vec::new(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Overwrite the outcome counters with values reconciled from storage.
    pub fn apply_counters(&mut self, counters: &CheckCounters) {
        self.passed = counters.passed;
        self.failed = counters.failed;
        self.errors = counters.errors;
        self.unknown = counters.unknown;
        self.skipped = counters.skipped;
    }

    pub fn completed_checks(&self) -> u32 {
        self.passed + self.failed + self.errors + self.unknown + self.skipped
    }
}
