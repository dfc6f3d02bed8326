use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{CheckId, CheckMetadata, ModelError, ScanId, ServiceGroup};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CheckStatus {
    Pass,
    Fail,
    Error,
    Unknown,
    Skipped,
}

impl CheckStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckStatus::Pass => "Pass",
            CheckStatus::Fail => "Fail",
            CheckStatus::Error => "Error",
            CheckStatus::Unknown => "Unknown",
            CheckStatus::Skipped => "Skipped",
        }
    }
}

impl fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CheckStatus {
    type Err = ModelError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pass" | "passed" => Ok(Self::Pass),
            "fail" | "failed" => Ok(Self::Fail),
            "error" => Ok(Self::Error),
            "unknown" => Ok(Self::Unknown),
            "skipped" => Ok(Self::Skipped),
            other => Err(ModelError::InvalidStatus(other.to_string())),
        }
    }
}

/// Outcome of one check execution within one scan. Written once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CheckResult {
    pub scan_id: ScanId,
    pub check_id: CheckId,
    pub status: CheckStatus,
    pub category: ServiceGroup,
    pub tenant_id: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    /// Seconds.
    pub duration: f64,
    #[serde(default)]
    pub details: Vec<serde_json::Value>,
    pub error: Option<String>,
    pub metadata: Option<CheckMetadata>,
}

/// Running tally of check outcomes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckCounters {
    pub completed: u32,
    pub passed: u32,
    pub failed: u32,
    pub errors: u32,
    pub unknown: u32,
    pub skipped: u32,
}

impl CheckCounters {
    pub fn record(&mut self, status: CheckStatus) {
        self.add(status, 1);
    }

    /// Tally `count` outcomes of one status at once.
    pub fn add(&mut self, status: CheckStatus, count: u32) {
        self.completed += count;
        let slot = match status {
            CheckStatus::Pass => &mut self.passed,
            CheckStatus::Fail => &mut self.failed,
            CheckStatus::Error => &mut self.errors,
            CheckStatus::Unknown => &mut self.unknown,
            CheckStatus::Skipped => &mut self.skipped,
        };
        *slot += count;
    }

    pub fn from_results<'a>(
        results: impl IntoIterator<Item = &'a CheckResult>,
    ) -> Self {
        let mut counters = Self::default();
        for result in results {
            counters.record(result.status);
        }
        counters
    }

    pub fn merged(self, other: CheckCounters) -> Self {
        Self {
            completed: self.completed + other.completed,
            passed: self.passed + other.passed,
            failed: self.failed + other.failed,
            errors: self.errors + other.errors,
            unknown: self.unknown + other.unknown,
            skipped: self.skipped + other.skipped,
        }
    }
}
