//! Scan lifecycle: the state machine, batch sequencing and cancellation.
//!
//! [`ScanManager`] is the command surface (start, cancel, query, subscribe).
//! Each accepted scan gets one coordinating task that walks the planned
//! batches strictly in order, persisting results after every batch.

mod coordinator;
mod manager;

use std::fmt;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use url::Url;
use vigil_model::{CheckId, Scan, ScanId, ScanStatus, Severity, TargetCredentials};

use crate::{
    error::{RegistryError, StoreError},
    planner::BatchPlan,
    registry::RegistryWarning,
    relay::ScanEventFrame,
};

pub use manager::{ScanManager, ScanManagerBuilder};

/// Invocation parameters of one scan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanRequest {
    /// Caller-chosen identifier; generated when absent.
    #[serde(default)]
    pub scan_id: Option<ScanId>,
    pub credentials: TargetCredentials,
    pub technology: String,
    #[serde(default)]
    pub check_ids: Option<Vec<CheckId>>,
    #[serde(default)]
    pub min_severity: Option<Severity>,
    /// Address receiving one POST per progress update.
    #[serde(default)]
    pub callback_url: Option<Url>,
}

impl ScanRequest {
    pub fn new(credentials: TargetCredentials, technology: impl Into<String>) -> Self {
        Self {
            scan_id: None,
            credentials,
            technology: technology.into(),
            check_ids: None,
            min_severity: None,
            callback_url: None,
        }
    }

    pub fn with_scan_id(mut self, scan_id: ScanId) -> Self {
        self.scan_id = Some(scan_id);
        self
    }

    pub fn with_check_ids(mut self, ids: impl IntoIterator<Item = CheckId>) -> Self {
        self.check_ids = Some(ids.into_iter().collect());
        self
    }

    pub fn with_min_severity(mut self, severity: Severity) -> Self {
        self.min_severity = Some(severity);
        self
    }

    pub fn with_callback_url(mut self, url: Url) -> Self {
        self.callback_url = Some(url);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanAccepted {
    pub scan_id: ScanId,
    pub status: ScanStatus,
}

/// Live view of one scan for a subscriber.
#[derive(Debug)]
pub struct ScanSubscription {
    pub snapshot: Scan,
    /// Frames newer than the requested sequence, oldest first.
    pub history: Vec<ScanEventFrame>,
    /// `None` once the scan has finished and its relay is gone.
    pub receiver: Option<broadcast::Receiver<ScanEventFrame>>,
}

/// Dry-run result: what a scan with these parameters would execute.
#[derive(Debug, Clone)]
pub struct ScanPreview {
    pub plan: BatchPlan,
    pub registry_warnings: Vec<RegistryWarning>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanControlError {
    ScanNotFound,
    ScanExists,
    ScanTerminal,
    InvalidRequest(String),
    SourceMissing(String),
    Internal(String),
}

impl ScanControlError {
    pub fn message(&self) -> String {
        match self {
            ScanControlError::ScanNotFound => "scan_not_found".into(),
            ScanControlError::ScanExists => "scan_already_exists".into(),
            ScanControlError::ScanTerminal => "scan_already_terminal".into(),
            ScanControlError::InvalidRequest(reason) => reason.clone(),
            ScanControlError::SourceMissing(reason) => reason.clone(),
            ScanControlError::Internal(reason) => reason.clone(),
        }
    }

    fn internal(msg: impl fmt::Display) -> Self {
        ScanControlError::Internal(msg.to_string())
    }
}

impl fmt::Display for ScanControlError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message())
    }
}

impl std::error::Error for ScanControlError {}

impl From<StoreError> for ScanControlError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::ScanNotFound(_) => ScanControlError::ScanNotFound,
            StoreError::ScanTerminal(_) => ScanControlError::ScanTerminal,
            StoreError::ScanExists(_) => ScanControlError::ScanExists,
            other => ScanControlError::internal(other),
        }
    }
}

impl From<RegistryError> for ScanControlError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::SourceMissing { .. } => {
                ScanControlError::SourceMissing(err.to_string())
            }
            RegistryError::InvalidTechnology(_) => {
                ScanControlError::InvalidRequest(err.to_string())
            }
            other => ScanControlError::internal(other),
        }
    }
}
