use std::{path::PathBuf, time::Duration};

use thiserror::Error;
use vigil_model::{ScanId, ServiceGroup};

/// Engine-level failures raised while locating check definitions. Fatal for
/// the scan; no batch runs.
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("check source missing: {}", path.display())]
    SourceMissing { path: PathBuf },

    #[error("invalid technology selector `{0}`")]
    InvalidTechnology(String),

    #[error("failed to read check unit {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to walk check tree: {0}")]
    Walk(#[from] walkdir::Error),
}

/// Failures establishing the client sessions of one batch.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("missing credential `{field}` required by {group}")]
    MissingCredential {
        group: ServiceGroup,
        field: &'static str,
    },

    #[error("token request for {group} failed: {message}")]
    Transport { group: ServiceGroup, message: String },

    #[error("token request for {group} rejected with {status}: {body}")]
    Rejected {
        group: ServiceGroup,
        status: u16,
        body: String,
    },
}

/// Check-level failures. Always converted into an `Error` result; never
/// escalated past the batch.
#[derive(Error, Debug)]
pub enum CheckError {
    #[error("no interpreter configured for `{0}` check units")]
    UnsupportedUnit(String),

    #[error("failed to launch check: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("check timed out after {0:?}")]
    Timeout(Duration),

    #[error("check exited with {code:?}: {stderr}")]
    NonZeroExit { code: Option<i32>, stderr: String },

    #[error("malformed check output: {0}")]
    MalformedOutput(String),

    #[error("check panicked: {0}")]
    Panicked(String),

    #[error("{0}")]
    Failed(String),
}

/// Batch-level failures reported by an isolation boundary.
#[derive(Error, Debug)]
pub enum BatchError {
    #[error("failed to start isolation boundary: {0}")]
    Spawn(String),

    #[error("isolation boundary exited before finishing ({status}): {stderr}")]
    Crashed { status: String, stderr: String },

    #[error("batch timed out after {0:?}")]
    Timeout(Duration),

    #[error("isolation boundary protocol error: {0}")]
    Protocol(String),
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("scan {0} not found")]
    ScanNotFound(ScanId),

    #[error("scan {0} is terminal")]
    ScanTerminal(ScanId),

    #[error("scan {0} already exists")]
    ScanExists(ScanId),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[cfg(feature = "postgres")]
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Corrupt row: {0}")]
    Corrupt(String),
}
