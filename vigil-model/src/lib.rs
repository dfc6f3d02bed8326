//! Core data model definitions shared across Vigil crates.
#![allow(missing_docs)]

pub mod batch;
pub mod check;
pub mod credentials;
pub mod error;
pub mod events;
pub mod ids;
pub mod result;
pub mod scan;
pub mod wire;

// Intentionally curated re-exports for downstream consumers.
pub use batch::{Batch, BatchCheck};
pub use check::{CheckDefinition, CheckMetadata, ServiceGroup, Severity};
pub use credentials::{ScopedCredentials, Secret, TargetCredentials};
pub use error::{ModelError, Result as ModelResult};
pub use events::{
    ProgressEvent, ScanStreamEventType, StatusUpdate, progress_percentage,
};
pub use ids::{CheckId, ScanId};
pub use result::{CheckCounters, CheckResult, CheckStatus};
pub use scan::{Scan, ScanStatus, TargetRef};
pub use wire::{BatchRequest, CompletionPayload, CompletionStatus, WorkerFrame};
