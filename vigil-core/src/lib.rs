//! # Vigil Core
//!
//! Execution engine for compliance scans against a cloud tenant.
//!
//! A scan flows through the modules of this crate leaf-first:
//!
//! - [`registry`]: discovers check units under `<checks_root>/<technology>/`
//!   and parses their embedded metadata block
//! - [`classifier`]: assigns each check to exactly one [`ServiceGroup`]
//! - [`planner`]: partitions the checks into one batch per group
//! - [`executor`]: runs a batch inside an isolation boundary, establishing only
//!   the sessions that batch needs
//! - [`relay`]: fans progress out to live subscribers and an optional
//!   callback address
//! - [`lifecycle`]: owns the scan state machine and sequences batches
//!
//! Persistence sits behind [`store::ScanStore`]; the `postgres` feature adds a
//! SQLx-backed implementation.
//!
//! [`ServiceGroup`]: vigil_model::ServiceGroup

pub mod classifier;
pub mod error;
pub mod executor;
pub mod lifecycle;
pub mod output;
pub mod planner;
pub mod registry;
pub mod relay;
pub mod store;

pub use classifier::{Classification, ClassificationWarning, DependencyClassifier};
pub use error::{BatchError, CheckError, RegistryError, SessionError, StoreError};
pub use executor::{
    BatchContext, BatchOutcome, BatchRunner, CheckRunner, InProcessBoundary,
    IsolationBoundary, ProcessBoundary, ScriptCheckRunner, SessionProvider,
};
pub use lifecycle::{
    ScanAccepted, ScanControlError, ScanManager, ScanManagerBuilder, ScanPreview, ScanRequest,
    ScanSubscription,
};
pub use output::OutputFormat;
pub use planner::{AmbiguityPolicy, BatchPlan, BatchPlanner};
pub use registry::{CheckRegistry, LoadedChecks, RegistryQuery, RegistryWarning};
pub use relay::{OverflowPolicy, ProgressRelay, ScanEventBus, ScanEventFrame};
pub use store::{InMemoryScanStore, ScanStore};
