//! Durable scan state.

mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;

use std::fmt;

use async_trait::async_trait;
use vigil_model::{CheckCounters, CheckResult, Scan, ScanId};

use crate::error::StoreError;

pub use memory::InMemoryScanStore;
#[cfg(feature = "postgres")]
pub use postgres::PostgresScanStore;

pub type StoreResult<T> = Result<T, StoreError>;

/// Persistence port for scans and their results.
///
/// Implementations reject result appends and status changes once a scan is
/// terminal, so nothing lands after completion, failure or cancellation.
#[async_trait]
pub trait ScanStore: Send + Sync + fmt::Debug {
    async fn insert_scan(&self, scan: &Scan) -> StoreResult<()>;

    /// Overwrite the stored record. Fails with [`StoreError::ScanTerminal`]
    /// when the stored record is already terminal.
    async fn update_scan(&self, scan: &Scan) -> StoreResult<()>;

    async fn get_scan(&self, id: ScanId) -> StoreResult<Option<Scan>>;

    /// Most recent first.
    async fn list_scans(&self, limit: usize) -> StoreResult<Vec<Scan>>;

    /// Append results in order; returns how many were written.
    async fn append_results(&self, id: ScanId, results: &[CheckResult]) -> StoreResult<usize>;

    async fn results(&self, id: ScanId) -> StoreResult<Vec<CheckResult>>;

    /// Outcome tallies over every persisted result of the scan.
    async fn counters(&self, id: ScanId) -> StoreResult<CheckCounters>;
}
