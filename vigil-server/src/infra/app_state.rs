use std::fmt;

use chrono::{DateTime, Utc};
use vigil_core::ScanManager;

#[derive(Clone)]
pub struct AppState {
    pub scan_manager: ScanManager,
    /// Upper bound for scan listings.
    pub list_limit: usize,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(scan_manager: ScanManager, list_limit: usize) -> Self {
        Self {
            scan_manager,
            list_limit: list_limit.max(1),
            started_at: Utc::now(),
        }
    }

    pub fn scan_control(&self) -> &ScanManager {
        &self.scan_manager
    }
}

impl fmt::Debug for AppState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppState")
            .field("list_limit", &self.list_limit)
            .field("started_at", &self.started_at)
            .finish_non_exhaustive()
    }
}
