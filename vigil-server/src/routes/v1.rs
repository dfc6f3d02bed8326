use axum::{
    Router,
    routing::{get, post},
};

use crate::{
    AppState,
    handlers::{
        checks::list_checks_handler,
        scan::{
            cancel_scan_handler, get_scan_handler, list_scans_handler, scan_events_sse_handler,
            scan_results_handler, start_scan_handler,
        },
    },
};

/// Create all v1 API routes
pub fn create_v1_router() -> Router<AppState> {
    Router::new()
        .route("/scans", post(start_scan_handler).get(list_scans_handler))
        .route("/scans/{id}", get(get_scan_handler))
        .route("/scans/{id}/results", get(scan_results_handler))
        .route("/scans/{id}/cancel", post(cancel_scan_handler))
        .route("/scans/{id}/events", get(scan_events_sse_handler))
        .route("/checks/{technology}", get(list_checks_handler))
}
