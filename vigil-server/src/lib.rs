//! # Vigil Server
//!
//! HTTP and SSE surface over the scan engine in `vigil-core`, plus the
//! process wiring shared by the `vigil-server` and `vigil-worker` binaries.
//!
//! ## Routes
//!
//! - `GET /health`
//! - `POST /api/v1/scans`, `GET /api/v1/scans`
//! - `GET /api/v1/scans/{id}`, `GET /api/v1/scans/{id}/results`
//! - `POST /api/v1/scans/{id}/cancel`
//! - `GET /api/v1/scans/{id}/events` (server-sent events)
//! - `GET /api/v1/checks/{technology}`

pub mod handlers;
pub mod infra;
pub mod routes;

pub use infra::app_state::AppState;
pub use routes::create_app;
