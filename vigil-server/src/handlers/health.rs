use axum::{Json, extract::State};
use chrono::Utc;
use serde_json::{Value, json};

use crate::AppState;

pub async fn health_handler(State(state): State<AppState>) -> Json<Value> {
    let active = state.scan_control().active_scans().await.len();
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "active_scans": active,
        "uptime_seconds": (Utc::now() - state.started_at).num_seconds(),
    }))
}
