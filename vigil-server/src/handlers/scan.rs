use axum::response::sse::{Event, KeepAlive, KeepAliveStream};
use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Sse},
};
use serde::{Deserialize, Serialize};
use std::{convert::Infallible, pin::Pin, time::Duration};
use tokio_stream::{
    Stream, StreamExt,
    wrappers::{BroadcastStream, errors::BroadcastStreamRecvError},
};
use tracing::warn;
use vigil_core::{ScanControlError, ScanEventFrame, ScanManager, ScanRequest, ScanSubscription};
use vigil_model::{CheckResult, Scan, ScanId, ScanStreamEventType};

use crate::AppState;
use crate::infra::errors::AppResult;

const LAST_EVENT_ID_HEADER: &str = "last-event-id";

pub type ScanEventStream = Pin<Box<dyn Stream<Item = Result<Event, Infallible>> + Send + 'static>>;

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct ScanListResponse {
    pub scans: Vec<Scan>,
    pub count: usize,
}

#[derive(Debug, Serialize)]
pub struct ScanResultsResponse {
    pub scan_id: ScanId,
    pub results: Vec<CheckResult>,
    pub count: usize,
}

pub async fn start_scan_handler(
    State(state): State<AppState>,
    Json(request): Json<ScanRequest>,
) -> AppResult<impl IntoResponse> {
    let accepted = state.scan_control().start_scan(request).await?;
    Ok((StatusCode::ACCEPTED, Json(accepted)))
}

pub async fn list_scans_handler(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> AppResult<Json<ScanListResponse>> {
    let limit = query
        .limit
        .unwrap_or(state.list_limit)
        .clamp(1, state.list_limit);
    let scans = state.scan_control().list(limit).await?;
    let count = scans.len();
    Ok(Json(ScanListResponse { scans, count }))
}

pub async fn get_scan_handler(
    State(state): State<AppState>,
    Path(scan_id): Path<ScanId>,
) -> AppResult<Json<Scan>> {
    Ok(Json(state.scan_control().snapshot(scan_id).await?))
}

pub async fn scan_results_handler(
    State(state): State<AppState>,
    Path(scan_id): Path<ScanId>,
) -> AppResult<Json<ScanResultsResponse>> {
    let manager = state.scan_control();
    // Unknown ids are a 404, not an empty listing.
    manager.snapshot(scan_id).await?;
    let results = manager.results(scan_id).await?;
    let count = results.len();
    Ok(Json(ScanResultsResponse {
        scan_id,
        results,
        count,
    }))
}

pub async fn cancel_scan_handler(
    State(state): State<AppState>,
    Path(scan_id): Path<ScanId>,
) -> AppResult<impl IntoResponse> {
    let accepted = state.scan_control().cancel_scan(scan_id).await?;
    Ok((StatusCode::ACCEPTED, Json(accepted)))
}

pub async fn scan_events_sse_handler(
    State(state): State<AppState>,
    Path(scan_id): Path<ScanId>,
    headers: HeaderMap,
) -> AppResult<Sse<KeepAliveStream<ScanEventStream>>> {
    let last_sequence = headers
        .get(LAST_EVENT_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .and_then(|raw| raw.trim().parse::<u64>().ok());

    let stream = build_scan_event_stream(state.scan_control(), scan_id, last_sequence).await?;
    Ok(Sse::new(stream).keep_alive(default_keep_alive()))
}

/// `snapshot` first, then frames newer than `last_sequence`, then live frames
/// until a terminal status. A finished scan yields only its snapshot.
pub async fn build_scan_event_stream(
    manager: &ScanManager,
    scan_id: ScanId,
    last_sequence: Option<u64>,
) -> Result<ScanEventStream, ScanControlError> {
    let since = last_sequence.unwrap_or(0);
    let ScanSubscription {
        snapshot,
        history,
        receiver,
    } = manager.subscribe(scan_id, since).await?;

    let snapshot_event = snapshot_to_event(&snapshot);
    // A terminal snapshot already carries the final state.
    let (history, live_receiver) = if snapshot.is_terminal() {
        (Vec::new(), None)
    } else {
        (history, receiver)
    };

    let stream = async_stream::stream! {
        if let Some(event) = snapshot_event {
            yield Ok::<Event, Infallible>(event);
        }

        let mut last_seen_sequence = since;
        for frame in history {
            last_seen_sequence = frame.sequence;
            let terminal = frame.is_terminal();
            if let Some(event) = scan_frame_to_event(&frame) {
                yield Ok(event);
            }
            if terminal {
                return;
            }
        }

        let Some(receiver) = live_receiver else {
            return;
        };
        let mut live = BroadcastStream::new(receiver);
        while let Some(item) = live.next().await {
            match item {
                Ok(frame) => {
                    if frame.sequence <= last_seen_sequence {
                        continue;
                    }
                    last_seen_sequence = frame.sequence;
                    let terminal = frame.is_terminal();
                    if let Some(event) = scan_frame_to_event(&frame) {
                        yield Ok(event);
                    }
                    if terminal {
                        break;
                    }
                }
                Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                    warn!(%scan_id, skipped, "scan event subscriber lagged");
                }
            }
        }
    };

    Ok(Box::pin(stream))
}

fn snapshot_to_event(scan: &Scan) -> Option<Event> {
    serde_json::to_string(scan)
        .map(|data| {
            Event::default()
                .event(ScanStreamEventType::Snapshot.event_name())
                .data(data)
        })
        .map_err(|err| warn!("failed to serialize scan snapshot: {err}"))
        .ok()
}

fn scan_frame_to_event(frame: &ScanEventFrame) -> Option<Event> {
    serde_json::to_string(&frame.payload)
        .map(|data| {
            Event::default()
                .event(frame.event.event_name())
                .id(frame.sequence.to_string())
                .data(data)
        })
        .map_err(|err| warn!("failed to serialize scan event payload: {err}"))
        .ok()
}

fn default_keep_alive() -> KeepAlive {
    KeepAlive::new()
        .interval(Duration::from_secs(15))
        .text("keep-alive")
}
