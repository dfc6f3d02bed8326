use axum::{
    Json,
    extract::{Path, Query, State},
};
use serde::{Deserialize, Serialize};
use vigil_core::{RegistryQuery, ScanPreview, planner::PlannedCheck};
use vigil_model::{CheckId, ServiceGroup, Severity};

use crate::AppState;
use crate::infra::errors::AppResult;

#[derive(Debug, Default, Deserialize)]
pub struct CheckListQuery {
    /// Comma-separated check identifiers.
    pub ids: Option<String>,
    pub min_severity: Option<Severity>,
}

#[derive(Debug, Serialize)]
pub struct BatchSummary {
    pub group: ServiceGroup,
    pub name: String,
    pub checks: usize,
}

#[derive(Debug, Serialize)]
pub struct CheckListResponse {
    pub technology: String,
    pub total: usize,
    pub batches: Vec<BatchSummary>,
    pub checks: Vec<PlannedCheck>,
    pub warnings: Vec<String>,
}

impl CheckListResponse {
    pub fn from_preview(technology: String, preview: ScanPreview) -> Self {
        let ScanPreview {
            plan,
            registry_warnings,
        } = preview;
        let batches = plan
            .batches
            .iter()
            .map(|batch| BatchSummary {
                group: batch.group,
                name: batch.name.clone(),
                checks: batch.len(),
            })
            .collect();
        let warnings = registry_warnings
            .iter()
            .map(ToString::to_string)
            .chain(plan.warnings.iter().map(ToString::to_string))
            .collect();

        Self {
            technology,
            total: plan.total_checks(),
            batches,
            checks: plan.checks,
            warnings,
        }
    }
}

/// Registry listing with the batch each check would run in.
pub async fn list_checks_handler(
    State(state): State<AppState>,
    Path(technology): Path<String>,
    Query(query): Query<CheckListQuery>,
) -> AppResult<Json<CheckListResponse>> {
    let mut registry_query = RegistryQuery::new(technology.clone());
    if let Some(ids) = query.ids.as_deref() {
        registry_query = registry_query.with_check_ids(
            ids.split(',')
                .map(str::trim)
                .filter(|id| !id.is_empty())
                .map(CheckId::from),
        );
    }
    if let Some(severity) = query.min_severity {
        registry_query = registry_query.with_min_severity(severity);
    }

    let preview = state.scan_control().plan(registry_query, None).await?;
    Ok(Json(CheckListResponse::from_preview(technology, preview)))
}
