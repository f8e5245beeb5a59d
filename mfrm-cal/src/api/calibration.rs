//! Calibration readiness, coverage, runs and activation endpoints

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use mfrm_common::db::CalibrationRun;
use serde::Serialize;
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::services::calibration_manager::RunResults;
use crate::services::coverage::{self, AnchorEssayCoverage, CoverageRow, CoverageSummary};
use crate::services::{readiness, ActivationReport, ReadinessReport, RunRequest};
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct CoverageResponse {
    pub summary: CoverageSummary,
    pub rubrics: Vec<CoverageRow>,
    pub anchor_essays: Vec<AnchorEssayCoverage>,
}

#[derive(Debug, Serialize)]
pub struct ActiveVersionResponse {
    pub run: Option<CalibrationRun>,
    /// Essays not yet synced from the active run; re-activate to repair
    pub stale_essays: Vec<Uuid>,
}

/// GET /api/calibration/readiness
pub async fn get_readiness(State(state): State<AppState>) -> ApiResult<Json<ReadinessReport>> {
    Ok(Json(readiness::load_readiness(&state.db).await?))
}

/// GET /api/calibration/coverage
pub async fn get_coverage(State(state): State<AppState>) -> ApiResult<Json<CoverageResponse>> {
    let rubrics = coverage::load_coverage(&state.db).await?;
    let anchor_essays = coverage::load_anchor_essay_coverage(&state.db).await?;

    Ok(Json(CoverageResponse {
        summary: coverage::summarize(&rubrics),
        rubrics,
        anchor_essays,
    }))
}

/// GET /api/calibration/runs
pub async fn list_runs(State(state): State<AppState>) -> ApiResult<Json<Vec<CalibrationRun>>> {
    Ok(Json(state.manager.list_runs().await?))
}

/// POST /api/calibration/runs
///
/// Blocks until the estimator answers. The run executes on its own task
/// so a dropped client connection cannot leave it half-finished.
pub async fn create_run(
    State(state): State<AppState>,
    Json(request): Json<RunRequest>,
) -> ApiResult<(StatusCode, Json<CalibrationRun>)> {
    let manager = state.manager.clone();
    let cancel = state.shutdown.child_token();

    let handle =
        tokio::spawn(async move { manager.run_calibration(&request, cancel).await });

    let outcome = handle
        .await
        .map_err(|e| ApiError::Internal(format!("Calibration task failed: {}", e)))?;

    match outcome {
        Ok(run) => Ok((StatusCode::CREATED, Json(run))),
        Err(err) => {
            state.record_error(err.to_string()).await;
            Err(err.into())
        }
    }
}

/// GET /api/calibration/runs/:id/results
pub async fn get_run_results(
    State(state): State<AppState>,
    Path(run_id): Path<Uuid>,
) -> ApiResult<Json<RunResults>> {
    Ok(Json(state.manager.run_results(run_id).await?))
}

/// POST /api/calibration/runs/:id/activate
pub async fn activate_run(
    State(state): State<AppState>,
    Path(run_id): Path<Uuid>,
) -> ApiResult<Json<ActivationReport>> {
    match state.manager.activate_version(run_id).await {
        Ok(report) => Ok(Json(report)),
        Err(err) => {
            state.record_error(err.to_string()).await;
            Err(err.into())
        }
    }
}

/// GET /api/calibration/active
pub async fn get_active_version(
    State(state): State<AppState>,
) -> ApiResult<Json<ActiveVersionResponse>> {
    let run = state.manager.active_version().await?;
    let stale_essays = state.manager.stale_essays().await?;

    Ok(Json(ActiveVersionResponse { run, stale_essays }))
}

pub fn calibration_routes() -> Router<AppState> {
    Router::new()
        .route("/api/calibration/readiness", get(get_readiness))
        .route("/api/calibration/coverage", get(get_coverage))
        .route("/api/calibration/runs", get(list_runs).post(create_run))
        .route("/api/calibration/runs/:id/results", get(get_run_results))
        .route("/api/calibration/runs/:id/activate", post(activate_run))
        .route("/api/calibration/active", get(get_active_version))
}
