//! Expert progress, score distribution and teacher diagnosis endpoints

use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use mfrm_common::db::Teacher;
use serde::Serialize;
use uuid::Uuid;

use crate::error::ApiResult;
use crate::services::diagnosis::{self, DiagnosisProgress};
use crate::services::progress::{
    self, ConsensusProposal, EssayCompletion, ExpertProgress, PanelProgress, ScoreDistribution,
};
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct DistributionResponse {
    pub essay_id: Uuid,
    pub rubric_id: Uuid,
    #[serde(flatten)]
    pub distribution: ScoreDistribution,
    /// Suggested consensus; absent when the cell has no scores
    pub proposal: Option<ConsensusProposal>,
}

/// GET /api/experts/progress
pub async fn get_panel_progress(State(state): State<AppState>) -> ApiResult<Json<PanelProgress>> {
    Ok(Json(progress::load_panel_progress(&state.db).await?))
}

/// GET /api/experts/:expert_id/progress
pub async fn get_expert_progress(
    State(state): State<AppState>,
    Path(expert_id): Path<Uuid>,
) -> ApiResult<Json<ExpertProgress>> {
    Ok(Json(progress::load_expert_progress(&state.db, expert_id).await?))
}

/// GET /api/experts/:expert_id/essays/:essay_id/completion
pub async fn get_essay_completion(
    State(state): State<AppState>,
    Path((expert_id, essay_id)): Path<(Uuid, Uuid)>,
) -> ApiResult<Json<EssayCompletion>> {
    Ok(Json(
        progress::load_essay_completion(&state.db, essay_id, expert_id).await?,
    ))
}

/// GET /api/essays/:essay_id/rubrics/:rubric_id/distribution
pub async fn get_distribution(
    State(state): State<AppState>,
    Path((essay_id, rubric_id)): Path<(Uuid, Uuid)>,
) -> ApiResult<Json<DistributionResponse>> {
    let distribution = progress::load_distribution(&state.db, essay_id, rubric_id).await?;
    let proposal = progress::derive_consensus(&distribution);

    Ok(Json(DistributionResponse {
        essay_id,
        rubric_id,
        distribution,
        proposal,
    }))
}

/// GET /api/teachers/:id/diagnosis
pub async fn get_diagnosis(
    State(state): State<AppState>,
    Path(teacher_id): Path<Uuid>,
) -> ApiResult<Json<DiagnosisProgress>> {
    Ok(Json(diagnosis::load_progress(&state.db, teacher_id).await?))
}

/// POST /api/teachers/:id/essays-rated
pub async fn post_essay_rated(
    State(state): State<AppState>,
    Path(teacher_id): Path<Uuid>,
) -> ApiResult<Json<Teacher>> {
    Ok(Json(diagnosis::record_essay_rated(&state.db, teacher_id).await?))
}

pub fn progress_routes() -> Router<AppState> {
    Router::new()
        .route("/api/experts/progress", get(get_panel_progress))
        .route("/api/experts/:expert_id/progress", get(get_expert_progress))
        .route(
            "/api/experts/:expert_id/essays/:essay_id/completion",
            get(get_essay_completion),
        )
        .route(
            "/api/essays/:essay_id/rubrics/:rubric_id/distribution",
            get(get_distribution),
        )
        .route("/api/teachers/:id/diagnosis", get(get_diagnosis))
        .route("/api/teachers/:id/essays-rated", post(post_essay_rated))
}
