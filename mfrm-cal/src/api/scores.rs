//! Expert and consensus score submission
//!
//! Both endpoints take a JSON array and upsert it as one batch: any
//! invalid row rejects the whole request before anything is written.

use axum::{extract::State, routing::put, Json, Router};
use serde::Serialize;

use crate::db::consensus_scores::{self, ConsensusScoreInput};
use crate::db::expert_scores::{self, ExpertScoreInput};
use crate::error::{ApiError, ApiResult};
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct WriteResponse {
    pub written: usize,
}

/// PUT /api/expert-scores
pub async fn put_expert_scores(
    State(state): State<AppState>,
    Json(scores): Json<Vec<ExpertScoreInput>>,
) -> ApiResult<Json<WriteResponse>> {
    if scores.is_empty() {
        return Err(ApiError::BadRequest("No scores submitted".to_string()));
    }

    let written = expert_scores::upsert_expert_scores(&state.db, &scores).await?;
    tracing::info!(written, "Expert scores upserted");

    Ok(Json(WriteResponse { written }))
}

/// PUT /api/consensus-scores
pub async fn put_consensus_scores(
    State(state): State<AppState>,
    Json(scores): Json<Vec<ConsensusScoreInput>>,
) -> ApiResult<Json<WriteResponse>> {
    if scores.is_empty() {
        return Err(ApiError::BadRequest("No consensus scores submitted".to_string()));
    }

    let written = consensus_scores::upsert_consensus_scores(&state.db, &scores).await?;
    tracing::info!(written, "Consensus scores upserted");

    Ok(Json(WriteResponse { written }))
}

pub fn score_routes() -> Router<AppState> {
    Router::new()
        .route("/api/expert-scores", put(put_expert_scores))
        .route("/api/consensus-scores", put(put_consensus_scores))
}
