//! Expert score database operations
//!
//! One row per (expert, essay, rubric). Writes upsert on that key so a
//! re-score overwrites in place and duplicate submissions stay idempotent.

use mfrm_common::db::{parse_timestamp, parse_uuid, BoundaryType, ExpertScore};
use mfrm_common::{Error, Result};
use serde::Deserialize;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use uuid::Uuid;

use super::{map_reference_error, now_text};

const SCORE_COLUMNS: &str = r#"
    id, expert_id, essay_id, rubric_id, score, confidence_level,
    is_boundary_case, boundary_type, rationale, updated_at
"#;

/// One expert judgment as submitted
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ExpertScoreInput {
    pub expert_id: Uuid,
    pub essay_id: Uuid,
    pub rubric_id: Uuid,
    pub score: u8,
    pub confidence_level: Option<u8>,
    #[serde(default)]
    pub is_boundary_case: bool,
    pub boundary_type: Option<BoundaryType>,
    pub rationale: Option<String>,
}

impl ExpertScoreInput {
    pub fn new(expert_id: Uuid, essay_id: Uuid, rubric_id: Uuid, score: u8) -> Self {
        Self {
            expert_id,
            essay_id,
            rubric_id,
            score,
            confidence_level: None,
            is_boundary_case: false,
            boundary_type: None,
            rationale: None,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.expert_id.is_nil() || self.essay_id.is_nil() || self.rubric_id.is_nil() {
            return Err(Error::InvalidInput(
                "expert_id, essay_id and rubric_id are required".to_string(),
            ));
        }
        if !(1..=3).contains(&self.score) {
            return Err(Error::InvalidInput(format!(
                "Score must be 1, 2 or 3 (got {})",
                self.score
            )));
        }
        if let Some(confidence) = self.confidence_level {
            if !(1..=5).contains(&confidence) {
                return Err(Error::InvalidInput(format!(
                    "Confidence level must be between 1 and 5 (got {})",
                    confidence
                )));
            }
        }
        if self.boundary_type.is_some() && !self.is_boundary_case {
            return Err(Error::InvalidInput(
                "boundary_type requires is_boundary_case".to_string(),
            ));
        }
        Ok(())
    }
}

fn score_from_row(row: &SqliteRow) -> Result<ExpertScore> {
    let id: String = row.try_get("id")?;
    let expert_id: String = row.try_get("expert_id")?;
    let essay_id: String = row.try_get("essay_id")?;
    let rubric_id: String = row.try_get("rubric_id")?;
    let score: i64 = row.try_get("score")?;
    let confidence: Option<i64> = row.try_get("confidence_level")?;
    let boundary_type: Option<String> = row.try_get("boundary_type")?;
    let updated_at: String = row.try_get("updated_at")?;

    Ok(ExpertScore {
        id: parse_uuid("expert_scores.id", &id)?,
        expert_id: parse_uuid("expert_scores.expert_id", &expert_id)?,
        essay_id: parse_uuid("expert_scores.essay_id", &essay_id)?,
        rubric_id: parse_uuid("expert_scores.rubric_id", &rubric_id)?,
        score: score as u8,
        confidence_level: confidence.map(|c| c as u8),
        is_boundary_case: row.try_get("is_boundary_case")?,
        boundary_type: boundary_type.as_deref().map(BoundaryType::parse).transpose()?,
        rationale: row.try_get("rationale")?,
        updated_at: parse_timestamp("expert_scores.updated_at", &updated_at)?,
    })
}

async fn upsert_in_tx(tx: &mut Transaction<'_, Sqlite>, input: &ExpertScoreInput) -> Result<()> {
    let now = now_text();

    sqlx::query(
        r#"
        INSERT INTO expert_scores (
            id, expert_id, essay_id, rubric_id, score, confidence_level,
            is_boundary_case, boundary_type, rationale, created_at, updated_at
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(expert_id, essay_id, rubric_id) DO UPDATE SET
            score = excluded.score,
            confidence_level = excluded.confidence_level,
            is_boundary_case = excluded.is_boundary_case,
            boundary_type = excluded.boundary_type,
            rationale = excluded.rationale,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(input.expert_id.to_string())
    .bind(input.essay_id.to_string())
    .bind(input.rubric_id.to_string())
    .bind(input.score as i64)
    .bind(input.confidence_level.map(i64::from))
    .bind(input.is_boundary_case)
    .bind(input.boundary_type.map(BoundaryType::as_str))
    .bind(&input.rationale)
    .bind(&now)
    .bind(&now)
    .execute(&mut **tx)
    .await
    .map_err(|e| map_reference_error(e, "expert, essay or rubric"))?;

    Ok(())
}

/// Validate and upsert one score, returning the stored row
pub async fn upsert_expert_score(pool: &SqlitePool, input: &ExpertScoreInput) -> Result<ExpertScore> {
    input.validate()?;

    let mut tx = pool.begin().await?;
    upsert_in_tx(&mut tx, input).await?;
    tx.commit().await?;

    get_score(pool, input.expert_id, input.essay_id, input.rubric_id)
        .await?
        .ok_or_else(|| Error::Internal("Expert score vanished after upsert".to_string()))
}

/// Validate every row, then upsert all of them in one transaction
///
/// **Returns:** number of rows written
pub async fn upsert_expert_scores(pool: &SqlitePool, inputs: &[ExpertScoreInput]) -> Result<usize> {
    for (index, input) in inputs.iter().enumerate() {
        input
            .validate()
            .map_err(|e| Error::InvalidInput(format!("Row {}: {}", index, e)))?;
    }

    let mut tx = pool.begin().await?;
    for input in inputs {
        upsert_in_tx(&mut tx, input).await?;
    }
    tx.commit().await?;

    Ok(inputs.len())
}

pub async fn get_score(
    pool: &SqlitePool,
    expert_id: Uuid,
    essay_id: Uuid,
    rubric_id: Uuid,
) -> Result<Option<ExpertScore>> {
    let sql = format!(
        "SELECT {} FROM expert_scores WHERE expert_id = ? AND essay_id = ? AND rubric_id = ?",
        SCORE_COLUMNS
    );
    let row = sqlx::query(&sql)
        .bind(expert_id.to_string())
        .bind(essay_id.to_string())
        .bind(rubric_id.to_string())
        .fetch_optional(pool)
        .await?;

    row.as_ref().map(score_from_row).transpose()
}

/// Every score, in a stable order
pub async fn list_all_scores(pool: &SqlitePool) -> Result<Vec<ExpertScore>> {
    let sql = format!(
        "SELECT {} FROM expert_scores ORDER BY expert_id, essay_id, rubric_id",
        SCORE_COLUMNS
    );
    let rows = sqlx::query(&sql).fetch_all(pool).await?;

    rows.iter().map(score_from_row).collect()
}

pub async fn list_scores_by_expert(pool: &SqlitePool, expert_id: Uuid) -> Result<Vec<ExpertScore>> {
    let sql = format!(
        "SELECT {} FROM expert_scores WHERE expert_id = ? ORDER BY essay_id, rubric_id",
        SCORE_COLUMNS
    );
    let rows = sqlx::query(&sql)
        .bind(expert_id.to_string())
        .fetch_all(pool)
        .await?;

    rows.iter().map(score_from_row).collect()
}

/// All experts' scores for one (essay, rubric) cell
pub async fn list_scores_for_cell(
    pool: &SqlitePool,
    essay_id: Uuid,
    rubric_id: Uuid,
) -> Result<Vec<ExpertScore>> {
    let sql = format!(
        "SELECT {} FROM expert_scores WHERE essay_id = ? AND rubric_id = ? ORDER BY expert_id",
        SCORE_COLUMNS
    );
    let rows = sqlx::query(&sql)
        .bind(essay_id.to_string())
        .bind(rubric_id.to_string())
        .fetch_all(pool)
        .await?;

    rows.iter().map(score_from_row).collect()
}

/// Scores one expert gave one essay under active rubrics
pub async fn count_expert_essay_scores(
    pool: &SqlitePool,
    expert_id: Uuid,
    essay_id: Uuid,
) -> Result<i64> {
    let count: i64 = sqlx::query_scalar(
        r#"
        SELECT COUNT(*)
        FROM expert_scores s
        JOIN rubrics r ON r.id = s.rubric_id
        WHERE s.expert_id = ? AND s.essay_id = ? AND r.is_active = 1
        "#,
    )
    .bind(expert_id.to_string())
    .bind(essay_id.to_string())
    .fetch_one(pool)
    .await?;

    Ok(count)
}

pub async fn count_scores(pool: &SqlitePool) -> Result<i64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM expert_scores")
        .fetch_one(pool)
        .await?;

    Ok(count)
}

/// Distinct essays carrying at least one expert score
pub async fn count_scored_essays(pool: &SqlitePool) -> Result<i64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(DISTINCT essay_id) FROM expert_scores")
        .fetch_one(pool)
        .await?;

    Ok(count)
}
