//! Anchor consensus score database operations
//!
//! The panel's agreed value per (essay, rubric). Upserts on that key.

use mfrm_common::db::{parse_timestamp, parse_uuid, ConsensusScore};
use mfrm_common::{Error, Result};
use serde::Deserialize;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use uuid::Uuid;

use super::{map_reference_error, now_text};

const CONSENSUS_COLUMNS: &str = r#"
    id, essay_id, rubric_id, consensus_score, is_boundary_1_2, is_boundary_2_3,
    expert_panel_size, agreement_rate, boundary_rationale, updated_at
"#;

fn default_panel_size() -> u32 {
    1
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ConsensusScoreInput {
    pub essay_id: Uuid,
    pub rubric_id: Uuid,
    pub consensus_score: u8,
    #[serde(default)]
    pub is_boundary_1_2: bool,
    #[serde(default)]
    pub is_boundary_2_3: bool,
    #[serde(default = "default_panel_size")]
    pub expert_panel_size: u32,
    pub agreement_rate: Option<f64>,
    pub boundary_rationale: Option<String>,
}

impl ConsensusScoreInput {
    pub fn new(essay_id: Uuid, rubric_id: Uuid, consensus_score: u8) -> Self {
        Self {
            essay_id,
            rubric_id,
            consensus_score,
            is_boundary_1_2: false,
            is_boundary_2_3: false,
            expert_panel_size: default_panel_size(),
            agreement_rate: None,
            boundary_rationale: None,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.essay_id.is_nil() || self.rubric_id.is_nil() {
            return Err(Error::InvalidInput(
                "essay_id and rubric_id are required".to_string(),
            ));
        }
        if !(1..=3).contains(&self.consensus_score) {
            return Err(Error::InvalidInput(format!(
                "Consensus score must be 1, 2 or 3 (got {})",
                self.consensus_score
            )));
        }
        if self.expert_panel_size < 1 {
            return Err(Error::InvalidInput(
                "Expert panel size must be at least 1".to_string(),
            ));
        }
        if let Some(rate) = self.agreement_rate {
            if !(0.0..=1.0).contains(&rate) {
                return Err(Error::InvalidInput(format!(
                    "Agreement rate must be between 0 and 1 (got {})",
                    rate
                )));
            }
        }
        Ok(())
    }
}

fn consensus_from_row(row: &SqliteRow) -> Result<ConsensusScore> {
    let id: String = row.try_get("id")?;
    let essay_id: String = row.try_get("essay_id")?;
    let rubric_id: String = row.try_get("rubric_id")?;
    let score: i64 = row.try_get("consensus_score")?;
    let panel: i64 = row.try_get("expert_panel_size")?;
    let updated_at: String = row.try_get("updated_at")?;

    Ok(ConsensusScore {
        id: parse_uuid("anchor_consensus_scores.id", &id)?,
        essay_id: parse_uuid("anchor_consensus_scores.essay_id", &essay_id)?,
        rubric_id: parse_uuid("anchor_consensus_scores.rubric_id", &rubric_id)?,
        consensus_score: score as u8,
        is_boundary_1_2: row.try_get("is_boundary_1_2")?,
        is_boundary_2_3: row.try_get("is_boundary_2_3")?,
        expert_panel_size: panel as u32,
        agreement_rate: row.try_get("agreement_rate")?,
        boundary_rationale: row.try_get("boundary_rationale")?,
        updated_at: parse_timestamp("anchor_consensus_scores.updated_at", &updated_at)?,
    })
}

async fn upsert_in_tx(
    tx: &mut Transaction<'_, Sqlite>,
    input: &ConsensusScoreInput,
) -> Result<()> {
    let now = now_text();

    sqlx::query(
        r#"
        INSERT INTO anchor_consensus_scores (
            id, essay_id, rubric_id, consensus_score, is_boundary_1_2, is_boundary_2_3,
            expert_panel_size, agreement_rate, boundary_rationale, created_at, updated_at
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(essay_id, rubric_id) DO UPDATE SET
            consensus_score = excluded.consensus_score,
            is_boundary_1_2 = excluded.is_boundary_1_2,
            is_boundary_2_3 = excluded.is_boundary_2_3,
            expert_panel_size = excluded.expert_panel_size,
            agreement_rate = excluded.agreement_rate,
            boundary_rationale = excluded.boundary_rationale,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(input.essay_id.to_string())
    .bind(input.rubric_id.to_string())
    .bind(input.consensus_score as i64)
    .bind(input.is_boundary_1_2)
    .bind(input.is_boundary_2_3)
    .bind(input.expert_panel_size as i64)
    .bind(input.agreement_rate)
    .bind(&input.boundary_rationale)
    .bind(&now)
    .bind(&now)
    .execute(&mut **tx)
    .await
    .map_err(|e| map_reference_error(e, "essay or rubric"))?;

    Ok(())
}

pub async fn upsert_consensus_score(
    pool: &SqlitePool,
    input: &ConsensusScoreInput,
) -> Result<ConsensusScore> {
    input.validate()?;

    let mut tx = pool.begin().await?;
    upsert_in_tx(&mut tx, input).await?;
    tx.commit().await?;

    get_consensus_score(pool, input.essay_id, input.rubric_id)
        .await?
        .ok_or_else(|| Error::Internal("Consensus score vanished after upsert".to_string()))
}

/// Validate every row, then upsert all of them in one transaction
pub async fn upsert_consensus_scores(
    pool: &SqlitePool,
    inputs: &[ConsensusScoreInput],
) -> Result<usize> {
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

pub async fn get_consensus_score(
    pool: &SqlitePool,
    essay_id: Uuid,
    rubric_id: Uuid,
) -> Result<Option<ConsensusScore>> {
    let sql = format!(
        "SELECT {} FROM anchor_consensus_scores WHERE essay_id = ? AND rubric_id = ?",
        CONSENSUS_COLUMNS
    );
    let row = sqlx::query(&sql)
        .bind(essay_id.to_string())
        .bind(rubric_id.to_string())
        .fetch_optional(pool)
        .await?;

    row.as_ref().map(consensus_from_row).transpose()
}

pub async fn list_consensus_scores(pool: &SqlitePool) -> Result<Vec<ConsensusScore>> {
    let sql = format!(
        "SELECT {} FROM anchor_consensus_scores ORDER BY essay_id, rubric_id",
        CONSENSUS_COLUMNS
    );
    let rows = sqlx::query(&sql).fetch_all(pool).await?;

    rows.iter().map(consensus_from_row).collect()
}
