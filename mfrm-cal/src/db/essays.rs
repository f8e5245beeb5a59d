//! Essay database operations
//!
//! The cached difficulty columns are written only by `apply_calibration`,
//! which activation calls once per result row.

use chrono::{DateTime, Utc};
use mfrm_common::db::{parse_optional_timestamp, parse_timestamp, parse_uuid, Essay};
use mfrm_common::{Error, Result};
use serde::Deserialize;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use super::{now_text, timestamp_text};

const ESSAY_COLUMNS: &str = r#"
    id, title, content, is_active, is_anchor, is_calibration, anchor_explanation,
    difficulty_logit, difficulty_logit_se, is_calibrated, calibrated_at,
    calibration_run_id, created_at, updated_at
"#;

/// Fields accepted when creating an essay
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewEssay {
    pub title: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub is_anchor: bool,
    #[serde(default)]
    pub is_calibration: bool,
    pub anchor_explanation: Option<String>,
}

fn essay_from_row(row: &SqliteRow) -> Result<Essay> {
    let id: String = row.try_get("id")?;
    let run_id: Option<String> = row.try_get("calibration_run_id")?;
    let created_at: String = row.try_get("created_at")?;
    let updated_at: String = row.try_get("updated_at")?;

    Ok(Essay {
        id: parse_uuid("essays.id", &id)?,
        title: row.try_get("title")?,
        content: row.try_get("content")?,
        is_active: row.try_get("is_active")?,
        is_anchor: row.try_get("is_anchor")?,
        is_calibration: row.try_get("is_calibration")?,
        anchor_explanation: row.try_get("anchor_explanation")?,
        difficulty_logit: row.try_get("difficulty_logit")?,
        difficulty_logit_se: row.try_get("difficulty_logit_se")?,
        is_calibrated: row.try_get("is_calibrated")?,
        calibrated_at: parse_optional_timestamp("essays.calibrated_at", row.try_get("calibrated_at")?)?,
        calibration_run_id: run_id
            .map(|id| parse_uuid("essays.calibration_run_id", &id))
            .transpose()?,
        created_at: parse_timestamp("essays.created_at", &created_at)?,
        updated_at: parse_timestamp("essays.updated_at", &updated_at)?,
    })
}

/// Insert a new essay
pub async fn insert_essay(pool: &SqlitePool, essay: &NewEssay) -> Result<Essay> {
    if essay.title.trim().is_empty() {
        return Err(Error::InvalidInput("Essay title must not be empty".to_string()));
    }

    let id = Uuid::new_v4();
    let now = now_text();

    sqlx::query(
        r#"
        INSERT INTO essays (id, title, content, is_anchor, is_calibration, anchor_explanation, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(id.to_string())
    .bind(&essay.title)
    .bind(&essay.content)
    .bind(essay.is_anchor)
    .bind(essay.is_calibration)
    .bind(&essay.anchor_explanation)
    .bind(&now)
    .bind(&now)
    .execute(pool)
    .await?;

    get_essay(pool, id)
        .await?
        .ok_or_else(|| Error::Internal(format!("Essay {} vanished after insert", id)))
}

/// Load one essay
pub async fn get_essay(pool: &SqlitePool, id: Uuid) -> Result<Option<Essay>> {
    let sql = format!("SELECT {} FROM essays WHERE id = ?", ESSAY_COLUMNS);
    let row = sqlx::query(&sql)
        .bind(id.to_string())
        .fetch_optional(pool)
        .await?;

    row.as_ref().map(essay_from_row).transpose()
}

/// Active essays flagged as anchors
pub async fn list_anchor_essays(pool: &SqlitePool) -> Result<Vec<Essay>> {
    let sql = format!(
        "SELECT {} FROM essays WHERE is_anchor = 1 AND is_active = 1 ORDER BY created_at, id",
        ESSAY_COLUMNS
    );
    let rows = sqlx::query(&sql).fetch_all(pool).await?;

    rows.iter().map(essay_from_row).collect()
}

/// Active essays flagged as calibration or anchor (the scoring target set)
pub async fn count_calibration_or_anchor(pool: &SqlitePool) -> Result<i64> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM essays WHERE is_active = 1 AND (is_calibration = 1 OR is_anchor = 1)",
    )
    .fetch_one(pool)
    .await?;

    Ok(count)
}

/// Active anchor essays
pub async fn count_anchor(pool: &SqlitePool) -> Result<i64> {
    let count: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM essays WHERE is_active = 1 AND is_anchor = 1")
            .fetch_one(pool)
            .await?;

    Ok(count)
}

/// Copy one calibration result onto its essay
///
/// Single-row atomic write. Re-applying the same run leaves the row
/// unchanged apart from `updated_at`; `calibrated_at` keeps the time the
/// essay first synced from this run.
///
/// **Returns:** false when the essay no longer exists
pub async fn apply_calibration(
    pool: &SqlitePool,
    essay_id: Uuid,
    run_id: Uuid,
    difficulty_logit: f64,
    difficulty_se: Option<f64>,
    synced_at: DateTime<Utc>,
) -> Result<bool> {
    let run_id = run_id.to_string();
    let synced_at = timestamp_text(synced_at);

    let result = sqlx::query(
        r#"
        UPDATE essays SET
            difficulty_logit = ?,
            difficulty_logit_se = ?,
            is_calibrated = 1,
            calibrated_at = CASE
                WHEN calibration_run_id = ? THEN COALESCE(calibrated_at, ?)
                ELSE ?
            END,
            calibration_run_id = ?,
            updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(difficulty_logit)
    .bind(difficulty_se)
    .bind(&run_id)
    .bind(&synced_at)
    .bind(&synced_at)
    .bind(&run_id)
    .bind(now_text())
    .bind(essay_id.to_string())
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Essays with a result under `run_id` whose cache was not synced from it
///
/// Non-empty after activation means the activation was interrupted and
/// should be re-run.
pub async fn find_stale_calibrations(pool: &SqlitePool, run_id: Uuid) -> Result<Vec<Uuid>> {
    let ids: Vec<String> = sqlx::query_scalar(
        r#"
        SELECT e.id
        FROM calibration_results r
        JOIN essays e ON e.id = r.essay_id
        WHERE r.calibration_run_id = ?
          AND (e.calibration_run_id IS NULL
               OR e.calibration_run_id != r.calibration_run_id
               OR e.difficulty_logit IS NOT r.difficulty_logit)
        ORDER BY e.id
        "#,
    )
    .bind(run_id.to_string())
    .fetch_all(pool)
    .await?;

    ids.iter()
        .map(|id| parse_uuid("essays.id", id))
        .collect()
}
