//! Calibration run and result database operations
//!
//! A run is created `pending`, then either completed together with all of
//! its result rows in one transaction, or failed with its results removed
//! in one transaction. Terminal runs never change status again.

use chrono::Utc;
use mfrm_common::db::{
    parse_optional_timestamp, parse_timestamp, parse_uuid, parse_uuid_list, CalibrationResult,
    CalibrationRun, RaterResult, RunStatus,
};
use mfrm_common::{Error, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use super::now_text;

const RUN_COLUMNS: &str = r#"
    id, name, description, version_id, status, is_active_version, essay_ids, rubric_ids,
    total_observations, convergence, separation_reliability, method, expert_count,
    error_message, started_at, completed_at, created_at
"#;

/// Message recorded on runs found unfinished at startup
pub const INTERRUPTED_MESSAGE: &str = "Run interrupted before the estimator responded";

/// Fields fixed when a run is created
#[derive(Debug, Clone, Default)]
pub struct NewRun {
    pub name: String,
    pub description: Option<String>,
    pub essay_ids: Vec<Uuid>,
    pub rubric_ids: Vec<Uuid>,
    pub total_observations: i64,
    pub expert_count: i64,
}

/// Summary statistics written when a run completes
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub converged: bool,
    pub method: String,
    pub separation_reliability: Option<f64>,
    pub total_observations: i64,
    pub expert_count: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct NewResult {
    pub essay_id: Uuid,
    pub difficulty_logit: f64,
    pub difficulty_se: Option<f64>,
    pub difficulty_ci_lower: Option<f64>,
    pub difficulty_ci_upper: Option<f64>,
    pub infit: Option<f64>,
    pub outfit: Option<f64>,
    pub mean_score: Option<f64>,
    pub sd_score: Option<f64>,
    pub expert_count: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct NewRaterResult {
    pub rater_id: String,
    pub severity: f64,
    pub severity_se: Option<f64>,
    pub infit: Option<f64>,
    pub outfit: Option<f64>,
    pub mean_score: Option<f64>,
    pub feedback: Option<String>,
}

/// Audit identity: creation millis plus a short random suffix
fn new_version_id() -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!(
        "cal_expert_v{}_{}",
        Utc::now().timestamp_millis(),
        &suffix[..8]
    )
}

fn run_from_row(row: &SqliteRow) -> Result<CalibrationRun> {
    let id: String = row.try_get("id")?;
    let status: String = row.try_get("status")?;
    let essay_ids: String = row.try_get("essay_ids")?;
    let rubric_ids: String = row.try_get("rubric_ids")?;
    let created_at: String = row.try_get("created_at")?;

    Ok(CalibrationRun {
        id: parse_uuid("calibration_runs.id", &id)?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        version_id: row.try_get("version_id")?,
        status: RunStatus::parse(&status)?,
        is_active_version: row.try_get("is_active_version")?,
        essay_ids: parse_uuid_list("calibration_runs.essay_ids", &essay_ids)?,
        rubric_ids: parse_uuid_list("calibration_runs.rubric_ids", &rubric_ids)?,
        total_observations: row.try_get("total_observations")?,
        convergence: row.try_get("convergence")?,
        separation_reliability: row.try_get("separation_reliability")?,
        method: row.try_get("method")?,
        expert_count: row.try_get("expert_count")?,
        error_message: row.try_get("error_message")?,
        started_at: parse_optional_timestamp("calibration_runs.started_at", row.try_get("started_at")?)?,
        completed_at: parse_optional_timestamp(
            "calibration_runs.completed_at",
            row.try_get("completed_at")?,
        )?,
        created_at: parse_timestamp("calibration_runs.created_at", &created_at)?,
    })
}

fn result_from_row(row: &SqliteRow) -> Result<CalibrationResult> {
    let id: String = row.try_get("id")?;
    let run_id: String = row.try_get("calibration_run_id")?;
    let essay_id: String = row.try_get("essay_id")?;

    Ok(CalibrationResult {
        id: parse_uuid("calibration_results.id", &id)?,
        calibration_run_id: parse_uuid("calibration_results.calibration_run_id", &run_id)?,
        essay_id: parse_uuid("calibration_results.essay_id", &essay_id)?,
        essay_title: row.try_get("essay_title")?,
        difficulty_logit: row.try_get("difficulty_logit")?,
        difficulty_se: row.try_get("difficulty_se")?,
        difficulty_ci_lower: row.try_get("difficulty_ci_lower")?,
        difficulty_ci_upper: row.try_get("difficulty_ci_upper")?,
        infit: row.try_get("infit")?,
        outfit: row.try_get("outfit")?,
        mean_score: row.try_get("mean_score")?,
        sd_score: row.try_get("sd_score")?,
        expert_count: row.try_get("expert_count")?,
    })
}

/// Create a run in `pending` status
pub async fn create_pending_run(pool: &SqlitePool, run: &NewRun) -> Result<CalibrationRun> {
    if run.name.trim().is_empty() {
        return Err(Error::InvalidInput("Run name must not be empty".to_string()));
    }

    let id = Uuid::new_v4();
    let now = now_text();
    let essay_ids = serde_json::to_string(&run.essay_ids)
        .map_err(|e| Error::Internal(format!("Failed to serialize essay_ids: {}", e)))?;
    let rubric_ids = serde_json::to_string(&run.rubric_ids)
        .map_err(|e| Error::Internal(format!("Failed to serialize rubric_ids: {}", e)))?;

    sqlx::query(
        r#"
        INSERT INTO calibration_runs (
            id, name, description, version_id, status, essay_ids, rubric_ids,
            total_observations, expert_count, started_at, created_at, updated_at
        )
        VALUES (?, ?, ?, ?, 'pending', ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(id.to_string())
    .bind(&run.name)
    .bind(&run.description)
    .bind(new_version_id())
    .bind(essay_ids)
    .bind(rubric_ids)
    .bind(run.total_observations)
    .bind(run.expert_count)
    .bind(&now)
    .bind(&now)
    .bind(&now)
    .execute(pool)
    .await?;

    get_run(pool, id)
        .await?
        .ok_or_else(|| Error::Internal(format!("Run {} vanished after insert", id)))
}

/// Mark a pending run completed and attach its results, all or nothing
///
/// Fails with `Conflict` when the run is no longer pending (for example
/// after startup recovery marked it failed).
pub async fn complete_run(
    pool: &SqlitePool,
    run_id: Uuid,
    summary: &RunSummary,
    results: &[NewResult],
    rater_results: &[NewRaterResult],
) -> Result<()> {
    let now = now_text();
    let run_key = run_id.to_string();
    let mut tx = pool.begin().await?;

    let updated = sqlx::query(
        r#"
        UPDATE calibration_runs SET
            status = 'completed',
            convergence = ?,
            method = ?,
            separation_reliability = ?,
            total_observations = ?,
            expert_count = COALESCE(?, expert_count),
            completed_at = ?,
            updated_at = ?
        WHERE id = ? AND status IN ('pending', 'running')
        "#,
    )
    .bind(summary.converged)
    .bind(&summary.method)
    .bind(summary.separation_reliability)
    .bind(summary.total_observations)
    .bind(summary.expert_count)
    .bind(&now)
    .bind(&now)
    .bind(&run_key)
    .execute(&mut *tx)
    .await?;

    if updated.rows_affected() == 0 {
        return Err(Error::Conflict(format!(
            "Run {} is not pending and cannot be completed",
            run_id
        )));
    }

    for result in results {
        sqlx::query(
            r#"
            INSERT INTO calibration_results (
                id, calibration_run_id, essay_id, difficulty_logit, difficulty_se,
                difficulty_ci_lower, difficulty_ci_upper, infit, outfit,
                mean_score, sd_score, expert_count, created_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(&run_key)
        .bind(result.essay_id.to_string())
        .bind(result.difficulty_logit)
        .bind(result.difficulty_se)
        .bind(result.difficulty_ci_lower)
        .bind(result.difficulty_ci_upper)
        .bind(result.infit)
        .bind(result.outfit)
        .bind(result.mean_score)
        .bind(result.sd_score)
        .bind(result.expert_count)
        .bind(&now)
        .execute(&mut *tx)
        .await?;
    }

    for rater in rater_results {
        sqlx::query(
            r#"
            INSERT INTO calibration_rater_results (
                id, calibration_run_id, rater_id, severity, severity_se,
                infit, outfit, mean_score, feedback, created_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(&run_key)
        .bind(&rater.rater_id)
        .bind(rater.severity)
        .bind(rater.severity_se)
        .bind(rater.infit)
        .bind(rater.outfit)
        .bind(rater.mean_score)
        .bind(&rater.feedback)
        .bind(&now)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(())
}

/// Mark a non-terminal run failed and drop any results attached to it
///
/// **Returns:** false when the run was already terminal or does not exist
pub async fn fail_run(pool: &SqlitePool, run_id: Uuid, error_message: &str) -> Result<bool> {
    let now = now_text();
    let run_key = run_id.to_string();
    let mut tx = pool.begin().await?;

    let updated = sqlx::query(
        r#"
        UPDATE calibration_runs SET
            status = 'failed',
            error_message = ?,
            completed_at = ?,
            updated_at = ?
        WHERE id = ? AND status IN ('pending', 'running')
        "#,
    )
    .bind(error_message)
    .bind(&now)
    .bind(&now)
    .bind(&run_key)
    .execute(&mut *tx)
    .await?;

    if updated.rows_affected() > 0 {
        sqlx::query("DELETE FROM calibration_results WHERE calibration_run_id = ?")
            .bind(&run_key)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM calibration_rater_results WHERE calibration_run_id = ?")
            .bind(&run_key)
            .execute(&mut *tx)
            .await?;
    }

    tx.commit().await?;
    Ok(updated.rows_affected() > 0)
}

/// Fail every run a previous process left unfinished
///
/// **Returns:** number of runs marked failed
pub async fn fail_interrupted_runs(pool: &SqlitePool) -> Result<u64> {
    let now = now_text();

    let result = sqlx::query(
        r#"
        UPDATE calibration_runs SET
            status = 'failed',
            error_message = ?,
            completed_at = ?,
            updated_at = ?
        WHERE status IN ('pending', 'running')
        "#,
    )
    .bind(INTERRUPTED_MESSAGE)
    .bind(&now)
    .bind(&now)
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}

pub async fn get_run(pool: &SqlitePool, id: Uuid) -> Result<Option<CalibrationRun>> {
    let sql = format!("SELECT {} FROM calibration_runs WHERE id = ?", RUN_COLUMNS);
    let row = sqlx::query(&sql)
        .bind(id.to_string())
        .fetch_optional(pool)
        .await?;

    row.as_ref().map(run_from_row).transpose()
}

/// All runs, newest first
pub async fn list_runs(pool: &SqlitePool) -> Result<Vec<CalibrationRun>> {
    let sql = format!(
        "SELECT {} FROM calibration_runs ORDER BY created_at DESC, id DESC",
        RUN_COLUMNS
    );
    let rows = sqlx::query(&sql).fetch_all(pool).await?;

    rows.iter().map(run_from_row).collect()
}

/// Runs flagged active; more than one means the invariant is broken
pub async fn list_active_runs(pool: &SqlitePool) -> Result<Vec<CalibrationRun>> {
    let sql = format!(
        "SELECT {} FROM calibration_runs WHERE is_active_version = 1 ORDER BY created_at, id",
        RUN_COLUMNS
    );
    let rows = sqlx::query(&sql).fetch_all(pool).await?;

    rows.iter().map(run_from_row).collect()
}

/// Results of one run with essay titles, ordered by difficulty
pub async fn list_results(pool: &SqlitePool, run_id: Uuid) -> Result<Vec<CalibrationResult>> {
    let rows = sqlx::query(
        r#"
        SELECT r.id, r.calibration_run_id, r.essay_id, e.title AS essay_title,
               r.difficulty_logit, r.difficulty_se, r.difficulty_ci_lower, r.difficulty_ci_upper,
               r.infit, r.outfit, r.mean_score, r.sd_score, r.expert_count
        FROM calibration_results r
        LEFT JOIN essays e ON e.id = r.essay_id
        WHERE r.calibration_run_id = ?
        ORDER BY r.difficulty_logit, r.essay_id
        "#,
    )
    .bind(run_id.to_string())
    .fetch_all(pool)
    .await?;

    rows.iter().map(result_from_row).collect()
}

pub async fn list_rater_results(pool: &SqlitePool, run_id: Uuid) -> Result<Vec<RaterResult>> {
    let rows = sqlx::query(
        r#"
        SELECT id, calibration_run_id, rater_id, severity, severity_se,
               infit, outfit, mean_score, feedback
        FROM calibration_rater_results
        WHERE calibration_run_id = ?
        ORDER BY severity, rater_id
        "#,
    )
    .bind(run_id.to_string())
    .fetch_all(pool)
    .await?;

    rows.iter()
        .map(|row| {
            let id: String = row.try_get("id")?;
            let run: String = row.try_get("calibration_run_id")?;
            Ok(RaterResult {
                id: parse_uuid("calibration_rater_results.id", &id)?,
                calibration_run_id: parse_uuid("calibration_rater_results.calibration_run_id", &run)?,
                rater_id: row.try_get("rater_id")?,
                severity: row.try_get("severity")?,
                severity_se: row.try_get("severity_se")?,
                infit: row.try_get("infit")?,
                outfit: row.try_get("outfit")?,
                mean_score: row.try_get("mean_score")?,
                feedback: row.try_get("feedback")?,
            })
        })
        .collect()
}

pub async fn count_results(pool: &SqlitePool, run_id: Uuid) -> Result<i64> {
    let count: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM calibration_results WHERE calibration_run_id = ?")
            .bind(run_id.to_string())
            .fetch_one(pool)
            .await?;

    Ok(count)
}

/// Clear every other run's active flag and set the target's, atomically
///
/// Only completed runs can become active.
pub async fn set_active_version(pool: &SqlitePool, run_id: Uuid) -> Result<()> {
    let now = now_text();
    let run_key = run_id.to_string();
    let mut tx = pool.begin().await?;

    sqlx::query(
        r#"
        UPDATE calibration_runs SET is_active_version = 0, updated_at = ?
        WHERE is_active_version = 1 AND id != ?
        "#,
    )
    .bind(&now)
    .bind(&run_key)
    .execute(&mut *tx)
    .await?;

    let updated = sqlx::query(
        r#"
        UPDATE calibration_runs SET is_active_version = 1, updated_at = ?
        WHERE id = ? AND status = 'completed'
        "#,
    )
    .bind(&now)
    .bind(&run_key)
    .execute(&mut *tx)
    .await?;

    if updated.rows_affected() == 0 {
        return Err(Error::Conflict(format!(
            "Run {} is not a completed run and cannot be activated",
            run_id
        )));
    }

    tx.commit().await?;
    Ok(())
}
