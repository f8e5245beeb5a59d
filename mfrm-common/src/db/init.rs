//! Database initialization
//!
//! Creates the database file on first run, applies connection pragmas,
//! creates every table with `CREATE TABLE IF NOT EXISTS`, runs versioned
//! migrations and seeds default settings.

use crate::Result;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use std::path::Path;
use tracing::info;

/// Initialize database connection and create tables if needed
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    // Create parent directory if it doesn't exist
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    let pool = SqlitePoolOptions::new()
        .max_connections(10)
        .min_connections(1)
        .connect(&db_url)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    // WAL allows concurrent readers with one writer
    sqlx::query("PRAGMA journal_mode = WAL")
        .execute(&pool)
        .await?;

    sqlx::query("PRAGMA busy_timeout = 5000")
        .execute(&pool)
        .await?;

    create_schema(&pool).await?;

    crate::db::migrations::run_migrations(&pool).await?;

    init_default_settings(&pool).await?;

    Ok(pool)
}

/// Create every table and index (idempotent)
///
/// Also used by tests against in-memory pools.
pub async fn create_schema(pool: &SqlitePool) -> Result<()> {
    sqlx::query("PRAGMA foreign_keys = ON")
        .execute(pool)
        .await?;

    create_schema_version_table(pool).await?;
    create_settings_table(pool).await?;

    create_essays_table(pool).await?;
    create_rubrics_table(pool).await?;
    create_expert_raters_table(pool).await?;
    create_teachers_table(pool).await?;

    create_expert_scores_table(pool).await?;
    create_consensus_scores_table(pool).await?;

    create_calibration_runs_table(pool).await?;
    create_calibration_results_table(pool).await?;
    create_calibration_rater_results_table(pool).await?;

    Ok(())
}

async fn create_schema_version_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Create the settings table
///
/// Stores runtime tunables as key-value pairs.
pub async fn create_settings_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS settings (
            key TEXT PRIMARY KEY,
            value TEXT,
            updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Essays carry a cached copy of the active run's difficulty.
///
/// `difficulty_logit` is set exactly when `is_calibrated` is, and
/// `calibration_run_id` names the run the cache was synced from.
async fn create_essays_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS essays (
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            content TEXT NOT NULL DEFAULT '',
            is_active INTEGER NOT NULL DEFAULT 1,
            is_anchor INTEGER NOT NULL DEFAULT 0,
            is_calibration INTEGER NOT NULL DEFAULT 0,
            anchor_explanation TEXT,
            difficulty_logit REAL,
            difficulty_logit_se REAL,
            is_calibrated INTEGER NOT NULL DEFAULT 0,
            calibrated_at TEXT,
            calibration_run_id TEXT REFERENCES calibration_runs(id),
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            CHECK ((is_calibrated = 1) = (difficulty_logit IS NOT NULL))
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_essays_anchor ON essays(is_anchor, is_active)")
        .execute(pool)
        .await?;

    Ok(())
}

async fn create_rubrics_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS rubrics (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            category TEXT NOT NULL,
            description TEXT,
            boundary_1_2_description TEXT,
            boundary_2_3_description TEXT,
            min_score INTEGER NOT NULL DEFAULT 1,
            max_score INTEGER NOT NULL DEFAULT 3,
            display_order INTEGER NOT NULL DEFAULT 0,
            is_active INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_expert_raters_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS expert_raters (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            email TEXT,
            institution TEXT,
            is_active INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Operational teacher raters (diagnosis level tracking only)
async fn create_teachers_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS teachers (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            email TEXT,
            essays_rated_count INTEGER NOT NULL DEFAULT 0,
            diagnosis_level TEXT NOT NULL DEFAULT 'none',
            is_active INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// One row per (expert, essay, rubric); re-scoring overwrites in place
async fn create_expert_scores_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS expert_scores (
            id TEXT PRIMARY KEY,
            expert_id TEXT NOT NULL REFERENCES expert_raters(id),
            essay_id TEXT NOT NULL REFERENCES essays(id),
            rubric_id TEXT NOT NULL REFERENCES rubrics(id),
            score INTEGER NOT NULL CHECK (score BETWEEN 1 AND 3),
            confidence_level INTEGER CHECK (confidence_level IS NULL OR confidence_level BETWEEN 1 AND 5),
            is_boundary_case INTEGER NOT NULL DEFAULT 0,
            boundary_type TEXT CHECK (boundary_type IS NULL OR boundary_type IN ('1-2', '2-3')),
            rationale TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            UNIQUE (expert_id, essay_id, rubric_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_expert_scores_cell ON expert_scores(essay_id, rubric_id)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Panel-adjudicated score per (essay, rubric)
async fn create_consensus_scores_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS anchor_consensus_scores (
            id TEXT PRIMARY KEY,
            essay_id TEXT NOT NULL REFERENCES essays(id),
            rubric_id TEXT NOT NULL REFERENCES rubrics(id),
            consensus_score INTEGER NOT NULL CHECK (consensus_score BETWEEN 1 AND 3),
            is_boundary_1_2 INTEGER NOT NULL DEFAULT 0,
            is_boundary_2_3 INTEGER NOT NULL DEFAULT 0,
            expert_panel_size INTEGER NOT NULL DEFAULT 1,
            agreement_rate REAL,
            boundary_rationale TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            UNIQUE (essay_id, rubric_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Calibration runs
///
/// The partial unique index makes the store itself refuse a second
/// active version.
async fn create_calibration_runs_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS calibration_runs (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            description TEXT,
            version_id TEXT NOT NULL UNIQUE,
            status TEXT NOT NULL CHECK (status IN ('pending', 'running', 'completed', 'failed')),
            is_active_version INTEGER NOT NULL DEFAULT 0,
            essay_ids TEXT NOT NULL DEFAULT '[]',
            rubric_ids TEXT NOT NULL DEFAULT '[]',
            total_observations INTEGER NOT NULL DEFAULT 0,
            convergence INTEGER,
            separation_reliability REAL,
            method TEXT,
            expert_count INTEGER,
            error_message TEXT,
            started_at TEXT,
            completed_at TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE UNIQUE INDEX IF NOT EXISTS idx_calibration_runs_single_active
        ON calibration_runs(is_active_version)
        WHERE is_active_version = 1
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Per-essay estimates; essays are referenced weakly (no foreign key)
async fn create_calibration_results_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS calibration_results (
            id TEXT PRIMARY KEY,
            calibration_run_id TEXT NOT NULL REFERENCES calibration_runs(id) ON DELETE CASCADE,
            essay_id TEXT NOT NULL,
            difficulty_logit REAL NOT NULL,
            difficulty_se REAL,
            difficulty_ci_lower REAL,
            difficulty_ci_upper REAL,
            infit REAL,
            outfit REAL,
            mean_score REAL,
            sd_score REAL,
            expert_count INTEGER,
            created_at TEXT NOT NULL,
            UNIQUE (calibration_run_id, essay_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_calibration_rater_results_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS calibration_rater_results (
            id TEXT PRIMARY KEY,
            calibration_run_id TEXT NOT NULL REFERENCES calibration_runs(id) ON DELETE CASCADE,
            rater_id TEXT NOT NULL,
            severity REAL NOT NULL,
            severity_se REAL,
            infit REAL,
            outfit REAL,
            mean_score REAL,
            feedback TEXT,
            created_at TEXT NOT NULL,
            UNIQUE (calibration_run_id, rater_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Ensure every default setting exists without overwriting user values
async fn init_default_settings(pool: &SqlitePool) -> Result<()> {
    ensure_setting(pool, "db_max_lock_wait_ms", "5000").await?;
    ensure_setting(pool, "estimator_timeout_secs", "120").await?;
    Ok(())
}

/// Insert a setting if missing, or reset it when stored as NULL
async fn ensure_setting(pool: &SqlitePool, key: &str, default_value: &str) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO settings (key, value) VALUES (?, ?)
        ON CONFLICT(key) DO UPDATE SET value = excluded.value
        WHERE settings.value IS NULL
        "#,
    )
    .bind(key)
    .bind(default_value)
    .execute(pool)
    .await?;

    Ok(())
}
