//! Schema versioning for calibration databases
//!
//! `create_schema` lays out every table at the baseline (v1). This module
//! records which version a database file is at, so a later layout change
//! can be added as a numbered step that brings older files forward.
//! Published steps are never edited.

use crate::Result;
use sqlx::SqlitePool;
use tracing::{info, warn};

/// Baseline layout produced by `create_schema`
pub const CURRENT_SCHEMA_VERSION: i32 = 1;

/// Version recorded in `schema_version`, or 0 for a file that was never stamped
pub async fn get_schema_version(pool: &SqlitePool) -> Result<i32> {
    let table_exists: bool = sqlx::query_scalar(
        r#"
        SELECT EXISTS(
            SELECT 1 FROM sqlite_master
            WHERE type='table' AND name='schema_version'
        )
        "#,
    )
    .fetch_one(pool)
    .await?;

    if !table_exists {
        return Ok(0);
    }

    let version: Option<i32> =
        sqlx::query_scalar("SELECT MAX(version) FROM schema_version")
            .fetch_one(pool)
            .await?;

    Ok(version.unwrap_or(0))
}

async fn set_schema_version(pool: &SqlitePool, version: i32) -> Result<()> {
    sqlx::query("INSERT OR IGNORE INTO schema_version (version) VALUES (?)")
        .bind(version)
        .execute(pool)
        .await?;

    Ok(())
}

/// Bring the database up to `CURRENT_SCHEMA_VERSION`
///
/// Expects `create_schema` to have run first.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    let current_version = get_schema_version(pool).await?;

    if current_version == CURRENT_SCHEMA_VERSION {
        info!("Database schema is up to date (v{})", current_version);
        return Ok(());
    }

    if current_version > CURRENT_SCHEMA_VERSION {
        warn!(
            "Database schema version ({}) is newer than this build ({})",
            current_version, CURRENT_SCHEMA_VERSION
        );
        return Ok(());
    }

    if current_version < 1 {
        set_schema_version(pool, 1).await?;
        info!("Database stamped at schema v1");
    }

    Ok(())
}
