//! Expert rater database operations

use mfrm_common::db::{parse_uuid, ExpertRater};
use mfrm_common::{Error, Result};
use serde::Deserialize;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use super::now_text;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewExpert {
    pub name: String,
    pub email: Option<String>,
    pub institution: Option<String>,
}

fn expert_from_row(row: &SqliteRow) -> Result<ExpertRater> {
    let id: String = row.try_get("id")?;

    Ok(ExpertRater {
        id: parse_uuid("expert_raters.id", &id)?,
        name: row.try_get("name")?,
        email: row.try_get("email")?,
        institution: row.try_get("institution")?,
        is_active: row.try_get("is_active")?,
    })
}

pub async fn insert_expert(pool: &SqlitePool, expert: &NewExpert) -> Result<ExpertRater> {
    if expert.name.trim().is_empty() {
        return Err(Error::InvalidInput("Expert name must not be empty".to_string()));
    }

    let id = Uuid::new_v4();
    let now = now_text();

    sqlx::query(
        r#"
        INSERT INTO expert_raters (id, name, email, institution, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(id.to_string())
    .bind(&expert.name)
    .bind(&expert.email)
    .bind(&expert.institution)
    .bind(&now)
    .bind(&now)
    .execute(pool)
    .await?;

    get_expert(pool, id)
        .await?
        .ok_or_else(|| Error::Internal(format!("Expert {} vanished after insert", id)))
}

pub async fn get_expert(pool: &SqlitePool, id: Uuid) -> Result<Option<ExpertRater>> {
    let row = sqlx::query(
        "SELECT id, name, email, institution, is_active FROM expert_raters WHERE id = ?",
    )
    .bind(id.to_string())
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(expert_from_row).transpose()
}

pub async fn list_active_experts(pool: &SqlitePool) -> Result<Vec<ExpertRater>> {
    let rows = sqlx::query(
        "SELECT id, name, email, institution, is_active FROM expert_raters WHERE is_active = 1 ORDER BY name, id",
    )
    .fetch_all(pool)
    .await?;

    rows.iter().map(expert_from_row).collect()
}

pub async fn count_active_experts(pool: &SqlitePool) -> Result<i64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM expert_raters WHERE is_active = 1")
        .fetch_one(pool)
        .await?;

    Ok(count)
}

/// Remove an expert from the panel; existing scores are kept
pub async fn deactivate_expert(pool: &SqlitePool, id: Uuid) -> Result<()> {
    let result = sqlx::query("UPDATE expert_raters SET is_active = 0, updated_at = ? WHERE id = ?")
        .bind(now_text())
        .bind(id.to_string())
        .execute(pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(Error::NotFound(format!("Expert {}", id)));
    }
    Ok(())
}
