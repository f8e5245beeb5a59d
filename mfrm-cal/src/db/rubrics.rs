//! Rubric database operations

use mfrm_common::db::{parse_uuid, Rubric};
use mfrm_common::{Error, Result};
use serde::Deserialize;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use super::now_text;

const RUBRIC_COLUMNS: &str = r#"
    id, name, category, description, boundary_1_2_description,
    boundary_2_3_description, display_order, is_active
"#;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewRubric {
    pub name: String,
    pub category: String,
    pub description: Option<String>,
    pub boundary_1_2_description: Option<String>,
    pub boundary_2_3_description: Option<String>,
    #[serde(default)]
    pub display_order: i64,
}

fn rubric_from_row(row: &SqliteRow) -> Result<Rubric> {
    let id: String = row.try_get("id")?;

    Ok(Rubric {
        id: parse_uuid("rubrics.id", &id)?,
        name: row.try_get("name")?,
        category: row.try_get("category")?,
        description: row.try_get("description")?,
        boundary_1_2_description: row.try_get("boundary_1_2_description")?,
        boundary_2_3_description: row.try_get("boundary_2_3_description")?,
        display_order: row.try_get("display_order")?,
        is_active: row.try_get("is_active")?,
    })
}

pub async fn insert_rubric(pool: &SqlitePool, rubric: &NewRubric) -> Result<Rubric> {
    if rubric.name.trim().is_empty() {
        return Err(Error::InvalidInput("Rubric name must not be empty".to_string()));
    }

    let id = Uuid::new_v4();
    let now = now_text();

    sqlx::query(
        r#"
        INSERT INTO rubrics (
            id, name, category, description, boundary_1_2_description,
            boundary_2_3_description, display_order, created_at, updated_at
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(id.to_string())
    .bind(&rubric.name)
    .bind(&rubric.category)
    .bind(&rubric.description)
    .bind(&rubric.boundary_1_2_description)
    .bind(&rubric.boundary_2_3_description)
    .bind(rubric.display_order)
    .bind(&now)
    .bind(&now)
    .execute(pool)
    .await?;

    get_rubric(pool, id)
        .await?
        .ok_or_else(|| Error::Internal(format!("Rubric {} vanished after insert", id)))
}

pub async fn get_rubric(pool: &SqlitePool, id: Uuid) -> Result<Option<Rubric>> {
    let sql = format!("SELECT {} FROM rubrics WHERE id = ?", RUBRIC_COLUMNS);
    let row = sqlx::query(&sql)
        .bind(id.to_string())
        .fetch_optional(pool)
        .await?;

    row.as_ref().map(rubric_from_row).transpose()
}

/// Active rubrics in display order
pub async fn list_active_rubrics(pool: &SqlitePool) -> Result<Vec<Rubric>> {
    let sql = format!(
        "SELECT {} FROM rubrics WHERE is_active = 1 ORDER BY display_order, name, id",
        RUBRIC_COLUMNS
    );
    let rows = sqlx::query(&sql).fetch_all(pool).await?;

    rows.iter().map(rubric_from_row).collect()
}

pub async fn count_active_rubrics(pool: &SqlitePool) -> Result<i64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM rubrics WHERE is_active = 1")
        .fetch_one(pool)
        .await?;

    Ok(count)
}

/// Retire a rubric; its scores stay for history
pub async fn deactivate_rubric(pool: &SqlitePool, id: Uuid) -> Result<()> {
    let result = sqlx::query("UPDATE rubrics SET is_active = 0, updated_at = ? WHERE id = ?")
        .bind(now_text())
        .bind(id.to_string())
        .execute(pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(Error::NotFound(format!("Rubric {}", id)));
    }
    Ok(())
}

/// Hard delete, refused while any score references the rubric
pub async fn delete_rubric(pool: &SqlitePool, id: Uuid) -> Result<()> {
    let referenced: i64 = sqlx::query_scalar(
        r#"
        SELECT (SELECT COUNT(*) FROM expert_scores WHERE rubric_id = ?1)
             + (SELECT COUNT(*) FROM anchor_consensus_scores WHERE rubric_id = ?1)
        "#,
    )
    .bind(id.to_string())
    .fetch_one(pool)
    .await?;

    if referenced > 0 {
        return Err(Error::Conflict(format!(
            "Rubric {} is referenced by {} scores; deactivate it instead",
            id, referenced
        )));
    }

    let result = sqlx::query("DELETE FROM rubrics WHERE id = ?")
        .bind(id.to_string())
        .execute(pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(Error::NotFound(format!("Rubric {}", id)));
    }
    Ok(())
}
