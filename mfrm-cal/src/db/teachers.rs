//! Teacher rater database operations (diagnosis level tracking only)

use mfrm_common::db::{parse_uuid, DiagnosisLevel, Teacher};
use mfrm_common::{Error, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use super::now_text;

fn teacher_from_row(row: &SqliteRow) -> Result<Teacher> {
    let id: String = row.try_get("id")?;
    let count: i64 = row.try_get("essays_rated_count")?;
    let level: String = row.try_get("diagnosis_level")?;

    Ok(Teacher {
        id: parse_uuid("teachers.id", &id)?,
        name: row.try_get("name")?,
        email: row.try_get("email")?,
        essays_rated_count: count.max(0) as u32,
        diagnosis_level: DiagnosisLevel::parse(&level)?,
        is_active: row.try_get("is_active")?,
    })
}

pub async fn insert_teacher(pool: &SqlitePool, name: &str, email: Option<&str>) -> Result<Teacher> {
    if name.trim().is_empty() {
        return Err(Error::InvalidInput("Teacher name must not be empty".to_string()));
    }

    let id = Uuid::new_v4();
    let now = now_text();

    sqlx::query(
        "INSERT INTO teachers (id, name, email, created_at, updated_at) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(id.to_string())
    .bind(name)
    .bind(email)
    .bind(&now)
    .bind(&now)
    .execute(pool)
    .await?;

    get_teacher(pool, id)
        .await?
        .ok_or_else(|| Error::Internal(format!("Teacher {} vanished after insert", id)))
}

pub async fn get_teacher(pool: &SqlitePool, id: Uuid) -> Result<Option<Teacher>> {
    let row = sqlx::query(
        "SELECT id, name, email, essays_rated_count, diagnosis_level, is_active FROM teachers WHERE id = ?",
    )
    .bind(id.to_string())
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(teacher_from_row).transpose()
}

/// Count one more rated essay and raise the stored level if the new count earns it
///
/// `level_for` maps a count to the level it implies. The stored level is a
/// high-water mark and is never lowered here.
pub async fn record_essay_rated<F>(pool: &SqlitePool, id: Uuid, level_for: F) -> Result<Teacher>
where
    F: Fn(u32) -> DiagnosisLevel,
{
    let mut tx = pool.begin().await?;

    let row: Option<(i64, String)> = sqlx::query_as(
        "SELECT essays_rated_count, diagnosis_level FROM teachers WHERE id = ?",
    )
    .bind(id.to_string())
    .fetch_optional(&mut *tx)
    .await?;

    let (count, stored) = row.ok_or_else(|| Error::NotFound(format!("Teacher {}", id)))?;
    let count = count.max(0) as u32 + 1;
    let level = DiagnosisLevel::parse(&stored)?.max(level_for(count));

    sqlx::query(
        "UPDATE teachers SET essays_rated_count = ?, diagnosis_level = ?, updated_at = ? WHERE id = ?",
    )
    .bind(count as i64)
    .bind(level.as_str())
    .bind(now_text())
    .bind(id.to_string())
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    get_teacher(pool, id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("Teacher {}", id)))
}
