//! Settings database operations
//!
//! Get/set accessors over the `settings` key-value table.

use mfrm_common::{Error, Result};
use sqlx::{Pool, Sqlite};

/// Default lock wait for `retry_on_lock`
pub const DEFAULT_MAX_LOCK_WAIT_MS: u64 = 5000;

/// Get the Estimation Service base URL from the database
///
/// **Returns:** Some(url) if set, None otherwise
pub async fn get_estimator_base_url(db: &Pool<Sqlite>) -> Result<Option<String>> {
    get_setting::<String>(db, "estimator_base_url").await
}

/// Set the Estimation Service base URL
pub async fn set_estimator_base_url(db: &Pool<Sqlite>, url: String) -> Result<()> {
    set_setting(db, "estimator_base_url", url).await
}

/// Get the Estimation Service timeout in seconds, if configured
pub async fn get_estimator_timeout_secs(db: &Pool<Sqlite>) -> Result<Option<u64>> {
    get_setting(db, "estimator_timeout_secs").await
}

/// Get the maximum total wait for lock retries
///
/// **Default:** 5000 ms
pub async fn get_max_lock_wait_ms(db: &Pool<Sqlite>) -> Result<u64> {
    get_setting(db, "db_max_lock_wait_ms")
        .await
        .map(|opt| opt.unwrap_or(DEFAULT_MAX_LOCK_WAIT_MS))
}

/// Generic setting getter (internal)
async fn get_setting<T>(db: &Pool<Sqlite>, key: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    let row: Option<(Option<String>,)> = sqlx::query_as("SELECT value FROM settings WHERE key = ?")
        .bind(key)
        .fetch_optional(db)
        .await
        .map_err(Error::Database)?;

    match row {
        Some((Some(value),)) => {
            let parsed = value
                .parse::<T>()
                .map_err(|e| Error::Config(format!("Parse setting {} failed: {}", key, e)))?;
            Ok(Some(parsed))
        }
        _ => Ok(None),
    }
}

/// Generic setting setter (internal)
async fn set_setting<T>(db: &Pool<Sqlite>, key: &str, value: T) -> Result<()>
where
    T: std::fmt::Display,
{
    sqlx::query(
        "INSERT INTO settings (key, value) VALUES (?, ?)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = CURRENT_TIMESTAMP",
    )
    .bind(key)
    .bind(value.to_string())
    .execute(db)
    .await
    .map_err(Error::Database)?;

    Ok(())
}
