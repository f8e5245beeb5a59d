//! Tests for database initialization and migrations

use mfrm_common::db::init::{create_schema, init_database};
use mfrm_common::db::migrations::{get_schema_version, run_migrations, CURRENT_SCHEMA_VERSION};
use sqlx::sqlite::SqlitePoolOptions;
use tempfile::TempDir;

#[tokio::test]
async fn test_database_creation_when_missing() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("nested").join("mfrm.db");

    let result = init_database(&db_path).await;

    assert!(result.is_ok(), "Database initialization failed: {:?}", result.err());
    assert!(db_path.exists(), "Database file was not created");
}

#[tokio::test]
async fn test_database_opens_existing() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("mfrm.db");

    let pool1 = init_database(&db_path).await.unwrap();
    pool1.close().await;

    let pool2 = init_database(&db_path).await;
    assert!(pool2.is_ok(), "Failed to open existing database: {:?}", pool2.err());
}

#[tokio::test]
async fn test_default_settings_initialized() {
    let temp_dir = TempDir::new().unwrap();
    let pool = init_database(&temp_dir.path().join("mfrm.db")).await.unwrap();

    let value: String =
        sqlx::query_scalar("SELECT value FROM settings WHERE key = 'db_max_lock_wait_ms'")
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(value, "5000");

    let timeout: String =
        sqlx::query_scalar("SELECT value FROM settings WHERE key = 'estimator_timeout_secs'")
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(timeout, "120");
}

#[tokio::test]
async fn test_user_settings_survive_reinit() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("mfrm.db");

    let pool = init_database(&db_path).await.unwrap();
    sqlx::query("UPDATE settings SET value = '900' WHERE key = 'estimator_timeout_secs'")
        .execute(&pool)
        .await
        .unwrap();
    pool.close().await;

    let pool = init_database(&db_path).await.unwrap();
    let timeout: String =
        sqlx::query_scalar("SELECT value FROM settings WHERE key = 'estimator_timeout_secs'")
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(timeout, "900");
}

#[tokio::test]
async fn test_migrations_record_current_version() {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();

    create_schema(&pool).await.unwrap();
    run_migrations(&pool).await.unwrap();
    assert_eq!(get_schema_version(&pool).await.unwrap(), CURRENT_SCHEMA_VERSION);

    // Second run is a no-op
    run_migrations(&pool).await.unwrap();
    assert_eq!(get_schema_version(&pool).await.unwrap(), CURRENT_SCHEMA_VERSION);
}

#[tokio::test]
async fn test_unstamped_database_gets_baseline_version() {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();

    create_schema(&pool).await.unwrap();
    assert_eq!(get_schema_version(&pool).await.unwrap(), 0);

    run_migrations(&pool).await.unwrap();
    assert_eq!(get_schema_version(&pool).await.unwrap(), 1);
}

#[tokio::test]
async fn test_newer_database_is_left_alone() {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();

    create_schema(&pool).await.unwrap();
    sqlx::query("INSERT INTO schema_version (version) VALUES (?)")
        .bind(CURRENT_SCHEMA_VERSION + 1)
        .execute(&pool)
        .await
        .unwrap();

    run_migrations(&pool).await.unwrap();

    let rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM schema_version")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(rows, 1);
    assert_eq!(get_schema_version(&pool).await.unwrap(), CURRENT_SCHEMA_VERSION + 1);
}

#[tokio::test]
async fn test_store_refuses_second_active_run() {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    create_schema(&pool).await.unwrap();

    let insert = |id: &'static str, version: &'static str| {
        sqlx::query(
            r#"
            INSERT INTO calibration_runs (id, name, version_id, status, is_active_version, created_at, updated_at)
            VALUES (?, 'run', ?, 'completed', 1, '2026-01-01T00:00:00Z', '2026-01-01T00:00:00Z')
            "#,
        )
        .bind(id)
        .bind(version)
    };

    insert("a", "v1").execute(&pool).await.unwrap();
    let second = insert("b", "v2").execute(&pool).await;
    assert!(second.is_err(), "Partial unique index should reject a second active run");
}
