//! Configuration resolution for mfrm-cal
//!
//! Estimator settings resolve Database → ENV → TOML → default.

use std::time::Duration;

use mfrm_common::config::TomlConfig;
use mfrm_common::Result;
use sqlx::{Pool, Sqlite};
use tracing::{info, warn};

/// Environment variable naming the Estimation Service base URL
pub const ESTIMATOR_URL_ENV: &str = "MFRM_ESTIMATOR_URL";

pub const DEFAULT_ESTIMATOR_URL: &str = "http://localhost:8000";
pub const DEFAULT_ESTIMATOR_TIMEOUT_SECS: u64 = 120;
pub const DEFAULT_BIND_ADDRESS: &str = "127.0.0.1:5790";

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// Resolve the Estimation Service base URL
///
/// **Priority:** Database → ENV → TOML → `http://localhost:8000`
pub async fn resolve_estimator_url(db: &Pool<Sqlite>, toml_config: &TomlConfig) -> Result<String> {
    let db_url = non_blank(crate::db::settings::get_estimator_base_url(db).await?);
    let env_url = non_blank(std::env::var(ESTIMATOR_URL_ENV).ok());
    let toml_url = non_blank(toml_config.estimator_url.clone());

    let sources: Vec<&str> = [
        (db_url.is_some(), "database"),
        (env_url.is_some(), "environment"),
        (toml_url.is_some(), "TOML"),
    ]
    .iter()
    .filter(|(present, _)| *present)
    .map(|(_, name)| *name)
    .collect();

    if sources.len() > 1 {
        warn!(
            "Estimator URL found in multiple sources: {}. Using {} (highest priority).",
            sources.join(", "),
            sources[0]
        );
    }

    if let Some(url) = db_url {
        info!("Estimator URL loaded from database");
        return Ok(url);
    }
    if let Some(url) = env_url {
        info!("Estimator URL loaded from environment variable");
        return Ok(url);
    }
    if let Some(url) = toml_url {
        info!("Estimator URL loaded from TOML config");
        return Ok(url);
    }

    info!("Estimator URL not configured, using default {}", DEFAULT_ESTIMATOR_URL);
    Ok(DEFAULT_ESTIMATOR_URL.to_string())
}

/// Resolve the estimator call timeout
///
/// **Priority:** Database → TOML → 120 s. Zero is treated as unset.
pub async fn resolve_estimator_timeout(
    db: &Pool<Sqlite>,
    toml_config: &TomlConfig,
) -> Result<Duration> {
    let secs = crate::db::settings::get_estimator_timeout_secs(db)
        .await?
        .filter(|s| *s > 0)
        .or(toml_config.estimator_timeout_secs.filter(|s| *s > 0))
        .unwrap_or(DEFAULT_ESTIMATOR_TIMEOUT_SECS);

    Ok(Duration::from_secs(secs))
}

/// Bind address: CLI → TOML → default
pub fn resolve_bind_address(cli_arg: Option<&str>, toml_config: &TomlConfig) -> String {
    cli_arg
        .map(str::to_string)
        .or_else(|| non_blank(toml_config.bind_address.clone()))
        .unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string())
}
