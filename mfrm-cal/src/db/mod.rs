//! Entity store access for mfrm-cal
//!
//! Free async functions over the shared SQLite pool, one module per
//! entity. Natural-key writes are upserts: the last writer for a key wins.

pub mod calibration_runs;
pub mod consensus_scores;
pub mod essays;
pub mod expert_scores;
pub mod experts;
pub mod rubrics;
pub mod settings;
pub mod teachers;

use chrono::{DateTime, SecondsFormat, Utc};
use mfrm_common::Error;

/// Fixed-width UTC timestamp so TEXT ordering matches time ordering
pub(crate) fn timestamp_text(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn now_text() -> String {
    timestamp_text(Utc::now())
}

/// Turn a foreign key violation into an input error naming the entity kinds involved
pub(crate) fn map_reference_error(err: sqlx::Error, what: &str) -> Error {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.message().contains("FOREIGN KEY constraint failed") {
            return Error::InvalidInput(format!("Unknown {} referenced", what));
        }
    }
    Error::Database(err)
}
