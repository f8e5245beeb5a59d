//! Calibration readiness and versioning services
//!
//! Pure computations (coverage, readiness, progress, diagnosis) paired with
//! thin loaders that read their inputs from the entity store, plus the
//! run manager that talks to the Estimation Service.

pub mod calibration_manager;
pub mod coverage;
pub mod diagnosis;
pub mod estimation_client;
pub mod progress;
pub mod readiness;

pub use calibration_manager::{ActivationReport, CalibrationManager, RunRequest};
pub use coverage::{CoverageRow, CoverageStatus, CoverageSummary};
pub use diagnosis::DiagnosisProgress;
pub use estimation_client::{EstimationError, Estimator, HttpEstimator};
pub use readiness::{ReadinessReport, ReadinessStatus};

use thiserror::Error;

/// Errors surfaced by the calibration services
///
/// Each variant tells the caller which remediation applies: fix the
/// input, collect more data, or retry once the estimator is reachable.
#[derive(Debug, Error)]
pub enum CalibrationError {
    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("Not enough data to calibrate: {0}")]
    NotReady(String),

    #[error("Estimation service call failed: {0}")]
    Dependency(String),

    #[error("Invariant violated: {0}")]
    InvariantViolation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Store error: {0}")]
    Store(mfrm_common::Error),
}

impl From<mfrm_common::Error> for CalibrationError {
    fn from(err: mfrm_common::Error) -> Self {
        match err {
            mfrm_common::Error::InvalidInput(msg) => Self::Validation(msg),
            mfrm_common::Error::NotFound(msg) => Self::NotFound(msg),
            mfrm_common::Error::Conflict(msg) => Self::Conflict(msg),
            other => Self::Store(other),
        }
    }
}

impl From<EstimationError> for CalibrationError {
    fn from(err: EstimationError) -> Self {
        Self::Dependency(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, CalibrationError>;
