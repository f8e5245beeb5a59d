//! Calibration run manager
//!
//! Submits expert scores to the Estimation Service, persists the run and
//! its results, and moves the single active version between runs.
//!
//! Run lifecycle: `pending` → `completed` (results written in the same
//! transaction) or `pending` → `failed` (no results kept). Both are
//! terminal; retrying means creating a new run.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use mfrm_common::db::{CalibrationResult, CalibrationRun, ExpertScore, RaterResult, RunStatus};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::estimation_client::{EstimationError, EstimationResponse, Estimator, Observation};
use super::{readiness, CalibrationError, Result};
use crate::db::calibration_runs::{self, NewRaterResult, NewResult, NewRun, RunSummary};
use crate::db::{essays, expert_scores, settings};
use crate::utils::retry_on_lock;

/// Caller's request to start a calibration run
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RunRequest {
    pub name: String,
    pub description: Option<String>,
    /// Run even when the readiness checklist fails
    #[serde(default)]
    pub override_not_ready: bool,
}

/// Outcome of an activation pass
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActivationReport {
    pub run_id: Uuid,
    pub version_id: String,
    pub essays_updated: usize,
    /// Results whose essay no longer exists
    pub missing_essays: Vec<Uuid>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunResults {
    pub run: CalibrationRun,
    pub results: Vec<CalibrationResult>,
    pub rater_results: Vec<RaterResult>,
}

pub struct CalibrationManager {
    db: SqlitePool,
    estimator: Arc<dyn Estimator>,
    estimate_timeout: Duration,
    /// Serializes activation within this process
    activation_lock: Mutex<()>,
}

impl CalibrationManager {
    pub fn new(db: SqlitePool, estimator: Arc<dyn Estimator>, estimate_timeout: Duration) -> Self {
        Self {
            db,
            estimator,
            estimate_timeout,
            activation_lock: Mutex::new(()),
        }
    }

    /// Calibrate from every expert score in the store
    pub async fn run_calibration(
        &self,
        request: &RunRequest,
        cancel: CancellationToken,
    ) -> Result<CalibrationRun> {
        let scores = expert_scores::list_all_scores(&self.db).await?;
        self.run_with_scores(request, &scores, cancel).await
    }

    /// Calibrate from an explicit score set
    ///
    /// Validation and the readiness gate run before anything is written.
    pub async fn run_with_scores(
        &self,
        request: &RunRequest,
        scores: &[ExpertScore],
        cancel: CancellationToken,
    ) -> Result<CalibrationRun> {
        if request.name.trim().is_empty() {
            return Err(CalibrationError::Validation(
                "Calibration run name is required".to_string(),
            ));
        }
        if scores.is_empty() {
            return Err(CalibrationError::Validation(
                "No expert scores to calibrate; collect expert scores first".to_string(),
            ));
        }
        if let Some(bad) = scores.iter().find(|s| !(1..=3).contains(&s.score)) {
            return Err(CalibrationError::Validation(format!(
                "Score {} for essay {} is outside 1-3",
                bad.score, bad.essay_id
            )));
        }

        let report = readiness::load_readiness(&self.db).await?;
        if !report.is_ready() {
            if !request.override_not_ready {
                return Err(CalibrationError::NotReady(report.message));
            }
            tracing::warn!(
                reason = %report.message,
                "Calibration readiness not met; running on caller override"
            );
        }

        let essay_ids: BTreeSet<Uuid> = scores.iter().map(|s| s.essay_id).collect();
        let rubric_ids: BTreeSet<Uuid> = scores.iter().map(|s| s.rubric_id).collect();
        let expert_count = scores
            .iter()
            .map(|s| s.expert_id)
            .collect::<BTreeSet<_>>()
            .len() as i64;

        let run = calibration_runs::create_pending_run(
            &self.db,
            &NewRun {
                name: request.name.trim().to_string(),
                description: request.description.clone(),
                essay_ids: essay_ids.into_iter().collect(),
                rubric_ids: rubric_ids.into_iter().collect(),
                total_observations: scores.len() as i64,
                expert_count,
            },
        )
        .await?;

        tracing::info!(
            run_id = %run.id,
            version_id = %run.version_id,
            observations = scores.len(),
            "Calibration run created (pending)"
        );

        let observations: Vec<Observation> = scores.iter().map(Observation::from).collect();

        let response = match self.call_estimator(&observations, &cancel).await {
            Ok(response) => response,
            Err(err) => {
                let message = err.to_string();
                self.mark_failed(run.id, &message).await;
                return Err(CalibrationError::Dependency(message));
            }
        };

        if !response.success {
            let message = response
                .error
                .clone()
                .unwrap_or_else(|| "Estimation service reported failure".to_string());
            self.mark_failed(run.id, &message).await;
            return Err(CalibrationError::Dependency(message));
        }

        let (results, rater_results) = match convert_parameters(&response) {
            Ok(converted) => converted,
            Err(message) => {
                self.mark_failed(run.id, &message).await;
                return Err(CalibrationError::Dependency(message));
            }
        };

        let summary = RunSummary {
            converged: response.converged,
            method: response.method.clone(),
            separation_reliability: response.separation_reliability,
            total_observations: scores.len() as i64,
            expert_count: response.summary.total_experts.or(Some(expert_count)),
        };

        if let Err(err) =
            calibration_runs::complete_run(&self.db, run.id, &summary, &results, &rater_results)
                .await
        {
            self.mark_failed(run.id, &err.to_string()).await;
            return Err(err.into());
        }

        tracing::info!(
            run_id = %run.id,
            version_id = %run.version_id,
            converged = response.converged,
            essays = results.len(),
            raters = rater_results.len(),
            "Calibration run completed"
        );

        calibration_runs::get_run(&self.db, run.id)
            .await?
            .ok_or_else(|| CalibrationError::NotFound(format!("Calibration run {}", run.id)))
    }

    async fn call_estimator(
        &self,
        observations: &[Observation],
        cancel: &CancellationToken,
    ) -> std::result::Result<EstimationResponse, EstimationError> {
        let call = tokio::time::timeout(self.estimate_timeout, self.estimator.estimate(observations));

        tokio::select! {
            _ = cancel.cancelled() => Err(EstimationError::Cancelled),
            outcome = call => match outcome {
                Ok(result) => result,
                Err(_) => Err(EstimationError::Timeout(self.estimate_timeout.as_secs())),
            },
        }
    }

    async fn mark_failed(&self, run_id: Uuid, message: &str) {
        tracing::error!(run_id = %run_id, error = %message, "Calibration run failed");

        if let Err(err) = calibration_runs::fail_run(&self.db, run_id, message).await {
            // Startup recovery fails it later if this write is lost
            tracing::error!(run_id = %run_id, error = %err, "Could not mark run failed");
        }
    }

    /// Make `run_id` the single active version and sync its difficulties onto essays
    ///
    /// Re-running with the same run converges to the same final state, so
    /// an interrupted activation is recovered by calling this again.
    pub async fn activate_version(&self, run_id: Uuid) -> Result<ActivationReport> {
        let _guard = self.activation_lock.lock().await;

        let run = calibration_runs::get_run(&self.db, run_id)
            .await?
            .ok_or_else(|| CalibrationError::NotFound(format!("Calibration run {}", run_id)))?;

        if run.status != RunStatus::Completed {
            return Err(CalibrationError::Validation(format!(
                "Only completed runs can be activated (run {} is {})",
                run_id, run.status
            )));
        }

        calibration_runs::set_active_version(&self.db, run_id).await?;
        tracing::info!(run_id = %run_id, version_id = %run.version_id, "Active calibration version set");

        let results = calibration_runs::list_results(&self.db, run_id).await?;
        let max_wait_ms = settings::get_max_lock_wait_ms(&self.db).await?;
        let synced_at = Utc::now();

        let mut essays_updated = 0;
        let mut missing_essays = Vec::new();

        for result in &results {
            let applied = retry_on_lock("apply_calibration", max_wait_ms, || {
                essays::apply_calibration(
                    &self.db,
                    result.essay_id,
                    run_id,
                    result.difficulty_logit,
                    result.difficulty_se,
                    synced_at,
                )
            })
            .await?;

            if applied {
                essays_updated += 1;
            } else {
                missing_essays.push(result.essay_id);
            }
        }

        match self.active_version().await? {
            Some(active) if active.id == run_id => {}
            other => {
                return Err(CalibrationError::InvariantViolation(format!(
                    "Expected run {} to be the active version after activation, found {:?}",
                    run_id,
                    other.map(|r| r.id)
                )));
            }
        }

        if !missing_essays.is_empty() {
            tracing::warn!(
                run_id = %run_id,
                missing = missing_essays.len(),
                "Calibration results reference essays that no longer exist"
            );
        }

        tracing::info!(
            run_id = %run_id,
            essays_updated,
            "Calibration version activated"
        );

        Ok(ActivationReport {
            run_id,
            version_id: run.version_id,
            essays_updated,
            missing_essays,
        })
    }

    /// The single active run, if any
    pub async fn active_version(&self) -> Result<Option<CalibrationRun>> {
        let mut active = calibration_runs::list_active_runs(&self.db).await?;

        if active.len() > 1 {
            let ids: Vec<String> = active.iter().map(|r| r.id.to_string()).collect();
            tracing::error!(runs = %ids.join(","), "More than one active calibration version");
            return Err(CalibrationError::InvariantViolation(format!(
                "{} runs are flagged active: {}",
                active.len(),
                ids.join(", ")
            )));
        }

        Ok(active.pop())
    }

    /// Essays whose cached difficulty was not synced from the active run
    pub async fn stale_essays(&self) -> Result<Vec<Uuid>> {
        match self.active_version().await? {
            Some(run) => Ok(essays::find_stale_calibrations(&self.db, run.id).await?),
            None => Ok(Vec::new()),
        }
    }

    /// Fail runs a previous process left pending or running
    pub async fn recover_interrupted_runs(&self) -> Result<u64> {
        let failed = calibration_runs::fail_interrupted_runs(&self.db).await?;
        if failed > 0 {
            tracing::warn!(runs = failed, "Marked interrupted calibration runs as failed");
        }
        Ok(failed)
    }

    pub async fn list_runs(&self) -> Result<Vec<CalibrationRun>> {
        Ok(calibration_runs::list_runs(&self.db).await?)
    }

    pub async fn run_results(&self, run_id: Uuid) -> Result<RunResults> {
        let run = calibration_runs::get_run(&self.db, run_id)
            .await?
            .ok_or_else(|| CalibrationError::NotFound(format!("Calibration run {}", run_id)))?;

        Ok(RunResults {
            run,
            results: calibration_runs::list_results(&self.db, run_id).await?,
            rater_results: calibration_runs::list_rater_results(&self.db, run_id).await?,
        })
    }
}

/// Map estimator parameters onto result rows
///
/// An essay id that is not a uuid fails the whole run.
fn convert_parameters(
    response: &EstimationResponse,
) -> std::result::Result<(Vec<NewResult>, Vec<NewRaterResult>), String> {
    let results = response
        .essay_parameters
        .iter()
        .map(|p| {
            let essay_id = Uuid::parse_str(&p.essay_id).map_err(|e| {
                format!("Estimator returned invalid essay id '{}': {}", p.essay_id, e)
            })?;
            Ok(NewResult {
                essay_id,
                difficulty_logit: p.difficulty_logit,
                difficulty_se: p.difficulty_se,
                difficulty_ci_lower: p.difficulty_ci_lower,
                difficulty_ci_upper: p.difficulty_ci_upper,
                infit: p.infit,
                outfit: p.outfit,
                mean_score: p.mean_score,
                sd_score: p.sd_score,
                expert_count: p.expert_count,
            })
        })
        .collect::<std::result::Result<Vec<_>, String>>()?;

    let raters = response
        .rater_parameters
        .iter()
        .map(|p| NewRaterResult {
            rater_id: p.rater_id.clone(),
            severity: p.severity,
            severity_se: p.severity_se,
            infit: p.infit,
            outfit: p.outfit,
            mean_score: p.mean_score,
            feedback: p.feedback.clone(),
        })
        .collect();

    Ok((results, raters))
}
