//! Calibration readiness checklist
//!
//! Advisory only: a `not_ready` report blocks a run unless the caller
//! explicitly overrides it.

use serde::Serialize;
use sqlx::SqlitePool;

use super::Result;
use crate::db::{essays, expert_scores, experts, rubrics};

pub const MIN_EXPERTS: i64 = 5;
pub const MIN_ESSAYS: i64 = 20;
pub const MIN_SCORE_COVERAGE: f64 = 0.8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadinessStatus {
    Ready,
    NotReady,
}

/// Store counts the checklist is computed from
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReadinessInputs {
    pub active_experts: i64,
    /// Active essays flagged calibration or anchor
    pub calibration_essays: i64,
    pub active_rubrics: i64,
    pub total_scores: i64,
    pub anchor_essays: i64,
    pub essays_with_scores: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ReadinessCheck {
    pub current: i64,
    pub required: i64,
    pub passed: bool,
}

impl ReadinessCheck {
    fn at_least(current: i64, required: i64) -> Self {
        Self {
            current,
            required,
            passed: current >= required,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Checklist {
    pub experts: ReadinessCheck,
    pub essays: ReadinessCheck,
    pub scores: ReadinessCheck,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReadinessReport {
    pub status: ReadinessStatus,
    /// Names the first unmet requirement (experts, essays, then scores)
    pub message: String,
    pub checklist: Checklist,
    pub expected_scores: i64,
    pub active_experts: i64,
    pub calibration_essays: i64,
    pub anchor_essays: i64,
    pub total_expert_scores: i64,
    pub essays_with_scores: i64,
}

impl ReadinessReport {
    pub fn is_ready(&self) -> bool {
        self.status == ReadinessStatus::Ready
    }
}

/// Minimum score count for a given expected total
pub fn min_scores(expected_scores: i64) -> i64 {
    (expected_scores as f64 * MIN_SCORE_COVERAGE).floor() as i64
}

/// Evaluate the three checks independently and build the report
///
/// `expected_scores` uses the live active-rubric count with no default.
/// With zero active rubrics it is 0, so the scores check passes with no
/// scores at all and readiness rests on the expert and essay checks.
pub fn evaluate_readiness(inputs: &ReadinessInputs) -> ReadinessReport {
    let expected_scores = inputs.active_experts * inputs.calibration_essays * inputs.active_rubrics;

    let checklist = Checklist {
        experts: ReadinessCheck::at_least(inputs.active_experts, MIN_EXPERTS),
        essays: ReadinessCheck::at_least(inputs.calibration_essays, MIN_ESSAYS),
        scores: ReadinessCheck::at_least(inputs.total_scores, min_scores(expected_scores)),
    };

    let (status, message) = if !checklist.experts.passed {
        (
            ReadinessStatus::NotReady,
            format!(
                "Not enough active experts (current: {}, required: at least {})",
                checklist.experts.current, checklist.experts.required
            ),
        )
    } else if !checklist.essays.passed {
        (
            ReadinessStatus::NotReady,
            format!(
                "Not enough calibration essays (current: {}, required: at least {})",
                checklist.essays.current, checklist.essays.required
            ),
        )
    } else if !checklist.scores.passed {
        (
            ReadinessStatus::NotReady,
            format!(
                "Not enough expert scores (current: {}, required: at least {})",
                checklist.scores.current, checklist.scores.required
            ),
        )
    } else {
        (
            ReadinessStatus::Ready,
            "Ready for calibration: the expert MFRM analysis can be run".to_string(),
        )
    };

    ReadinessReport {
        status,
        message,
        checklist,
        expected_scores,
        active_experts: inputs.active_experts,
        calibration_essays: inputs.calibration_essays,
        anchor_essays: inputs.anchor_essays,
        total_expert_scores: inputs.total_scores,
        essays_with_scores: inputs.essays_with_scores,
    }
}

/// Read the current counts from the store
pub async fn load_readiness_inputs(pool: &SqlitePool) -> Result<ReadinessInputs> {
    Ok(ReadinessInputs {
        active_experts: experts::count_active_experts(pool).await?,
        calibration_essays: essays::count_calibration_or_anchor(pool).await?,
        active_rubrics: rubrics::count_active_rubrics(pool).await?,
        total_scores: expert_scores::count_scores(pool).await?,
        anchor_essays: essays::count_anchor(pool).await?,
        essays_with_scores: expert_scores::count_scored_essays(pool).await?,
    })
}

pub async fn load_readiness(pool: &SqlitePool) -> Result<ReadinessReport> {
    let inputs = load_readiness_inputs(pool).await?;
    Ok(evaluate_readiness(&inputs))
}
