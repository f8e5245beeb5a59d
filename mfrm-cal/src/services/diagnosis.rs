//! Teacher diagnosis level
//!
//! The level implied by a rated-essay count is a pure function. The
//! persisted level is the best level ever reached, so it never moves back
//! if the count is later corrected downwards.

use mfrm_common::db::{DiagnosisLevel, Teacher};
use serde::Serialize;
use sqlx::SqlitePool;
use uuid::Uuid;

use super::{CalibrationError, Result};
use crate::db::{rubrics, teachers};

pub const PRELIMINARY_THRESHOLD: u32 = 6;
pub const OFFICIAL_THRESHOLD: u32 = 9;
pub const ADVANCED_THRESHOLD: u32 = 18;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NextLevel {
    Preliminary,
    Official,
    Advanced,
    Complete,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiagnosisProgress {
    pub teacher_id: Uuid,
    pub teacher_name: String,
    pub essays_rated_count: u32,
    pub current_level: DiagnosisLevel,
    pub next_level: NextLevel,
    pub essays_needed_for_next: u32,
    pub observations_count: u64,
    pub estimated_se: f64,
}

pub fn level_for_count(essays_rated: u32) -> DiagnosisLevel {
    if essays_rated >= ADVANCED_THRESHOLD {
        DiagnosisLevel::Advanced
    } else if essays_rated >= OFFICIAL_THRESHOLD {
        DiagnosisLevel::Official
    } else if essays_rated >= PRELIMINARY_THRESHOLD {
        DiagnosisLevel::Preliminary
    } else {
        DiagnosisLevel::None
    }
}

/// Stored level combined with the count: the higher of the two
pub fn effective_level(stored: DiagnosisLevel, essays_rated: u32) -> DiagnosisLevel {
    stored.max(level_for_count(essays_rated))
}

/// Rough standard error of a severity estimate at this count
pub fn estimated_se(essays_rated: u32) -> f64 {
    if essays_rated < PRELIMINARY_THRESHOLD {
        0.5
    } else if essays_rated < OFFICIAL_THRESHOLD {
        0.4
    } else if essays_rated < ADVANCED_THRESHOLD {
        0.32
    } else {
        0.25
    }
}

/// Next level and how many more essays it takes, from the current level
pub fn next_step(current: DiagnosisLevel, essays_rated: u32) -> (NextLevel, u32) {
    match current {
        DiagnosisLevel::None => (
            NextLevel::Preliminary,
            PRELIMINARY_THRESHOLD.saturating_sub(essays_rated),
        ),
        DiagnosisLevel::Preliminary => (
            NextLevel::Official,
            OFFICIAL_THRESHOLD.saturating_sub(essays_rated),
        ),
        DiagnosisLevel::Official => (
            NextLevel::Advanced,
            ADVANCED_THRESHOLD.saturating_sub(essays_rated),
        ),
        DiagnosisLevel::Advanced => (NextLevel::Complete, 0),
    }
}

pub fn compute_progress(teacher: &Teacher, rubric_count: u32) -> DiagnosisProgress {
    let count = teacher.essays_rated_count;
    let current = effective_level(teacher.diagnosis_level, count);
    let (next_level, needed) = next_step(current, count);

    DiagnosisProgress {
        teacher_id: teacher.id,
        teacher_name: teacher.name.clone(),
        essays_rated_count: count,
        current_level: current,
        next_level,
        essays_needed_for_next: needed,
        observations_count: u64::from(count) * u64::from(rubric_count),
        estimated_se: estimated_se(count),
    }
}

pub async fn load_progress(pool: &SqlitePool, teacher_id: Uuid) -> Result<DiagnosisProgress> {
    let teacher = teachers::get_teacher(pool, teacher_id)
        .await?
        .ok_or_else(|| CalibrationError::NotFound(format!("Teacher {}", teacher_id)))?;
    let rubric_count = rubrics::count_active_rubrics(pool).await?;

    Ok(compute_progress(&teacher, rubric_count.max(0) as u32))
}

/// Record one more rated essay for a teacher
pub async fn record_essay_rated(pool: &SqlitePool, teacher_id: Uuid) -> Result<Teacher> {
    let teacher = teachers::record_essay_rated(pool, teacher_id, level_for_count).await?;

    tracing::debug!(
        teacher_id = %teacher.id,
        essays_rated = teacher.essays_rated_count,
        level = %teacher.diagnosis_level,
        "Teacher essay count recorded"
    );
    Ok(teacher)
}
