//! Expert scoring progress and per-cell score distributions

use std::collections::{BTreeMap, HashSet};

use mfrm_common::db::ExpertScore;
use serde::Serialize;
use sqlx::SqlitePool;
use uuid::Uuid;

use super::{CalibrationError, Result};
use crate::db::{essays, expert_scores, experts, rubrics};

/// `round(numerator / denominator × 100)`, 0 when the denominator is 0
pub fn percentage(numerator: i64, denominator: i64) -> u32 {
    if denominator <= 0 || numerator <= 0 {
        return 0;
    }
    (numerator as f64 / denominator as f64 * 100.0).round() as u32
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExpertProgress {
    pub expert_id: Uuid,
    pub expert_name: Option<String>,
    pub essays_scored: usize,
    pub total_scores: usize,
    pub expected_scores: i64,
    pub completion_percentage: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PanelProgress {
    pub target_essays: i64,
    pub rubrics_per_essay: i64,
    pub experts: Vec<ExpertProgress>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EssayCompletion {
    pub completed: i64,
    pub total: i64,
    pub percentage: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoreDistribution {
    /// Count per score category; every category is present
    pub counts: BTreeMap<u8, usize>,
    pub total_scores: usize,
    pub mean: Option<f64>,
    pub sd: Option<f64>,
    pub mode: Option<u8>,
    /// Share of scores equal to the mode
    pub agreement_rate: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConsensusBoundary {
    #[serde(rename = "1-2")]
    OneTwo,
    #[serde(rename = "2-3")]
    TwoThree,
    #[serde(rename = "mixed")]
    Mixed,
}

/// Consensus value suggested from a cell's expert scores
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ConsensusProposal {
    pub consensus_score: u8,
    pub boundary: Option<ConsensusBoundary>,
    pub agreement_rate: f64,
    pub expert_panel_size: usize,
}

/// Progress of one expert from that expert's score rows
pub fn compute_expert_progress(
    expert_id: Uuid,
    scores: &[ExpertScore],
    target_essays: i64,
    rubrics_per_essay: i64,
) -> ExpertProgress {
    let own: Vec<&ExpertScore> = scores.iter().filter(|s| s.expert_id == expert_id).collect();
    let essays_scored = own.iter().map(|s| s.essay_id).collect::<HashSet<_>>().len();
    let expected_scores = target_essays * rubrics_per_essay;

    ExpertProgress {
        expert_id,
        expert_name: None,
        essays_scored,
        total_scores: own.len(),
        expected_scores,
        completion_percentage: percentage(own.len() as i64, expected_scores),
    }
}

pub fn compute_essay_completion(completed: i64, rubric_count: i64) -> EssayCompletion {
    EssayCompletion {
        completed,
        total: rubric_count,
        percentage: percentage(completed, rubric_count),
    }
}

/// Counts, mean, population SD and mode (ties to the lowest score)
pub fn compute_distribution(scores: &[u8]) -> ScoreDistribution {
    let mut counts: BTreeMap<u8, usize> = (1..=3).map(|score| (score, 0)).collect();
    for score in scores {
        *counts.entry(*score).or_insert(0) += 1;
    }

    let total = scores.len();
    if total == 0 {
        return ScoreDistribution {
            counts,
            total_scores: 0,
            mean: None,
            sd: None,
            mode: None,
            agreement_rate: None,
        };
    }

    let n = total as f64;
    let mean = scores.iter().map(|s| f64::from(*s)).sum::<f64>() / n;
    let variance = scores
        .iter()
        .map(|s| (f64::from(*s) - mean).powi(2))
        .sum::<f64>()
        / n;

    // BTreeMap iterates ascending, so the first maximum is the lowest score
    let (mode, mode_count) = counts
        .iter()
        .fold((0u8, 0usize), |best, (score, count)| {
            if *count > best.1 {
                (*score, *count)
            } else {
                best
            }
        });

    ScoreDistribution {
        counts,
        total_scores: total,
        mean: Some(mean),
        sd: Some(variance.sqrt()),
        mode: Some(mode),
        agreement_rate: Some(mode_count as f64 / n),
    }
}

/// Propose a consensus score and boundary tag for a cell
///
/// The proposal is the mode. Only one category present means no boundary;
/// adjacent categories name their edge; 1 and 3 together are `mixed`.
pub fn derive_consensus(distribution: &ScoreDistribution) -> Option<ConsensusProposal> {
    let mode = distribution.mode?;
    let present = |score: u8| distribution.counts.get(&score).copied().unwrap_or(0) > 0;

    let boundary = match (present(1), present(2), present(3)) {
        (true, _, true) => Some(ConsensusBoundary::Mixed),
        (true, true, false) => Some(ConsensusBoundary::OneTwo),
        (false, true, true) => Some(ConsensusBoundary::TwoThree),
        _ => None,
    };

    Some(ConsensusProposal {
        consensus_score: mode,
        boundary,
        agreement_rate: distribution.agreement_rate.unwrap_or(0.0),
        expert_panel_size: distribution.total_scores,
    })
}

async fn target_counts(pool: &SqlitePool) -> Result<(i64, i64)> {
    let target_essays = essays::count_calibration_or_anchor(pool).await?;
    let rubrics_per_essay = rubrics::count_active_rubrics(pool).await?;
    Ok((target_essays, rubrics_per_essay))
}

pub async fn load_expert_progress(pool: &SqlitePool, expert_id: Uuid) -> Result<ExpertProgress> {
    let expert = experts::get_expert(pool, expert_id)
        .await?
        .ok_or_else(|| CalibrationError::NotFound(format!("Expert {}", expert_id)))?;

    let (target_essays, rubrics_per_essay) = target_counts(pool).await?;
    let scores = expert_scores::list_scores_by_expert(pool, expert_id).await?;

    let mut progress = compute_expert_progress(expert_id, &scores, target_essays, rubrics_per_essay);
    progress.expert_name = Some(expert.name);
    Ok(progress)
}

/// Progress of every active expert
pub async fn load_panel_progress(pool: &SqlitePool) -> Result<PanelProgress> {
    let (target_essays, rubrics_per_essay) = target_counts(pool).await?;
    let panel = experts::list_active_experts(pool).await?;
    let scores = expert_scores::list_all_scores(pool).await?;

    let experts = panel
        .into_iter()
        .map(|expert| {
            let mut progress =
                compute_expert_progress(expert.id, &scores, target_essays, rubrics_per_essay);
            progress.expert_name = Some(expert.name);
            progress
        })
        .collect();

    Ok(PanelProgress {
        target_essays,
        rubrics_per_essay,
        experts,
    })
}

pub async fn load_essay_completion(
    pool: &SqlitePool,
    essay_id: Uuid,
    expert_id: Uuid,
) -> Result<EssayCompletion> {
    let completed = expert_scores::count_expert_essay_scores(pool, expert_id, essay_id).await?;
    let rubric_count = rubrics::count_active_rubrics(pool).await?;

    Ok(compute_essay_completion(completed, rubric_count))
}

pub async fn load_distribution(
    pool: &SqlitePool,
    essay_id: Uuid,
    rubric_id: Uuid,
) -> Result<ScoreDistribution> {
    let scores: Vec<u8> = expert_scores::list_scores_for_cell(pool, essay_id, rubric_id)
        .await?
        .into_iter()
        .map(|s| s.score)
        .collect();

    Ok(compute_distribution(&scores))
}
