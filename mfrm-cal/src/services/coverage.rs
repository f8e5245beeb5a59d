//! Boundary coverage matrix
//!
//! Per rubric, how many anchor essays carry a consensus judgment flagged
//! as sitting on the 1↔2 or 2↔3 category edge. Recomputed from scratch on
//! every call; the output depends only on the current score set.

use std::collections::{BTreeSet, HashMap, HashSet};

use mfrm_common::db::{ConsensusScore, Essay, Rubric};
use serde::Serialize;
use sqlx::SqlitePool;
use uuid::Uuid;

use super::progress::percentage;
use super::Result;
use crate::db::{consensus_scores, essays, rubrics};

/// Boundary cases per edge needed for a rubric to be complete
pub const MIN_BOUNDARY_CASES: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CoverageStatus {
    Complete,
    Partial,
    Insufficient,
}

impl CoverageStatus {
    /// Thresholds are inclusive: exactly two cases on an edge satisfies it
    pub fn classify(boundary_1_2: usize, boundary_2_3: usize) -> Self {
        if boundary_1_2 >= MIN_BOUNDARY_CASES && boundary_2_3 >= MIN_BOUNDARY_CASES {
            Self::Complete
        } else if boundary_1_2 >= 1 || boundary_2_3 >= 1 {
            Self::Partial
        } else {
            Self::Insufficient
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CoverageRow {
    pub rubric_id: Uuid,
    pub rubric_name: String,
    pub rubric_category: String,
    pub boundary_1_2_count: usize,
    pub boundary_2_3_count: usize,
    /// Anchor essays with any consensus score for this rubric
    pub total_essays: usize,
    pub status: CoverageStatus,
    pub needed_1_2: usize,
    pub needed_2_3: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CoverageSummary {
    pub total_rubrics: usize,
    pub complete: usize,
    pub partial: usize,
    pub insufficient: usize,
}

/// Consensus completion of one anchor essay across active rubrics
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnchorEssayCoverage {
    pub essay_id: Uuid,
    pub title: String,
    pub completed: usize,
    pub total: usize,
    pub percentage: u32,
    pub boundary_1_2_count: usize,
    pub boundary_2_3_count: usize,
}

#[derive(Default)]
struct Tally {
    essays: BTreeSet<Uuid>,
    boundary_1_2: BTreeSet<Uuid>,
    boundary_2_3: BTreeSet<Uuid>,
}

/// Build the coverage matrix
///
/// Consensus scores outside the anchor set are ignored. Rows come out in
/// rubric display order regardless of input order.
pub fn compute_coverage(
    rubrics: &[Rubric],
    consensus: &[ConsensusScore],
    anchor_essay_ids: &HashSet<Uuid>,
) -> Vec<CoverageRow> {
    let mut tallies: HashMap<Uuid, Tally> = HashMap::new();

    for score in consensus
        .iter()
        .filter(|s| anchor_essay_ids.contains(&s.essay_id))
    {
        let tally = tallies.entry(score.rubric_id).or_default();
        tally.essays.insert(score.essay_id);
        if score.is_boundary_1_2 {
            tally.boundary_1_2.insert(score.essay_id);
        }
        if score.is_boundary_2_3 {
            tally.boundary_2_3.insert(score.essay_id);
        }
    }

    let mut ordered: Vec<&Rubric> = rubrics.iter().collect();
    ordered.sort_by(|a, b| {
        a.display_order
            .cmp(&b.display_order)
            .then_with(|| a.name.cmp(&b.name))
            .then_with(|| a.id.cmp(&b.id))
    });
    ordered.dedup_by_key(|r| r.id);

    ordered
        .into_iter()
        .map(|rubric| {
            let (b12, b23, total) = tallies
                .get(&rubric.id)
                .map(|t| (t.boundary_1_2.len(), t.boundary_2_3.len(), t.essays.len()))
                .unwrap_or((0, 0, 0));

            CoverageRow {
                rubric_id: rubric.id,
                rubric_name: rubric.name.clone(),
                rubric_category: rubric.category.clone(),
                boundary_1_2_count: b12,
                boundary_2_3_count: b23,
                total_essays: total,
                status: CoverageStatus::classify(b12, b23),
                needed_1_2: MIN_BOUNDARY_CASES.saturating_sub(b12),
                needed_2_3: MIN_BOUNDARY_CASES.saturating_sub(b23),
            }
        })
        .collect()
}

pub fn summarize(rows: &[CoverageRow]) -> CoverageSummary {
    let complete = rows
        .iter()
        .filter(|r| r.status == CoverageStatus::Complete)
        .count();
    let partial = rows
        .iter()
        .filter(|r| r.status == CoverageStatus::Partial)
        .count();

    CoverageSummary {
        total_rubrics: rows.len(),
        complete,
        partial,
        insufficient: rows.len() - complete - partial,
    }
}

/// Per anchor essay: consensus scores recorded over active rubrics
pub fn anchor_essay_coverage(
    anchors: &[Essay],
    rubrics: &[Rubric],
    consensus: &[ConsensusScore],
) -> Vec<AnchorEssayCoverage> {
    let rubric_ids: HashSet<Uuid> = rubrics.iter().map(|r| r.id).collect();
    let total = rubric_ids.len();

    anchors
        .iter()
        .map(|essay| {
            let scores: Vec<&ConsensusScore> = consensus
                .iter()
                .filter(|s| s.essay_id == essay.id && rubric_ids.contains(&s.rubric_id))
                .collect();
            let completed = scores.len();

            AnchorEssayCoverage {
                essay_id: essay.id,
                title: essay.title.clone(),
                completed,
                total,
                percentage: percentage(completed as i64, total as i64),
                boundary_1_2_count: scores.iter().filter(|s| s.is_boundary_1_2).count(),
                boundary_2_3_count: scores.iter().filter(|s| s.is_boundary_2_3).count(),
            }
        })
        .collect()
}

/// Coverage over the current store contents
pub async fn load_coverage(pool: &SqlitePool) -> Result<Vec<CoverageRow>> {
    let rubrics = rubrics::list_active_rubrics(pool).await?;
    let consensus = consensus_scores::list_consensus_scores(pool).await?;
    let anchors: HashSet<Uuid> = essays::list_anchor_essays(pool)
        .await?
        .into_iter()
        .map(|e| e.id)
        .collect();

    Ok(compute_coverage(&rubrics, &consensus, &anchors))
}

pub async fn load_anchor_essay_coverage(pool: &SqlitePool) -> Result<Vec<AnchorEssayCoverage>> {
    let rubrics = rubrics::list_active_rubrics(pool).await?;
    let consensus = consensus_scores::list_consensus_scores(pool).await?;
    let anchors = essays::list_anchor_essays(pool).await?;

    Ok(anchor_essay_coverage(&anchors, &rubrics, &consensus))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn rubric(name: &str, order: i64) -> Rubric {
        Rubric {
            id: Uuid::new_v4(),
            name: name.to_string(),
            category: "content".to_string(),
            description: None,
            boundary_1_2_description: None,
            boundary_2_3_description: None,
            display_order: order,
            is_active: true,
        }
    }

    fn consensus(essay_id: Uuid, rubric_id: Uuid, b12: bool, b23: bool) -> ConsensusScore {
        ConsensusScore {
            id: Uuid::new_v4(),
            essay_id,
            rubric_id,
            consensus_score: 2,
            is_boundary_1_2: b12,
            is_boundary_2_3: b23,
            expert_panel_size: 5,
            agreement_rate: None,
            boundary_rationale: None,
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_classification_thresholds() {
        assert_eq!(CoverageStatus::classify(2, 2), CoverageStatus::Complete);
        assert_eq!(CoverageStatus::classify(5, 3), CoverageStatus::Complete);
        assert_eq!(CoverageStatus::classify(1, 0), CoverageStatus::Partial);
        assert_eq!(CoverageStatus::classify(0, 1), CoverageStatus::Partial);
        assert_eq!(CoverageStatus::classify(2, 1), CoverageStatus::Partial);
        assert_eq!(CoverageStatus::classify(0, 0), CoverageStatus::Insufficient);
    }

    #[test]
    fn test_rubric_without_scores_is_insufficient() {
        let r = rubric("Thesis", 1);
        let rows = compute_coverage(&[r.clone()], &[], &HashSet::new());

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].status, CoverageStatus::Insufficient);
        assert_eq!(rows[0].total_essays, 0);
        assert_eq!(rows[0].needed_1_2, 2);
        assert_eq!(rows[0].needed_2_3, 2);
    }

    #[test]
    fn test_non_anchor_scores_are_ignored() {
        let r = rubric("Thesis", 1);
        let anchor = Uuid::new_v4();
        let other = Uuid::new_v4();
        let scores = vec![
            consensus(anchor, r.id, true, false),
            consensus(other, r.id, true, true),
        ];
        let anchors: HashSet<Uuid> = [anchor].into_iter().collect();

        let rows = compute_coverage(&[r], &scores, &anchors);
        assert_eq!(rows[0].boundary_1_2_count, 1);
        assert_eq!(rows[0].boundary_2_3_count, 0);
        assert_eq!(rows[0].total_essays, 1);
        assert_eq!(rows[0].status, CoverageStatus::Partial);
    }

    #[test]
    fn test_scores_on_other_rubrics_do_not_leak() {
        let r1 = rubric("Thesis", 1);
        let r2 = rubric("Evidence", 2);
        let essay = Uuid::new_v4();
        let scores = vec![
            consensus(essay, r2.id, true, true),
            consensus(Uuid::new_v4(), r2.id, true, true),
        ];
        let anchors: HashSet<Uuid> = scores.iter().map(|s| s.essay_id).collect();

        let rows = compute_coverage(&[r1.clone(), r2.clone()], &scores, &anchors);
        let row1 = rows.iter().find(|r| r.rubric_id == r1.id).unwrap();
        let row2 = rows.iter().find(|r| r.rubric_id == r2.id).unwrap();

        assert_eq!(row1.boundary_1_2_count, 0);
        assert_eq!(row1.boundary_2_3_count, 0);
        assert_eq!(row1.status, CoverageStatus::Insufficient);
        assert_eq!(row2.status, CoverageStatus::Complete);
    }

    #[test]
    fn test_output_independent_of_input_order() {
        let r1 = rubric("Thesis", 1);
        let r2 = rubric("Evidence", 2);
        let essays: Vec<Uuid> = (0..4).map(|_| Uuid::new_v4()).collect();
        let mut scores = vec![
            consensus(essays[0], r1.id, true, false),
            consensus(essays[1], r1.id, true, true),
            consensus(essays[2], r2.id, false, true),
            consensus(essays[3], r1.id, false, true),
        ];
        let anchors: HashSet<Uuid> = essays.iter().copied().collect();

        let first = compute_coverage(&[r1.clone(), r2.clone()], &scores, &anchors);
        scores.reverse();
        let second = compute_coverage(&[r2, r1], &scores, &anchors);

        assert_eq!(first, second);
        assert_eq!(first[0].status, CoverageStatus::Complete);
    }

    #[test]
    fn test_summary_counts() {
        let r1 = rubric("A", 1);
        let r2 = rubric("B", 2);
        let r3 = rubric("C", 3);
        let essays: Vec<Uuid> = (0..2).map(|_| Uuid::new_v4()).collect();
        let scores = vec![
            consensus(essays[0], r1.id, true, true),
            consensus(essays[1], r1.id, true, true),
            consensus(essays[0], r2.id, true, false),
        ];
        let anchors: HashSet<Uuid> = essays.iter().copied().collect();

        let summary = summarize(&compute_coverage(&[r1, r2, r3], &scores, &anchors));
        assert_eq!(
            summary,
            CoverageSummary {
                total_rubrics: 3,
                complete: 1,
                partial: 1,
                insufficient: 1,
            }
        );
    }
}
