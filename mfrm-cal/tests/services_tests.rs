//! Readiness, coverage, progress and diagnosis over a seeded store

mod helpers;

use helpers::{score_cells, seed_panel, test_pool};
use mfrm_cal::db::consensus_scores::{self, ConsensusScoreInput};
use mfrm_cal::db::expert_scores::{self, ExpertScoreInput};
use mfrm_cal::db::{essays, experts, teachers};
use mfrm_cal::services::coverage::{self, CoverageStatus};
use mfrm_cal::services::diagnosis::{self, NextLevel};
use mfrm_cal::services::progress::{self, ConsensusBoundary};
use mfrm_cal::services::readiness::{self, ReadinessStatus};
use mfrm_cal::services::CalibrationError;
use mfrm_common::db::DiagnosisLevel;
use uuid::Uuid;

#[tokio::test]
async fn test_readiness_tracks_store_contents() {
    let pool = test_pool().await;
    let panel = seed_panel(&pool, 5, 20, 8).await;

    // 5 × 20 × 8 = 800 expected, 640 required
    score_cells(&pool, &panel, 639).await;
    let report = readiness::load_readiness(&pool).await.unwrap();
    assert_eq!(report.status, ReadinessStatus::NotReady);
    assert_eq!(report.expected_scores, 800);
    assert_eq!(report.checklist.scores.required, 640);
    assert!(report.checklist.experts.passed);
    assert!(report.checklist.essays.passed);
    assert!(!report.checklist.scores.passed);
    assert!(report.message.contains("expert scores"));

    score_cells(&pool, &panel, 640).await;
    let report = readiness::load_readiness(&pool).await.unwrap();
    assert!(report.is_ready());
    assert_eq!(report.total_expert_scores, 640);
    assert_eq!(report.anchor_essays, 10);
}

#[tokio::test]
async fn test_readiness_ignores_inactive_experts() {
    let pool = test_pool().await;
    let panel = seed_panel(&pool, 5, 20, 1).await;
    score_cells(&pool, &panel, usize::MAX).await;
    assert!(readiness::load_readiness(&pool).await.unwrap().is_ready());

    experts::deactivate_expert(&pool, panel.experts[0].id).await.unwrap();

    let report = readiness::load_readiness(&pool).await.unwrap();
    assert_eq!(report.active_experts, 4);
    assert!(!report.checklist.experts.passed);
    assert!(report.message.contains("experts"));
}

#[tokio::test]
async fn test_readiness_counts_anchor_only_essays() {
    let pool = test_pool().await;
    let panel = seed_panel(&pool, 5, 19, 1).await;
    let extra = essays::insert_essay(
        &pool,
        &essays::NewEssay {
            title: "Anchor only".to_string(),
            is_anchor: true,
            ..Default::default()
        },
    )
    .await
    .unwrap();
    assert!(!extra.is_calibration);

    score_cells(&pool, &panel, usize::MAX).await;

    let report = readiness::load_readiness(&pool).await.unwrap();
    assert_eq!(report.calibration_essays, 20);
    assert!(report.checklist.essays.passed);
}

async fn consensus(
    pool: &sqlx::SqlitePool,
    essay_id: Uuid,
    rubric_id: Uuid,
    is_boundary_1_2: bool,
    is_boundary_2_3: bool,
) {
    let mut input = ConsensusScoreInput::new(essay_id, rubric_id, 2);
    input.is_boundary_1_2 = is_boundary_1_2;
    input.is_boundary_2_3 = is_boundary_2_3;
    consensus_scores::upsert_consensus_score(pool, &input).await.unwrap();
}

#[tokio::test]
async fn test_coverage_from_consensus_scores() {
    let pool = test_pool().await;
    // Even-indexed essays are anchors: 0, 2, 4
    let panel = seed_panel(&pool, 0, 6, 3).await;
    let [r0, r1, r2] = [panel.rubrics[0].id, panel.rubrics[1].id, panel.rubrics[2].id];
    let anchor = |i: usize| panel.essays[i * 2].id;

    consensus(&pool, anchor(0), r0, true, false).await;
    consensus(&pool, anchor(1), r0, true, true).await;
    consensus(&pool, anchor(2), r0, false, true).await;

    consensus(&pool, anchor(0), r1, true, false).await;
    // Not an anchor essay: ignored
    consensus(&pool, panel.essays[1].id, r1, true, true).await;

    let rows = coverage::load_coverage(&pool).await.unwrap();
    assert_eq!(rows.len(), 3);

    assert_eq!(rows[0].rubric_id, r0);
    assert_eq!(rows[0].boundary_1_2_count, 2);
    assert_eq!(rows[0].boundary_2_3_count, 2);
    assert_eq!(rows[0].total_essays, 3);
    assert_eq!(rows[0].status, CoverageStatus::Complete);

    assert_eq!(rows[1].rubric_id, r1);
    assert_eq!(rows[1].boundary_1_2_count, 1);
    assert_eq!(rows[1].boundary_2_3_count, 0);
    assert_eq!(rows[1].status, CoverageStatus::Partial);
    assert_eq!(rows[1].needed_1_2, 1);
    assert_eq!(rows[1].needed_2_3, 2);

    assert_eq!(rows[2].rubric_id, r2);
    assert_eq!(rows[2].status, CoverageStatus::Insufficient);
    assert_eq!(rows[2].total_essays, 0);

    let summary = coverage::summarize(&rows);
    assert_eq!(summary.total_rubrics, 3);
    assert_eq!(summary.complete, 1);
    assert_eq!(summary.partial, 1);
    assert_eq!(summary.insufficient, 1);

    let per_essay = coverage::load_anchor_essay_coverage(&pool).await.unwrap();
    assert_eq!(per_essay.len(), 3);
    let first = per_essay.iter().find(|c| c.essay_id == anchor(0)).unwrap();
    assert_eq!(first.completed, 2);
    assert_eq!(first.total, 3);
    assert_eq!(first.percentage, 67);
    assert_eq!(first.boundary_1_2_count, 2);
}

#[tokio::test]
async fn test_expert_progress_and_completion() {
    let pool = test_pool().await;
    let panel = seed_panel(&pool, 2, 4, 2).await;
    let expert = panel.experts[0].id;

    // Three scores: both rubrics of essay 0 and one of essay 1
    let inputs = vec![
        ExpertScoreInput::new(expert, panel.essays[0].id, panel.rubrics[0].id, 1),
        ExpertScoreInput::new(expert, panel.essays[0].id, panel.rubrics[1].id, 2),
        ExpertScoreInput::new(expert, panel.essays[1].id, panel.rubrics[0].id, 3),
    ];
    expert_scores::upsert_expert_scores(&pool, &inputs).await.unwrap();

    let mine = progress::load_expert_progress(&pool, expert).await.unwrap();
    assert_eq!(mine.expert_name.as_deref(), Some("Expert 00"));
    assert_eq!(mine.essays_scored, 2);
    assert_eq!(mine.total_scores, 3);
    assert_eq!(mine.expected_scores, 8);
    assert_eq!(mine.completion_percentage, 38);

    let panel_progress = progress::load_panel_progress(&pool).await.unwrap();
    assert_eq!(panel_progress.target_essays, 4);
    assert_eq!(panel_progress.rubrics_per_essay, 2);
    assert_eq!(panel_progress.experts.len(), 2);
    let other = panel_progress
        .experts
        .iter()
        .find(|p| p.expert_id == panel.experts[1].id)
        .unwrap();
    assert_eq!(other.total_scores, 0);
    assert_eq!(other.completion_percentage, 0);

    let full = progress::load_essay_completion(&pool, panel.essays[0].id, expert)
        .await
        .unwrap();
    assert_eq!((full.completed, full.total, full.percentage), (2, 2, 100));
    let half = progress::load_essay_completion(&pool, panel.essays[1].id, expert)
        .await
        .unwrap();
    assert_eq!((half.completed, half.total, half.percentage), (1, 2, 50));

    let err = progress::load_expert_progress(&pool, Uuid::new_v4())
        .await
        .unwrap_err();
    assert!(matches!(err, CalibrationError::NotFound(_)));
}

#[tokio::test]
async fn test_cell_distribution_and_proposal() {
    let pool = test_pool().await;
    let panel = seed_panel(&pool, 5, 1, 1).await;
    let essay = panel.essays[0].id;
    let rubric = panel.rubrics[0].id;

    let inputs: Vec<ExpertScoreInput> = [2u8, 2, 3, 2, 3]
        .iter()
        .zip(&panel.experts)
        .map(|(score, expert)| ExpertScoreInput::new(expert.id, essay, rubric, *score))
        .collect();
    expert_scores::upsert_expert_scores(&pool, &inputs).await.unwrap();

    let distribution = progress::load_distribution(&pool, essay, rubric).await.unwrap();
    assert_eq!(distribution.total_scores, 5);
    assert_eq!(distribution.counts[&1], 0);
    assert_eq!(distribution.counts[&2], 3);
    assert_eq!(distribution.counts[&3], 2);
    assert_eq!(distribution.mode, Some(2));
    assert!((distribution.mean.unwrap() - 2.4).abs() < 1e-9);
    assert!((distribution.agreement_rate.unwrap() - 0.6).abs() < 1e-9);

    let proposal = progress::derive_consensus(&distribution).unwrap();
    assert_eq!(proposal.consensus_score, 2);
    assert_eq!(proposal.boundary, Some(ConsensusBoundary::TwoThree));
    assert_eq!(proposal.expert_panel_size, 5);

    let empty = progress::load_distribution(&pool, essay, Uuid::new_v4())
        .await
        .unwrap();
    assert_eq!(empty.total_scores, 0);
    assert!(progress::derive_consensus(&empty).is_none());
}

#[tokio::test]
async fn test_diagnosis_progresses_with_rated_essays() {
    let pool = test_pool().await;
    seed_panel(&pool, 0, 0, 8).await;
    let teacher = teachers::insert_teacher(&pool, "Mr. Okafor", Some("okafor@school.test"))
        .await
        .unwrap();

    let start = diagnosis::load_progress(&pool, teacher.id).await.unwrap();
    assert_eq!(start.current_level, DiagnosisLevel::None);
    assert_eq!(start.next_level, NextLevel::Preliminary);
    assert_eq!(start.essays_needed_for_next, 6);
    assert_eq!(start.observations_count, 0);

    for _ in 0..9 {
        diagnosis::record_essay_rated(&pool, teacher.id).await.unwrap();
    }

    let progress = diagnosis::load_progress(&pool, teacher.id).await.unwrap();
    assert_eq!(progress.essays_rated_count, 9);
    assert_eq!(progress.current_level, DiagnosisLevel::Official);
    assert_eq!(progress.next_level, NextLevel::Advanced);
    assert_eq!(progress.essays_needed_for_next, 9);
    assert_eq!(progress.observations_count, 72);
    assert!(progress.estimated_se < start.estimated_se);

    let err = diagnosis::load_progress(&pool, Uuid::new_v4()).await.unwrap_err();
    assert!(matches!(err, CalibrationError::NotFound(_)));
}
