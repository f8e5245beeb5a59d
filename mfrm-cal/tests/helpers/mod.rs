//! Shared fixtures for mfrm-cal integration tests
#![allow(dead_code)]

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use mfrm_cal::db::essays::{self, NewEssay};
use mfrm_cal::db::expert_scores::{self, ExpertScoreInput};
use mfrm_cal::db::experts::{self, NewExpert};
use mfrm_cal::db::rubrics::{self, NewRubric};
use mfrm_cal::services::estimation_client::{
    EssayParameter, EstimationResponse, EstimationSummary, Observation, RaterParameter,
};
use mfrm_cal::services::{CalibrationManager, EstimationError, Estimator};
use mfrm_common::db::{Essay, ExpertRater, Rubric};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;

/// In-memory database with the production schema
pub async fn test_pool() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    mfrm_common::db::init::create_schema(&pool).await.unwrap();
    pool
}

pub struct Panel {
    pub experts: Vec<ExpertRater>,
    pub essays: Vec<Essay>,
    pub rubrics: Vec<Rubric>,
}

/// Active experts, calibration essays (every other one also an anchor) and rubrics
pub async fn seed_panel(pool: &SqlitePool, experts: usize, essays: usize, rubrics: usize) -> Panel {
    let mut panel = Panel {
        experts: Vec::new(),
        essays: Vec::new(),
        rubrics: Vec::new(),
    };

    for i in 0..experts {
        panel.experts.push(
            experts::insert_expert(
                pool,
                &NewExpert {
                    name: format!("Expert {:02}", i),
                    ..Default::default()
                },
            )
            .await
            .unwrap(),
        );
    }

    for i in 0..essays {
        panel.essays.push(
            essays::insert_essay(
                pool,
                &NewEssay {
                    title: format!("Essay {:02}", i),
                    content: "text".to_string(),
                    is_calibration: true,
                    is_anchor: i % 2 == 0,
                    ..Default::default()
                },
            )
            .await
            .unwrap(),
        );
    }

    for i in 0..rubrics {
        panel.rubrics.push(
            rubrics::insert_rubric(
                pool,
                &NewRubric {
                    name: format!("Rubric {}", i),
                    category: "content".to_string(),
                    display_order: i as i64,
                    ..Default::default()
                },
            )
            .await
            .unwrap(),
        );
    }

    panel
}

/// Score every (expert, essay, rubric) cell, stopping after `limit` rows
pub async fn score_cells(pool: &SqlitePool, panel: &Panel, limit: usize) -> usize {
    let mut inputs = Vec::new();
    'outer: for (e, expert) in panel.experts.iter().enumerate() {
        for (s, essay) in panel.essays.iter().enumerate() {
            for (r, rubric) in panel.rubrics.iter().enumerate() {
                if inputs.len() == limit {
                    break 'outer;
                }
                let score = ((e + s + r) % 3 + 1) as u8;
                inputs.push(ExpertScoreInput::new(expert.id, essay.id, rubric.id, score));
            }
        }
    }
    expert_scores::upsert_expert_scores(pool, &inputs).await.unwrap()
}

/// Ready panel: 5 experts, 20 essays, 2 rubrics, fully scored
pub async fn seed_ready_panel(pool: &SqlitePool) -> Panel {
    let panel = seed_panel(pool, 5, 20, 2).await;
    score_cells(pool, &panel, usize::MAX).await;
    panel
}

/// Fits every essay in the request; difficulty derives from the mean score
pub struct ScriptedEstimator {
    pub shift: f64,
    pub calls: AtomicUsize,
}

impl ScriptedEstimator {
    pub fn new(shift: f64) -> Arc<Self> {
        Arc::new(Self {
            shift,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

/// Difficulty a `ScriptedEstimator` with `shift` assigns to an essay
pub fn scripted_difficulty(shift: f64, mean_score: f64) -> f64 {
    2.0 - mean_score + shift
}

#[async_trait]
impl Estimator for ScriptedEstimator {
    async fn estimate(
        &self,
        observations: &[Observation],
    ) -> Result<EstimationResponse, EstimationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let items: BTreeSet<&str> = observations.iter().map(|o| o.item_id.as_str()).collect();
        let raters: BTreeSet<&str> = observations.iter().map(|o| o.rater_id.as_str()).collect();

        let essay_parameters = items
            .iter()
            .map(|item| {
                let scores: Vec<f64> = observations
                    .iter()
                    .filter(|o| o.item_id == *item)
                    .map(|o| f64::from(o.score))
                    .collect();
                let mean = scores.iter().sum::<f64>() / scores.len() as f64;
                EssayParameter {
                    essay_id: item.to_string(),
                    difficulty_logit: scripted_difficulty(self.shift, mean),
                    difficulty_se: Some(0.3),
                    mean_score: Some(mean),
                    expert_count: Some(raters.len() as i64),
                    ..Default::default()
                }
            })
            .collect();

        let rater_parameters = raters
            .iter()
            .map(|rater| RaterParameter {
                rater_id: rater.to_string(),
                severity: 0.1,
                ..Default::default()
            })
            .collect();

        Ok(EstimationResponse {
            success: true,
            converged: true,
            method: "JMLE".to_string(),
            separation_reliability: Some(0.91),
            summary: EstimationSummary {
                total_experts: Some(raters.len() as i64),
                total_essays: Some(items.len() as i64),
                total_observations: Some(observations.len() as i64),
                ..Default::default()
            },
            essay_parameters,
            rater_parameters,
            error: None,
        })
    }
}

/// Always rejects the fit
pub struct FailingEstimator {
    pub message: String,
}

#[async_trait]
impl Estimator for FailingEstimator {
    async fn estimate(&self, _: &[Observation]) -> Result<EstimationResponse, EstimationError> {
        Err(EstimationError::Rejected(self.message.clone()))
    }
}

/// Answers HTTP-style with `success: false` instead of an error
pub struct UnsuccessfulEstimator {
    pub error: Option<String>,
}

#[async_trait]
impl Estimator for UnsuccessfulEstimator {
    async fn estimate(&self, _: &[Observation]) -> Result<EstimationResponse, EstimationError> {
        Ok(EstimationResponse {
            success: false,
            error: self.error.clone(),
            ..Default::default()
        })
    }
}

/// Sleeps before answering like `ScriptedEstimator`
pub struct SlowEstimator {
    pub delay: Duration,
    pub inner: Arc<ScriptedEstimator>,
}

#[async_trait]
impl Estimator for SlowEstimator {
    async fn estimate(
        &self,
        observations: &[Observation],
    ) -> Result<EstimationResponse, EstimationError> {
        tokio::time::sleep(self.delay).await;
        self.inner.estimate(observations).await
    }
}

pub fn manager_with(pool: &SqlitePool, estimator: Arc<dyn Estimator>) -> CalibrationManager {
    CalibrationManager::new(pool.clone(), estimator, Duration::from_secs(30))
}
