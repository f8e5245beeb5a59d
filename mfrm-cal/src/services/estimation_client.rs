//! Estimation Service client
//!
//! The MFRM fit itself runs in an external service. One blocking
//! request/response call per calibration run; the fit may iterate for
//! minutes, so the timeout is long.

use std::time::Duration;

use async_trait::async_trait;
use mfrm_common::db::ExpertScore;
use serde::{Deserialize, Serialize};
use thiserror::Error;

const USER_AGENT: &str = concat!("mfrm-cal/", env!("CARGO_PKG_VERSION"));
const RUN_EXPERT_PATH: &str = "/api/calibration/run-expert";

#[derive(Debug, Error)]
pub enum EstimationError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Estimation service timed out after {0} s")]
    Timeout(u64),

    #[error("Estimation cancelled")]
    Cancelled,

    #[error("Estimation service returned HTTP {0}: {1}")]
    Api(u16, String),

    #[error("Unreadable estimation response: {0}")]
    Parse(String),

    #[error("{0}")]
    Rejected(String),
}

/// One judgment as the estimator sees it: rater × item × facet
///
/// On the wire the facets keep the names the `run-expert` endpoint
/// reads: expert, essay and rubric.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Observation {
    #[serde(rename = "expert_id")]
    pub rater_id: String,
    #[serde(rename = "essay_id")]
    pub item_id: String,
    #[serde(rename = "rubric_id")]
    pub facet_id: String,
    pub score: u8,
}

impl From<&ExpertScore> for Observation {
    fn from(score: &ExpertScore) -> Self {
        Self {
            rater_id: score.expert_id.to_string(),
            item_id: score.essay_id.to_string(),
            facet_id: score.rubric_id.to_string(),
            score: score.score,
        }
    }
}

/// Body of `POST /api/calibration/run-expert`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EstimationRequest {
    #[serde(rename = "expert_scores")]
    pub observations: Vec<Observation>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EstimationSummary {
    pub total_experts: Option<i64>,
    pub total_essays: Option<i64>,
    pub total_observations: Option<i64>,
    pub mean_difficulty: Option<f64>,
    pub sd_difficulty: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EssayParameter {
    pub essay_id: String,
    pub difficulty_logit: f64,
    pub difficulty_se: Option<f64>,
    pub difficulty_ci_lower: Option<f64>,
    pub difficulty_ci_upper: Option<f64>,
    pub infit: Option<f64>,
    pub outfit: Option<f64>,
    pub mean_score: Option<f64>,
    pub sd_score: Option<f64>,
    pub expert_count: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RaterParameter {
    #[serde(alias = "expert_id")]
    pub rater_id: String,
    pub severity: f64,
    pub severity_se: Option<f64>,
    pub infit: Option<f64>,
    pub outfit: Option<f64>,
    pub mean_score: Option<f64>,
    pub feedback: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EstimationResponse {
    pub success: bool,
    #[serde(default)]
    pub converged: bool,
    #[serde(default)]
    pub method: String,
    pub separation_reliability: Option<f64>,
    #[serde(default)]
    pub summary: EstimationSummary,
    #[serde(default)]
    pub essay_parameters: Vec<EssayParameter>,
    #[serde(default, alias = "expert_parameters")]
    pub rater_parameters: Vec<RaterParameter>,
    pub error: Option<String>,
}

/// The Estimation Service boundary
///
/// Implementations should return `Ok` only for a successful fit; the run
/// manager still treats `success: false` as a failed run.
#[async_trait]
pub trait Estimator: Send + Sync {
    async fn estimate(
        &self,
        observations: &[Observation],
    ) -> Result<EstimationResponse, EstimationError>;
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: Option<String>,
}

/// Estimator reached over HTTP
pub struct HttpEstimator {
    http_client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl HttpEstimator {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, EstimationError> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|e| EstimationError::Network(e.to_string()))?;

        Ok(Self {
            http_client,
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn map_send_error(&self, err: reqwest::Error) -> EstimationError {
        if err.is_timeout() {
            EstimationError::Timeout(self.timeout.as_secs())
        } else {
            EstimationError::Network(err.to_string())
        }
    }
}

#[async_trait]
impl Estimator for HttpEstimator {
    async fn estimate(
        &self,
        observations: &[Observation],
    ) -> Result<EstimationResponse, EstimationError> {
        let url = format!("{}{}", self.base_url, RUN_EXPERT_PATH);
        let request = EstimationRequest {
            observations: observations.to_vec(),
        };

        tracing::debug!(
            url = %url,
            observations = observations.len(),
            "Submitting observations to estimation service"
        );

        let response = self
            .http_client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        let status = response.status();
        let body = response.text().await.map_err(|e| self.map_send_error(e))?;

        if !status.is_success() {
            let message = serde_json::from_str::<ErrorBody>(&body)
                .ok()
                .and_then(|b| b.error)
                .unwrap_or(body);
            return Err(EstimationError::Api(status.as_u16(), message));
        }

        let parsed: EstimationResponse =
            serde_json::from_str(&body).map_err(|e| EstimationError::Parse(e.to_string()))?;

        if !parsed.success {
            return Err(EstimationError::Rejected(
                parsed
                    .error
                    .unwrap_or_else(|| "Estimation service reported failure".to_string()),
            ));
        }

        tracing::info!(
            converged = parsed.converged,
            method = %parsed.method,
            essays = parsed.essay_parameters.len(),
            raters = parsed.rater_parameters.len(),
            "Estimation service returned a fit"
        );

        Ok(parsed)
    }
}
