//! HttpEstimator against a local stand-in for the Estimation Service

use std::time::Duration;

use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use mfrm_cal::services::estimation_client::Observation;
use mfrm_cal::services::{EstimationError, Estimator, HttpEstimator};
use serde::Deserialize;
use serde_json::{json, Value};

const PATH: &str = "/api/calibration/run-expert";

/// Serve `router` on an ephemeral port and return its base URL
async fn serve(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{}", addr)
}

fn observations() -> Vec<Observation> {
    ["e1", "e1", "e2"]
        .iter()
        .enumerate()
        .map(|(i, essay)| Observation {
            rater_id: format!("r{}", i),
            item_id: essay.to_string(),
            facet_id: "f1".to_string(),
            score: 2,
        })
        .collect()
}

/// Request body as the `run-expert` endpoint reads it
#[derive(Debug, Deserialize)]
struct RunExpertBody {
    expert_scores: Vec<ExpertScoreRow>,
}

#[derive(Debug, Deserialize)]
struct ExpertScoreRow {
    expert_id: String,
    essay_id: String,
    rubric_id: String,
    score: u8,
}

async fn fit(Json(body): Json<RunExpertBody>) -> Json<Value> {
    assert!(body.expert_scores.iter().all(|row| row.rubric_id == "f1" && row.score == 2));

    let mut essays: Vec<&str> = body.expert_scores.iter().map(|row| row.essay_id.as_str()).collect();
    essays.sort_unstable();
    essays.dedup();

    let mut experts: Vec<&str> = body.expert_scores.iter().map(|row| row.expert_id.as_str()).collect();
    experts.sort_unstable();
    experts.dedup();

    Json(json!({
        "success": true,
        "converged": true,
        "method": "JMLE",
        "separation_reliability": 0.88,
        "summary": {"total_observations": body.expert_scores.len(), "total_experts": experts.len()},
        "essay_parameters": essays
            .iter()
            .map(|id| json!({"essay_id": id, "difficulty_logit": -0.5, "difficulty_se": 0.3}))
            .collect::<Vec<_>>(),
        "expert_parameters": experts
            .iter()
            .map(|id| json!({"expert_id": id, "severity": 0.2}))
            .collect::<Vec<_>>()
    }))
}

#[tokio::test]
async fn test_successful_fit_is_parsed() {
    let base = serve(Router::new().route(PATH, post(fit))).await;
    let client = HttpEstimator::new(&format!("{}/", base), Duration::from_secs(5)).unwrap();

    let response = client.estimate(&observations()).await.unwrap();

    assert!(response.success);
    assert!(response.converged);
    assert_eq!(response.method, "JMLE");
    assert_eq!(response.separation_reliability, Some(0.88));
    assert_eq!(response.summary.total_observations, Some(3));
    assert_eq!(response.essay_parameters.len(), 2);
    assert_eq!(response.essay_parameters[0].essay_id, "e1");
    assert_eq!(response.essay_parameters[0].difficulty_se, Some(0.3));
    assert_eq!(response.summary.total_experts, Some(3));
    assert_eq!(response.rater_parameters.len(), 3);
    assert_eq!(response.rater_parameters[0].rater_id, "r0");
    assert_eq!(response.rater_parameters[0].severity, 0.2);
}

#[tokio::test]
async fn test_reported_failure_is_rejected() {
    let router = Router::new().route(
        PATH,
        post(|| async { Json(json!({"success": false, "error": "Model did not converge"})) }),
    );
    let client = HttpEstimator::new(&serve(router).await, Duration::from_secs(5)).unwrap();

    match client.estimate(&observations()).await {
        Err(EstimationError::Rejected(msg)) => assert_eq!(msg, "Model did not converge"),
        other => panic!("expected Rejected, got {:?}", other),
    }
}

#[tokio::test]
async fn test_http_error_carries_service_message() {
    let router = Router::new().route(
        PATH,
        post(|| async {
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": "R backend crashed"})),
            )
        }),
    );
    let client = HttpEstimator::new(&serve(router).await, Duration::from_secs(5)).unwrap();

    match client.estimate(&observations()).await {
        Err(EstimationError::Api(500, msg)) => assert_eq!(msg, "R backend crashed"),
        other => panic!("expected Api(500), got {:?}", other),
    }
}

#[tokio::test]
async fn test_http_error_with_plain_body() {
    let router = Router::new().route(
        PATH,
        post(|| async { (StatusCode::SERVICE_UNAVAILABLE, "overloaded") }),
    );
    let client = HttpEstimator::new(&serve(router).await, Duration::from_secs(5)).unwrap();

    match client.estimate(&observations()).await {
        Err(EstimationError::Api(503, msg)) => assert_eq!(msg, "overloaded"),
        other => panic!("expected Api(503), got {:?}", other),
    }
}

#[tokio::test]
async fn test_unreadable_body_is_parse_error() {
    let router = Router::new().route(PATH, post(|| async { "not json" }));
    let client = HttpEstimator::new(&serve(router).await, Duration::from_secs(5)).unwrap();

    let err = client.estimate(&observations()).await.unwrap_err();
    assert!(matches!(err, EstimationError::Parse(_)), "got {:?}", err);
}

#[tokio::test]
async fn test_slow_service_times_out() {
    let router = Router::new().route(
        PATH,
        post(|| async {
            tokio::time::sleep(Duration::from_secs(3)).await;
            Json(json!({"success": true}))
        }),
    );
    let client = HttpEstimator::new(&serve(router).await, Duration::from_millis(200)).unwrap();

    let err = client.estimate(&observations()).await.unwrap_err();
    assert!(matches!(err, EstimationError::Timeout(_)), "got {:?}", err);
}

#[tokio::test]
async fn test_unreachable_service_is_network_error() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let client = HttpEstimator::new(&format!("http://{}", addr), Duration::from_secs(5)).unwrap();

    let err = client.estimate(&observations()).await.unwrap_err();
    assert!(matches!(err, EstimationError::Network(_)), "got {:?}", err);
}
