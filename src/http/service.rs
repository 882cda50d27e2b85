//! Standalone decision service.
//!
//! Lets a proxy or another process ask for admission decisions over HTTP
//! and report outcomes back.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::ratelimit::{AdmissionEngine, ClientKey, LimitingDimension, RequestMetadata};

/// Outcome of a request admitted through `/v1/admission`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutcomeReport {
    pub client_key: ClientKey,
    pub path: String,
    #[serde(default)]
    pub roles: Vec<String>,
    pub status_code: u16,
    /// Dimension that denied the request, when the admission call denied it
    #[serde(default)]
    pub limiting_dimension: Option<LimitingDimension>,
}

/// Routes for the decision service.
pub fn router(engine: Arc<AdmissionEngine>) -> Router {
    Router::new()
        .route("/v1/admission", post(admission))
        .route("/v1/outcome", post(outcome))
        .route("/health", get(health))
        .with_state(engine)
}

fn bad_request(message: &str) -> Response {
    (StatusCode::BAD_REQUEST, Json(json!({ "error": message }))).into_response()
}

async fn admission(
    State(engine): State<Arc<AdmissionEngine>>,
    Json(request): Json<RequestMetadata>,
) -> Response {
    if request.path.is_empty() {
        warn!("Received admission request with empty path");
        return bad_request("path is required");
    }

    let evaluation = engine.evaluate(&request);
    debug!(
        client = %evaluation.client_key,
        path = %request.path,
        allowed = evaluation.decision.allowed,
        "Admission decision served"
    );
    Json(evaluation).into_response()
}

async fn outcome(
    State(engine): State<Arc<AdmissionEngine>>,
    Json(report): Json<OutcomeReport>,
) -> Response {
    if report.client_key.as_str().is_empty() {
        return bad_request("client_key is required");
    }
    if report.path.is_empty() {
        return bad_request("path is required");
    }
    if !(100..=599).contains(&report.status_code) {
        return bad_request("status_code must be a valid HTTP status");
    }

    debug!(
        client = %report.client_key,
        path = %report.path,
        status = report.status_code,
        "Outcome reported"
    );
    if report.limiting_dimension == Some(LimitingDimension::Overload) {
        return StatusCode::NO_CONTENT.into_response();
    }

    let rule = engine.resolver().resolve(&report.path, &report.roles);
    engine.record(&report.client_key, rule, &report.path, report.status_code);
    StatusCode::NO_CONTENT.into_response()
}

async fn health(State(engine): State<Arc<AdmissionEngine>>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "store": engine.store().stats(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::{
        ManualClock, QuarantineTracker, RateLimitRule, RateLimitStore, RuleResolver, RulesConfig,
        StoreSettings,
    };
    use axum::body::Body;
    use axum::http::{header, Request};
    use tower::ServiceExt;

    fn engine() -> Arc<AdmissionEngine> {
        let rules = RulesConfig {
            default: RateLimitRule::new(2, 100, 10, 10, 120),
            endpoints: Vec::new(),
            roles: Vec::new(),
        };
        let store = Arc::new(RateLimitStore::new(StoreSettings::default()));
        let quarantine = QuarantineTracker::new(Arc::clone(&store), 1, 300);
        Arc::new(AdmissionEngine::new(
            RuleResolver::new(rules).unwrap(),
            store,
            quarantine,
            Arc::new(ManualClock::new(1_000.0)),
        ))
    }

    fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn json_body(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_admission_returns_evaluation() {
        let app = router(engine());

        let response = app
            .oneshot(post_json(
                "/v1/admission",
                json!({ "path": "/api/items", "identity": { "user_id": "42", "roles": [] } }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = json_body(response).await;
        assert_eq!(body["client_key"], "user:42");
        assert_eq!(body["rule"]["scope"], "default");
        assert_eq!(body["decision"]["allowed"], true);
        assert_eq!(body["decision"]["limiting_dimension"], "none");
        assert_eq!(body["decision"]["remaining_minute"], 1);
    }

    #[tokio::test]
    async fn test_admission_rejects_empty_path() {
        let app = router(engine());

        let response = app
            .oneshot(post_json("/v1/admission", json!({ "path": "" })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_admission_rejects_malformed_body() {
        let app = router(engine());

        let response = app
            .oneshot(post_json("/v1/admission", json!({ "identity": 5 })))
            .await
            .unwrap();
        assert!(response.status().is_client_error());
    }

    #[tokio::test]
    async fn test_outcomes_drive_quarantine() {
        let app = router(engine());
        let report = json!({ "client_key": "user:7", "path": "/api/items", "status_code": 429 });

        for _ in 0..2 {
            let response = app
                .clone()
                .oneshot(post_json("/v1/outcome", report.clone()))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::NO_CONTENT);
        }

        let response = app
            .oneshot(post_json(
                "/v1/admission",
                json!({ "path": "/api/items", "identity": { "user_id": "7" } }),
            ))
            .await
            .unwrap();
        let body = json_body(response).await;
        assert_eq!(body["decision"]["allowed"], false);
        assert_eq!(body["decision"]["limiting_dimension"], "quarantine");
        assert_eq!(body["decision"]["retry_after_seconds"], 120);
    }

    #[tokio::test]
    async fn test_overload_outcomes_are_ignored() {
        let engine = engine();
        let app = router(Arc::clone(&engine));
        let report = json!({
            "client_key": "user:8",
            "path": "/api/items",
            "status_code": 429,
            "limiting_dimension": "overload",
        });

        for _ in 0..3 {
            let response = app
                .clone()
                .oneshot(post_json("/v1/outcome", report.clone()))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::NO_CONTENT);
        }

        let stats = engine.store().stats();
        assert_eq!(stats.tracked_histories, 0);
        assert_eq!(stats.blocked_clients, 0);
    }

    #[tokio::test]
    async fn test_outcome_rejects_invalid_status() {
        let app = router(engine());

        let response = app
            .oneshot(post_json(
                "/v1/outcome",
                json!({ "client_key": "user:7", "path": "/api/items", "status_code": 42 }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_health() {
        let app = router(engine());

        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["store"]["blocked_clients"], 0);
    }
}
