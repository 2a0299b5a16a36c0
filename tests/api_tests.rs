/// Router tests: full middleware stack, scripted model, mocked identity service.
/// The pool connects lazily and none of these routes touch the database.
mod common;

use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use axum::Router;
use common::*;
use credit_report_api::api;
use credit_report_api::config::Config;
use credit_report_api::handlers::AppState;
use credit_report_api::identity::{self, IdentityClient};
use credit_report_api::model_client::ModelCallError;
use credit_report_api::pipeline::AnalysisPipeline;
use serde_json::{json, Value};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tower::ServiceExt;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const SESSION: &str = "session=good-token";

/// Helper function to create test config
fn create_test_config(identity_base_url: String) -> Config {
    Config {
        database_url: "postgres://postgres@localhost/unused".to_string(),
        port: 0,
        model_base_url: "http://model.invalid/v1".to_string(),
        model_api_key: "unused".to_string(),
        model_name: "test-model".to_string(),
        model_timeout_secs: None,
        identity_base_url,
        identity_api_key: "identity-key".to_string(),
        session_cache_ttl_secs: 60,
        max_upload_bytes: 64 * 1024,
        rate_limit_per_second: 10,
        rate_limit_burst: 20,
    }
}

async fn identity_server(expected_calls: u64) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/sessions/verify"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "userId": "user-1" })))
        .expect(expected_calls)
        .mount(&server)
        .await;
    server
}

fn app(identity_server: &MockServer, backend: ScriptedBackend) -> Router {
    let config = create_test_config(identity_server.uri());
    let db = PgPoolOptions::new()
        .connect_lazy(&config.database_url)
        .unwrap();

    let state = Arc::new(AppState {
        db,
        identity: IdentityClient::from_config(&config).unwrap(),
        session_cache: identity::session_cache(config.session_cache_ttl_secs),
        pipeline: AnalysisPipeline::new(Arc::new(backend)),
        config,
    });

    api::router(state, None).unwrap()
}

fn post(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::COOKIE, SESSION)
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn read_json(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_health_needs_no_session() {
    let server = identity_server(0).await;
    let response = app(&server, ScriptedBackend::new())
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(read_json(response).await["status"], "healthy");
}

#[tokio::test]
async fn test_api_routes_require_session() {
    let server = identity_server(0).await;
    let response = app(&server, ScriptedBackend::new())
        .oneshot(
            Request::builder()
                .uri("/api/v1/reports")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_rejected_session_is_unauthorized() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/sessions/verify"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let response = app(&server, ScriptedBackend::new())
        .oneshot(post(
            "/api/v1/calculators/eligibility",
            json!({ "params": {}, "totalEmi": 0 }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_verified_sessions_are_cached() {
    // expect(1) is checked when the mock server drops
    let server = identity_server(1).await;
    let app = app(&server, ScriptedBackend::new());
    let body = json!({
        "params": {
            "monthlyIncome": 100000,
            "tenureMonths": 48,
            "annualInterestRate": 12
        },
        "totalEmi": 20000
    });

    for _ in 0..2 {
        let response = app
            .clone()
            .oneshot(post("/api/v1/calculators/eligibility", body.clone()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}

#[tokio::test]
async fn test_eligibility_calculator() {
    let server = identity_server(1).await;
    let response = app(&server, ScriptedBackend::new())
        .oneshot(post(
            "/api/v1/calculators/eligibility",
            json!({
                "params": {
                    "monthlyIncome": 100000,
                    "tenureMonths": 48,
                    "annualInterestRate": 12,
                    "dtiRatio": 50
                },
                "totalEmi": 20000
            }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = read_json(response).await;
    assert_eq!(body["repaymentCapacity"], 30000.0);
    assert_eq!(body["eligibleLoanAmount"], 1139219.0);
}

#[tokio::test]
async fn test_short_upload_is_unprocessable() {
    let server = identity_server(1).await;
    let response = app(&server, ScriptedBackend::new())
        .oneshot(post("/api/v1/credit/extract", json!({ "text": "scan.pdf" })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(read_json(response).await["stage"], "extraction");
}

#[tokio::test]
async fn test_step_without_prerequisite_conflicts() {
    let server = identity_server(1).await;
    let response = app(&server, ScriptedBackend::new())
        .oneshot(post("/api/v1/credit/risk", json!({})))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::CONFLICT);
    let body = read_json(response).await;
    assert_eq!(body["stage"], "risk_assessment");
    assert_eq!(
        body["error"],
        "Complete the credit analysis before the risk assessment."
    );
}

#[tokio::test]
async fn test_rate_limited_model_maps_to_429() {
    let server = identity_server(1).await;
    let backend = ScriptedBackend::new().fail("risk_assessment", ModelCallError::RateLimited);
    let response = app(&server, backend)
        .oneshot(post(
            "/api/v1/credit/risk",
            json!({ "analysis": analysis_json(20_000.0) }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn test_risk_step_returns_value_and_usage() {
    let server = identity_server(1).await;
    let backend = ScriptedBackend::new().reply("risk_assessment", risk_json());
    let response = app(&server, backend)
        .oneshot(post(
            "/api/v1/credit/risk",
            json!({ "analysis": analysis_json(20_000.0) }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = read_json(response).await;
    assert_eq!(body["value"]["riskLevel"], "Low");
    assert_eq!(body["value"]["financialRisk"]["expectedLoss"], 30000.0);
    assert_eq!(body["usage"]["totalTokens"], 120);
}

#[tokio::test]
async fn test_pipeline_surfaces_partial_results() {
    let server = identity_server(1).await;
    let backend = ScriptedBackend::new()
        .reply("credit_report_analysis", analysis_json(20_000.0))
        .fail("risk_assessment", ModelCallError::Overloaded);

    let response = app(&server, backend)
        .oneshot(post(
            "/api/v1/credit/pipeline",
            json!({ "text": report_text() }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = read_json(response).await;
    assert_eq!(body["state"], "analyzing");
    assert_eq!(body["analysis"]["cibilScore"], 782);
    assert!(body["risk"].is_null());
    assert_eq!(body["error"]["stage"], "risk_assessment");
}

#[tokio::test]
async fn test_invalid_loan_parameters_are_bad_request() {
    let server = identity_server(1).await;
    let response = app(&server, ScriptedBackend::new())
        .oneshot(post(
            "/api/v1/credit/eligibility",
            json!({
                "analysis": analysis_json(20_000.0),
                "risk": risk_json(),
                "params": {
                    "monthlyIncome": 100000,
                    "tenureMonths": 0,
                    "annualInterestRate": 12
                }
            }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_out_of_range_checkpoint_is_bad_request() {
    let server = identity_server(1).await;
    let mut risk = risk_json();
    risk["riskScore"] = json!(250);
    let backend = ScriptedBackend::new();
    let response = app(&server, backend)
        .oneshot(post(
            "/api/v1/credit/rating",
            json!({ "analysis": analysis_json(20_000.0), "risk": risk }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = read_json(response).await;
    assert_eq!(body["stage"], "risk_assessment");
}

#[tokio::test]
async fn test_saving_out_of_range_score_is_bad_request() {
    // Rejected before the (never connected) pool is touched
    let server = identity_server(1).await;
    let mut analysis = analysis_json(20_000.0);
    analysis["cibilScore"] = json!(1200);
    let response = app(&server, ScriptedBackend::new())
        .oneshot(post("/api/v1/reports", json!({ "analysis": analysis })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_cross_verify_needs_a_supporting_document() {
    let server = identity_server(1).await;
    let response = app(&server, ScriptedBackend::new())
        .oneshot(post(
            "/api/v1/cross-verify",
            json!({ "cibilReport": report_text() }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_cross_verify_reports_each_document() {
    let server = identity_server(1).await;
    let backend = ScriptedBackend::new()
        .reply("credit_report_analysis", analysis_json(20_000.0))
        .reply("salary_slip_analysis", salary_slip_json())
        .reply("cross_verification", cross_verification_json());

    let response = app(&server, backend)
        .oneshot(post(
            "/api/v1/cross-verify",
            json!({
                "cibilReport": report_text(),
                "salarySlips": [supporting_text("SALARY SLIP"), "?"]
            }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = read_json(response).await;
    assert_eq!(body["cibil"]["status"], "ok");
    assert_eq!(body["salarySlips"][0]["status"], "ok");
    assert_eq!(body["salarySlips"][1]["status"], "error");
    assert_eq!(body["salarySlips"][1]["stage"], "document_analysis");
    assert_eq!(body["verification"]["value"]["overallStatus"], "Verified");
}

#[tokio::test]
async fn test_chat_reply() {
    let server = identity_server(1).await;
    let backend = ScriptedBackend::new().reply_text(CHAT_TASK, "Two active loans.");
    let response = app(&server, backend)
        .oneshot(post(
            "/api/v1/chat",
            json!({
                "message": "How many active loans do I have?",
                "history": [{ "role": "assistant", "content": "Hi!" }],
                "context": analysis_json(20_000.0)
            }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(read_json(response).await["reply"], "Two active loans.");
}

#[tokio::test]
async fn test_oversized_body_is_rejected() {
    let server = identity_server(0).await;
    let body = json!({ "text": "x".repeat(128 * 1024) }).to_string();
    let request = Request::builder()
        .method("POST")
        .uri("/api/v1/credit/extract")
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::CONTENT_LENGTH, body.len())
        .header(header::COOKIE, SESSION)
        .body(Body::from(body))
        .unwrap();

    // Rejected on Content-Length before the session is even checked
    let response = app(&server, ScriptedBackend::new())
        .oneshot(request)
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
}
