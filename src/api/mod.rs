//! HTTP surface: route table and middleware stack.

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_governor::{
    governor::GovernorConfigBuilder, key_extractor::SmartIpKeyExtractor, GovernorLayer,
};
use tower_http::{cors::CorsLayer, limit::RequestBodyLimitLayer, trace::TraceLayer};

use crate::errors::AppError;
use crate::handlers::{self, AppState};

pub use crate::handlers::{
    CalculatorRequest, ChatRequest, ChatResponse, CrossVerifyResponse, ExtractResponse,
    LoanStepRequest, PipelineRequest, SaveReportRequest, StepRequest, TextRequest, VerifyRequest,
};

/// Per-IP request budget: sustained requests per second plus burst size.
#[derive(Debug, Clone, Copy)]
pub struct RateLimit {
    pub per_second: u64,
    pub burst: u32,
}

/// Builds the application router.
///
/// `/health` sits outside the body limit and the rate limiter. Passing
/// `None` for `rate_limit` serves without the governor, which needs the
/// peer address that only a real listener provides.
pub fn router(state: Arc<AppState>, rate_limit: Option<RateLimit>) -> Result<Router, AppError> {
    let max_upload_bytes = state.config.max_upload_bytes;

    let api_routes = Router::new()
        // Linear pipeline steps
        .route("/api/v1/credit/extract", post(handlers::extract_report))
        .route("/api/v1/credit/analyze", post(handlers::analyze_report))
        .route("/api/v1/credit/risk", post(handlers::assess_risk))
        .route("/api/v1/credit/rating", post(handlers::rate_report))
        .route(
            "/api/v1/credit/eligibility",
            post(handlers::assess_eligibility),
        )
        .route("/api/v1/credit/underwriting", post(handlers::underwrite))
        .route("/api/v1/credit/pipeline", post(handlers::run_pipeline))
        .route(
            "/api/v1/calculators/eligibility",
            post(handlers::eligibility_calculator),
        )
        // Supporting documents
        .route("/api/v1/verify", post(handlers::verify_document))
        .route("/api/v1/cross-verify", post(handlers::cross_verify))
        .route("/api/v1/chat", post(handlers::chat))
        // Saved summaries
        .route(
            "/api/v1/reports",
            post(handlers::save_report).get(handlers::list_reports),
        )
        .layer(
            ServiceBuilder::new()
                .layer(DefaultBodyLimit::max(max_upload_bytes))
                .layer(RequestBodyLimitLayer::new(max_upload_bytes)),
        );

    let api_routes = match rate_limit {
        Some(limit) => {
            let governor_conf = Arc::new(
                GovernorConfigBuilder::default()
                    .per_millisecond((1000 / limit.per_second.max(1)).max(1))
                    .burst_size(limit.burst)
                    .key_extractor(SmartIpKeyExtractor)
                    .finish()
                    .ok_or_else(|| {
                        AppError::InternalError(format!(
                            "Invalid rate limit: {}/s, burst {}",
                            limit.per_second, limit.burst
                        ))
                    })?,
            );
            api_routes.layer(GovernorLayer {
                config: governor_conf,
            })
        }
        None => api_routes,
    };

    Ok(Router::new()
        .route("/health", get(handlers::health))
        .merge(api_routes)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive()))
}
