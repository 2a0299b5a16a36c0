use crate::config::Config;
use crate::db_storage::SummaryStorage;
use crate::errors::AppError;
use crate::finance::EligibilityCalculation;
use crate::identity::{AuthUser, IdentityClient, VerifiedSession};
use crate::models::*;
use crate::pipeline::{
    AnalysisPipeline, Checkpoint, CrossVerificationDocuments, CrossVerificationOutcome,
    PipelineRun, RunSnapshot, StepOutput, StepReport,
};
use crate::validation::validate_loan_parameters;
use axum::{extract::State, http::StatusCode, Json};
use moka::future::Cache;
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::PgPool;
use std::sync::Arc;

/// Shared application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool.
    pub db: PgPool,
    /// Application configuration.
    pub config: Config,
    /// Analysis steps, bound to the configured model backend.
    pub pipeline: AnalysisPipeline,
    /// Client for the managed identity service.
    pub identity: IdentityClient,
    /// Verified sessions keyed by token digest.
    pub session_cache: Cache<String, VerifiedSession>,
}

// ============ Request / Response Types ============

#[derive(Debug, Deserialize)]
pub struct TextRequest {
    pub text: String,
}

/// Upstream outputs for a single step.
#[derive(Debug, Deserialize)]
pub struct StepRequest {
    #[serde(flatten)]
    pub checkpoint: Checkpoint,
}

/// Upstream outputs plus the applicant's loan parameters.
#[derive(Debug, Deserialize)]
pub struct LoanStepRequest {
    #[serde(flatten)]
    pub checkpoint: Checkpoint,
    pub params: LoanParameters,
}

#[derive(Debug, Deserialize)]
pub struct PipelineRequest {
    pub text: String,
    #[serde(default)]
    pub params: Option<LoanParameters>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalculatorRequest {
    pub params: LoanParameters,
    pub total_emi: f64,
}

#[derive(Debug, Deserialize)]
pub struct VerifyRequest {
    pub kind: DocumentKind,
    pub text: String,
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    #[serde(default)]
    pub history: Vec<ChatTurn>,
    #[serde(default)]
    pub context: Option<StructuredAnalysis>,
}

/// The analysis is checked against its schema before anything is stored.
#[derive(Debug, Deserialize)]
pub struct SaveReportRequest {
    pub analysis: serde_json::Value,
}

#[derive(Debug, Serialize)]
pub struct ExtractResponse {
    pub text: ExtractedReportText,
    pub characters: usize,
}

#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub reply: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
}

/// Every document's result next to the merged verification.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CrossVerifyResponse {
    pub cibil: StepReport<StructuredAnalysis>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bank_statement: Option<StepReport<BankStatementAnalysis>>,
    pub salary_slips: Vec<StepReport<SalarySlipAnalysis>>,
    pub verification: StepReport<CrossVerificationResult>,
}

impl From<CrossVerificationOutcome> for CrossVerifyResponse {
    fn from(outcome: CrossVerificationOutcome) -> Self {
        Self {
            cibil: outcome.cibil.into(),
            bank_statement: outcome.bank_statement.map(StepReport::from),
            salary_slips: outcome
                .salary_slips
                .into_iter()
                .map(StepReport::from)
                .collect(),
            verification: outcome.verification.into(),
        }
    }
}

// ============ Handlers ============

/// Health check endpoint.
///
/// Returns the service status and version.
pub async fn health() -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::OK,
        Json(json!({
            "status": "healthy",
            "service": "credit-report-api",
            "version": env!("CARGO_PKG_VERSION")
        })),
    )
}

/// POST /api/v1/credit/extract
///
/// Normalizes text pulled out of an uploaded report and checks that it is
/// usable. Nothing is sent to the model.
pub async fn extract_report(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Json(req): Json<TextRequest>,
) -> Result<Json<ExtractResponse>, AppError> {
    tracing::info!(
        "POST /credit/extract - user {} ({} bytes)",
        user.user_id,
        req.text.len()
    );

    let mut run = PipelineRun::new();
    let text = state.pipeline.extract(&mut run, &req.text)?;

    Ok(Json(ExtractResponse {
        characters: text.as_str().chars().count(),
        text,
    }))
}

/// POST /api/v1/credit/analyze
pub async fn analyze_report(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Json(req): Json<TextRequest>,
) -> Result<Json<StepOutput<StructuredAnalysis>>, AppError> {
    tracing::info!("POST /credit/analyze - user {}", user.user_id);

    let mut run = PipelineRun::new();
    state.pipeline.extract(&mut run, &req.text)?;
    let output = state.pipeline.analyze(&mut run).await?;

    Ok(Json(output))
}

/// POST /api/v1/credit/risk
pub async fn assess_risk(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Json(req): Json<StepRequest>,
) -> Result<Json<StepOutput<RiskAssessment>>, AppError> {
    tracing::info!("POST /credit/risk - user {}", user.user_id);

    let mut run = PipelineRun::from_checkpoint(req.checkpoint, None)?;
    let output = state.pipeline.assess_risk(&mut run).await?;

    Ok(Json(output))
}

/// POST /api/v1/credit/rating
pub async fn rate_report(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Json(req): Json<StepRequest>,
) -> Result<Json<StepOutput<AiRating>>, AppError> {
    tracing::info!("POST /credit/rating - user {}", user.user_id);

    let mut run = PipelineRun::from_checkpoint(req.checkpoint, None)?;
    let output = state.pipeline.rate(&mut run).await?;

    Ok(Json(output))
}

/// POST /api/v1/credit/eligibility
pub async fn assess_eligibility(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Json(req): Json<LoanStepRequest>,
) -> Result<Json<StepOutput<LoanEligibilityResult>>, AppError> {
    tracing::info!("POST /credit/eligibility - user {}", user.user_id);

    let mut run = PipelineRun::from_checkpoint(req.checkpoint, Some(&req.params))?;
    let output = state
        .pipeline
        .assess_eligibility(&mut run, &req.params)
        .await?;

    Ok(Json(output))
}

/// POST /api/v1/credit/underwriting
pub async fn underwrite(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Json(req): Json<LoanStepRequest>,
) -> Result<Json<StepOutput<UnderwritingDecision>>, AppError> {
    tracing::info!("POST /credit/underwriting - user {}", user.user_id);

    let mut run = PipelineRun::from_checkpoint(req.checkpoint, Some(&req.params))?;
    let output = state.pipeline.underwrite(&mut run, &req.params).await?;

    Ok(Json(output))
}

/// POST /api/v1/credit/pipeline
///
/// Runs analysis, risk assessment and (with parameters) eligibility in one
/// request. A failing step does not fail the request: the snapshot carries
/// every output produced before it, plus the error.
pub async fn run_pipeline(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Json(req): Json<PipelineRequest>,
) -> Result<Json<RunSnapshot>, AppError> {
    tracing::info!(
        "POST /credit/pipeline - user {} (eligibility: {})",
        user.user_id,
        req.params.is_some()
    );

    if let Some(params) = &req.params {
        validate_loan_parameters(params).map_err(AppError::BadRequest)?;
    }

    let mut run = PipelineRun::new();
    state.pipeline.extract(&mut run, &req.text)?;

    if let Err(e) = state
        .pipeline
        .run_through(&mut run, req.params.as_ref())
        .await
    {
        tracing::warn!("Pipeline stopped at {:?}: {}", run.state(), e);
    }

    Ok(Json(run.snapshot()))
}

/// POST /api/v1/calculators/eligibility
///
/// The deterministic part of loan eligibility on its own.
pub async fn eligibility_calculator(
    AuthUser(_user): AuthUser,
    Json(req): Json<CalculatorRequest>,
) -> Result<Json<EligibilityCalculation>, AppError> {
    validate_loan_parameters(&req.params).map_err(AppError::BadRequest)?;
    if !req.total_emi.is_finite() || req.total_emi < 0.0 {
        return Err(AppError::BadRequest(
            "Total EMI cannot be negative".to_string(),
        ));
    }

    Ok(Json(EligibilityCalculation::compute(
        &req.params,
        req.total_emi,
    )))
}

/// POST /api/v1/verify
pub async fn verify_document(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Json(req): Json<VerifyRequest>,
) -> Result<Json<StepOutput<DocumentAnalysis>>, AppError> {
    tracing::info!("POST /verify - user {} ({:?})", user.user_id, req.kind);

    let output = state
        .pipeline
        .analyze_document(req.kind, &req.text)
        .await?;

    Ok(Json(output))
}

/// POST /api/v1/cross-verify
pub async fn cross_verify(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Json(req): Json<CrossVerificationDocuments>,
) -> Result<Json<CrossVerifyResponse>, AppError> {
    tracing::info!("POST /cross-verify - user {}", user.user_id);

    if req.bank_statement.is_none() && req.salary_slips.is_empty() {
        return Err(AppError::BadRequest(
            "Provide a bank statement or at least one salary slip".to_string(),
        ));
    }

    let outcome = state.pipeline.cross_verify(&req).await;
    Ok(Json(outcome.into()))
}

/// POST /api/v1/chat
pub async fn chat(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Json(req): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, AppError> {
    tracing::info!(
        "POST /chat - user {} ({} prior turns)",
        user.user_id,
        req.history.len()
    );

    let output = state
        .pipeline
        .chat(&req.message, &req.history, req.context.as_ref())
        .await?;

    Ok(Json(ChatResponse {
        reply: output.value,
        usage: output.usage,
    }))
}

/// POST /api/v1/reports
///
/// Finishes a run and appends its summary to the user's history.
pub async fn save_report(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Json(req): Json<SaveReportRequest>,
) -> Result<(StatusCode, Json<ReportSummary>), AppError> {
    tracing::info!("POST /reports - user {}", user.user_id);

    let mut run = PipelineRun::from_checkpoint(
        Checkpoint {
            analysis: Some(req.analysis),
            ..Default::default()
        },
        None,
    )?;
    let summary = run.finish(&user.user_id)?;

    let storage = SummaryStorage::new(state.db.clone());
    let row = storage.insert(&summary).await?;

    Ok((StatusCode::CREATED, Json(row)))
}

/// GET /api/v1/reports
///
/// The signed-in user's saved summaries, newest first.
pub async fn list_reports(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
) -> Result<Json<Vec<ReportSummary>>, AppError> {
    tracing::info!("GET /reports - user {}", user.user_id);

    let storage = SummaryStorage::new(state.db.clone());
    let rows = storage.list_for_user(&user.user_id).await?;

    Ok(Json(rows))
}
