//! Sequential credit analysis pipeline.
//!
//! Each step sends the previous step's validated output to the model and
//! validates what comes back. The caller drives every transition; nothing
//! here schedules, retries or cancels.
//!
//! ```text
//! Idle -> Extracting -> Analyzing -> RiskAssessing -> Rating | Eligibility | Underwriting -> Done
//! ```
//!
//! A failed step drops its own output and everything that consumed it, moves
//! the run back to the state preceding that step and records the error.
//! Earlier outputs are kept; nothing is compensated.

use futures::future::join_all;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

use crate::db_storage::project_summary;
use crate::errors::{StepError, StepErrorKind};
use crate::finance::{self, EligibilityCalculation};
use crate::model_client::{InferenceRequest, ModelBackend};
use crate::models::*;
use crate::prompts;
use crate::schema::{decode_structured, decode_value, StructuredOutput};
use crate::validation::validate_loan_parameters;

/// Shortest text accepted as a document.
pub const MIN_DOCUMENT_CHARS: usize = 50;
/// Longest text sent to the model in one prompt.
pub const MAX_DOCUMENT_CHARS: usize = 200_000;
const MAX_CHAT_HISTORY: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Extraction,
    Analysis,
    RiskAssessment,
    Rating,
    Eligibility,
    Underwriting,
    Summary,
    DocumentAnalysis,
    CrossVerification,
    Chat,
}

impl Stage {
    /// Human-readable name used in user-facing messages.
    pub fn label(&self) -> &'static str {
        match self {
            Stage::Extraction => "report extraction",
            Stage::Analysis => "credit analysis",
            Stage::RiskAssessment => "risk assessment",
            Stage::Rating => "AI rating",
            Stage::Eligibility => "loan eligibility assessment",
            Stage::Underwriting => "underwriting decision",
            Stage::Summary => "report summary",
            Stage::DocumentAnalysis => "document analysis",
            Stage::CrossVerification => "cross-verification",
            Stage::Chat => "chat reply",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Extraction => "extraction",
            Stage::Analysis => "analysis",
            Stage::RiskAssessment => "risk_assessment",
            Stage::Rating => "rating",
            Stage::Eligibility => "eligibility",
            Stage::Underwriting => "underwriting",
            Stage::Summary => "summary",
            Stage::DocumentAnalysis => "document_analysis",
            Stage::CrossVerification => "cross_verification",
            Stage::Chat => "chat",
        }
    }

    /// Position in the linear pipeline, for stages that are part of it.
    fn order(&self) -> Option<u8> {
        match self {
            Stage::Extraction => Some(0),
            Stage::Analysis => Some(1),
            Stage::RiskAssessment => Some(2),
            Stage::Rating => Some(3),
            Stage::Eligibility => Some(4),
            Stage::Underwriting => Some(5),
            _ => None,
        }
    }

    /// State a run is in once this stage's output is held.
    fn reached_state(&self) -> PipelineState {
        match self {
            Stage::Extraction => PipelineState::Extracting,
            Stage::Analysis => PipelineState::Analyzing,
            Stage::RiskAssessment => PipelineState::RiskAssessing,
            Stage::Rating => PipelineState::Rating,
            Stage::Eligibility => PipelineState::Eligibility,
            Stage::Underwriting => PipelineState::Underwriting,
            Stage::Summary => PipelineState::Done,
            _ => PipelineState::Idle,
        }
    }

    /// State a run falls back to when this stage fails.
    fn preceding_state(&self) -> PipelineState {
        match self {
            Stage::Extraction => PipelineState::Idle,
            Stage::Analysis => PipelineState::Extracting,
            Stage::RiskAssessment => PipelineState::Analyzing,
            Stage::Rating | Stage::Eligibility | Stage::Underwriting => {
                PipelineState::RiskAssessing
            }
            _ => PipelineState::Idle,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Idle,
    Extracting,
    Analyzing,
    RiskAssessing,
    Rating,
    Eligibility,
    Underwriting,
    Done,
}

/// A validated step result plus the model's token accounting.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepOutput<T> {
    pub value: T,
    pub usage: Option<TokenUsage>,
}

/// Serializable form of a step result, for surfacing partial progress.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StepReport<T> {
    Ok {
        value: T,
        #[serde(skip_serializing_if = "Option::is_none")]
        usage: Option<TokenUsage>,
    },
    Error {
        stage: Stage,
        error: String,
    },
}

impl<T> From<Result<StepOutput<T>, StepError>> for StepReport<T> {
    fn from(result: Result<StepOutput<T>, StepError>) -> Self {
        match result {
            Ok(out) => StepReport::Ok {
                value: out.value,
                usage: out.usage,
            },
            Err(err) => StepReport::Error {
                stage: err.stage,
                error: err.user_message(),
            },
        }
    }
}

/// Upstream outputs a caller hands back to resume a run.
///
/// Held as raw JSON until `PipelineRun::from_checkpoint` has checked each
/// record against its schema.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Checkpoint {
    #[serde(default)]
    pub analysis: Option<Value>,
    #[serde(default)]
    pub risk: Option<Value>,
    #[serde(default)]
    pub rating: Option<Value>,
    #[serde(default)]
    pub eligibility: Option<Value>,
}

/// One user's walk through the pipeline.
#[derive(Debug, Clone)]
pub struct PipelineRun {
    state: PipelineState,
    text: Option<ExtractedReportText>,
    analysis: Option<StructuredAnalysis>,
    risk: Option<RiskAssessment>,
    rating: Option<AiRating>,
    eligibility: Option<LoanEligibilityResult>,
    underwriting: Option<UnderwritingDecision>,
    last_error: Option<StepError>,
    usage: TokenUsage,
}

impl Default for PipelineRun {
    fn default() -> Self {
        Self::new()
    }
}

/// Serializable view of a run.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSnapshot {
    pub state: PipelineState,
    pub analysis: Option<StructuredAnalysis>,
    pub risk: Option<RiskAssessment>,
    pub rating: Option<AiRating>,
    pub eligibility: Option<LoanEligibilityResult>,
    pub underwriting: Option<UnderwritingDecision>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RunError>,
    pub usage: TokenUsage,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunError {
    pub stage: Stage,
    pub message: String,
}

impl PipelineRun {
    pub fn new() -> Self {
        Self {
            state: PipelineState::Idle,
            text: None,
            analysis: None,
            risk: None,
            rating: None,
            eligibility: None,
            underwriting: None,
            last_error: None,
            usage: TokenUsage::default(),
        }
    }

    /// Rebuilds a run from outputs the caller already holds.
    ///
    /// Each record is decoded against its schema; a record that fails is
    /// rejected as invalid input. Only a consistent prefix is kept: a risk
    /// assessment without an analysis, or a rating without a risk
    /// assessment, is dropped. Expected loss is recomputed rather than
    /// trusted, and so is the eligibility calculation, from `params`. Without
    /// `params` a checkpointed eligibility result is dropped.
    pub fn from_checkpoint(
        checkpoint: Checkpoint,
        params: Option<&LoanParameters>,
    ) -> Result<Self, StepError> {
        let mut run = Self::new();

        let Some(analysis) = checkpoint.analysis else {
            if checkpoint.risk.is_some() || checkpoint.rating.is_some() {
                tracing::warn!("Checkpoint carries downstream outputs without an analysis");
            }
            return Ok(run);
        };
        let analysis: StructuredAnalysis = resumed(Stage::Analysis, analysis)?;
        let total_emi = analysis.emi_summary.total_emi;
        run.analysis = Some(analysis);
        run.state = PipelineState::Analyzing;

        let Some(risk) = checkpoint.risk else {
            return Ok(run);
        };
        let mut risk: RiskAssessment = resumed(Stage::RiskAssessment, risk)?;
        apply_expected_loss(&mut risk);
        run.risk = Some(risk);
        run.state = PipelineState::RiskAssessing;

        if let Some(rating) = checkpoint.rating {
            run.rating = Some(resumed(Stage::Rating, rating)?);
            run.state = PipelineState::Rating;
        }
        if let Some(eligibility) = checkpoint.eligibility {
            let mut eligibility: LoanEligibilityResult = resumed(Stage::Eligibility, eligibility)?;
            match params {
                Some(params) => {
                    eligibility.calculation = EligibilityCalculation::compute(params, total_emi);
                    force_not_eligible(&eligibility.calculation, &mut eligibility.assessment);
                    run.eligibility = Some(eligibility);
                    run.state = PipelineState::Eligibility;
                }
                None => tracing::warn!(
                    "Dropping checkpointed eligibility: no loan parameters to recompute it from"
                ),
            }
        }
        Ok(run)
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn text(&self) -> Option<&ExtractedReportText> {
        self.text.as_ref()
    }

    pub fn analysis(&self) -> Option<&StructuredAnalysis> {
        self.analysis.as_ref()
    }

    pub fn risk(&self) -> Option<&RiskAssessment> {
        self.risk.as_ref()
    }

    pub fn rating(&self) -> Option<&AiRating> {
        self.rating.as_ref()
    }

    pub fn eligibility(&self) -> Option<&LoanEligibilityResult> {
        self.eligibility.as_ref()
    }

    pub fn underwriting(&self) -> Option<&UnderwritingDecision> {
        self.underwriting.as_ref()
    }

    pub fn last_error(&self) -> Option<&StepError> {
        self.last_error.as_ref()
    }

    /// Tokens spent by every successful step of this run.
    pub fn usage(&self) -> TokenUsage {
        self.usage
    }

    pub fn snapshot(&self) -> RunSnapshot {
        RunSnapshot {
            state: self.state,
            analysis: self.analysis.clone(),
            risk: self.risk.clone(),
            rating: self.rating.clone(),
            eligibility: self.eligibility.clone(),
            underwriting: self.underwriting.clone(),
            error: self.last_error.as_ref().map(|e| RunError {
                stage: e.stage,
                message: e.user_message(),
            }),
            usage: self.usage,
        }
    }

    fn require_text(&self, stage: Stage) -> Result<&ExtractedReportText, StepError> {
        self.text.as_ref().ok_or_else(|| out_of_order(stage, Stage::Extraction))
    }

    fn require_analysis(&self, stage: Stage) -> Result<&StructuredAnalysis, StepError> {
        self.analysis.as_ref().ok_or_else(|| out_of_order(stage, Stage::Analysis))
    }

    fn require_risk(&self, stage: Stage) -> Result<&RiskAssessment, StepError> {
        self.risk
            .as_ref()
            .ok_or_else(|| out_of_order(stage, Stage::RiskAssessment))
    }

    /// Drops the output of `stage` and of every stage after it.
    fn discard_from(&mut self, stage: Stage) {
        let Some(from) = stage.order() else {
            return;
        };
        if from == 0 {
            self.text = None;
        }
        if from <= 1 {
            self.analysis = None;
        }
        if from <= 2 {
            self.risk = None;
        }
        if from <= 3 {
            self.rating = None;
        }
        if from <= 4 {
            self.eligibility = None;
        }
        self.underwriting = None;
    }

    fn succeed(&mut self, stage: Stage, usage: Option<TokenUsage>) {
        self.state = stage.reached_state();
        self.last_error = None;
        if let Some(u) = usage {
            self.usage.prompt_tokens += u.prompt_tokens;
            self.usage.completion_tokens += u.completion_tokens;
            self.usage.total_tokens += u.total_tokens;
        }
        tracing::debug!("Pipeline reached {:?}", self.state);
    }

    fn fail(&mut self, err: &StepError) {
        self.discard_from(err.stage);
        if err.stage.order().is_some() {
            self.state = err.stage.preceding_state();
        }
        self.last_error = Some(err.clone());
        tracing::warn!("{}; pipeline back at {:?}", err, self.state);
    }

    /// Marks the run complete and returns the projection to persist.
    pub fn finish(&mut self, user_id: &str) -> Result<NewReportSummary, StepError> {
        let summary = project_summary(user_id, self.require_analysis(Stage::Summary)?);
        self.state = PipelineState::Done;
        self.last_error = None;
        Ok(summary)
    }
}

fn out_of_order(stage: Stage, missing: Stage) -> StepError {
    StepError::new(stage, StepErrorKind::OutOfOrder { missing })
}

/// Decodes one checkpointed record; a bad record is the caller's fault.
fn resumed<T>(stage: Stage, record: Value) -> Result<T, StepError>
where
    T: DeserializeOwned + JsonSchema,
{
    decode_value(record).map_err(|e| {
        StepError::new(
            stage,
            StepErrorKind::InvalidInput(format!("Submitted {} is invalid: {}", stage.label(), e)),
        )
    })
}

/// No repayment capacity means no loan, whatever the model concluded.
fn force_not_eligible(
    calculation: &EligibilityCalculation,
    assessment: &mut EligibilityAssessment,
) {
    if !calculation.is_eligible() && assessment.status != EligibilityStatus::NotEligible {
        tracing::warn!(
            "Eligibility said {:?} with zero repayment capacity; forcing Not Eligible",
            assessment.status
        );
        assessment.status = EligibilityStatus::NotEligible;
    }
}

fn apply_expected_loss(risk: &mut RiskAssessment) {
    let fr = &mut risk.financial_risk;
    fr.expected_loss = finance::expected_loss(
        fr.probability_of_default,
        fr.loss_given_default,
        fr.exposure_at_default,
    );
}

/// Normalizes uploaded text and rejects what cannot be a document.
pub fn clean_document_text(stage: Stage, raw: &str) -> Result<ExtractedReportText, StepError> {
    let normalized: String = raw
        .replace("\r\n", "\n")
        .chars()
        .filter(|c| *c != '\0')
        .collect();
    let trimmed = normalized.trim();
    let chars = trimmed.chars().count();

    if chars == 0 {
        return Err(StepError::new(
            stage,
            StepErrorKind::Extraction("no text could be extracted from the document".to_string()),
        ));
    }
    if chars < MIN_DOCUMENT_CHARS {
        return Err(StepError::new(
            stage,
            StepErrorKind::Extraction(
                "the document has too little text; it may be scanned or password-protected"
                    .to_string(),
            ),
        ));
    }
    if chars > MAX_DOCUMENT_CHARS {
        return Err(StepError::new(
            stage,
            StepErrorKind::Extraction(format!(
                "the document is too large ({} characters, limit {})",
                chars,
                MAX_DOCUMENT_CHARS
            )),
        ));
    }

    Ok(ExtractedReportText::new_unchecked(trimmed.to_string()))
}

/// Texts submitted for cross-verification.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrossVerificationDocuments {
    pub cibil_report: String,
    #[serde(default)]
    pub bank_statement: Option<String>,
    #[serde(default)]
    pub salary_slips: Vec<String>,
}

/// Every document's result is kept even when others fail.
#[derive(Debug, Clone)]
pub struct CrossVerificationOutcome {
    pub cibil: Result<StepOutput<StructuredAnalysis>, StepError>,
    pub bank_statement: Option<Result<StepOutput<BankStatementAnalysis>, StepError>>,
    pub salary_slips: Vec<Result<StepOutput<SalarySlipAnalysis>, StepError>>,
    pub verification: Result<StepOutput<CrossVerificationResult>, StepError>,
}

/// Runs pipeline steps against an injected model backend.
#[derive(Clone)]
pub struct AnalysisPipeline {
    backend: Arc<dyn ModelBackend>,
}

impl AnalysisPipeline {
    pub fn new(backend: Arc<dyn ModelBackend>) -> Self {
        Self { backend }
    }

    async fn call_structured<T: StructuredOutput>(
        &self,
        stage: Stage,
        system: &str,
        prompt: String,
    ) -> Result<StepOutput<T>, StepError> {
        let request = InferenceRequest::structured(T::NAME, system.to_string(), prompt, T::schema());

        let response = self
            .backend
            .generate(&request)
            .await
            .map_err(|e| StepError::new(stage, e))?;

        let value = decode_structured::<T>(&response.content).map_err(|e| {
            tracing::warn!("{} output rejected: {}", stage.label(), e);
            StepError::new(stage, e)
        })?;

        Ok(StepOutput {
            value,
            usage: response.usage,
        })
    }

    // ============ Linear Steps ============

    /// Idle -> Extracting. Always allowed; starts the run over.
    pub fn extract(
        &self,
        run: &mut PipelineRun,
        raw_text: &str,
    ) -> Result<ExtractedReportText, StepError> {
        let stage = Stage::Extraction;
        match clean_document_text(stage, raw_text) {
            Ok(text) => {
                tracing::info!("Extracted {} characters of report text", text.len());
                run.discard_from(stage);
                run.text = Some(text.clone());
                run.succeed(stage, None);
                Ok(text)
            }
            Err(err) => {
                run.fail(&err);
                Err(err)
            }
        }
    }

    /// Analysis of report text, outside any run.
    pub async fn analyze_text(
        &self,
        text: &ExtractedReportText,
    ) -> Result<StepOutput<StructuredAnalysis>, StepError> {
        self.call_structured(
            Stage::Analysis,
            prompts::ANALYST_SYSTEM,
            prompts::credit_analysis(text.as_str()),
        )
        .await
    }

    /// Extracting -> Analyzing.
    pub async fn analyze(
        &self,
        run: &mut PipelineRun,
    ) -> Result<StepOutput<StructuredAnalysis>, StepError> {
        let stage = Stage::Analysis;
        let text = run.require_text(stage)?.clone();
        tracing::info!("Running {}", stage.label());

        match self.analyze_text(&text).await {
            Ok(out) => {
                run.discard_from(stage);
                run.analysis = Some(out.value.clone());
                run.succeed(stage, out.usage);
                Ok(out)
            }
            Err(err) => {
                run.fail(&err);
                Err(err)
            }
        }
    }

    /// Analyzing -> RiskAssessing. Expected loss is computed locally.
    pub async fn assess_risk(
        &self,
        run: &mut PipelineRun,
    ) -> Result<StepOutput<RiskAssessment>, StepError> {
        let stage = Stage::RiskAssessment;
        let prompt = prompts::risk_assessment(run.require_analysis(stage)?);
        tracing::info!("Running {}", stage.label());

        let result = self
            .call_structured::<RiskAssessment>(stage, prompts::ANALYST_SYSTEM, prompt)
            .await;

        match result {
            Ok(mut out) => {
                apply_expected_loss(&mut out.value);
                run.discard_from(stage);
                run.risk = Some(out.value.clone());
                run.succeed(stage, out.usage);
                Ok(out)
            }
            Err(err) => {
                run.fail(&err);
                Err(err)
            }
        }
    }

    /// RiskAssessing -> Rating.
    pub async fn rate(&self, run: &mut PipelineRun) -> Result<StepOutput<AiRating>, StepError> {
        let stage = Stage::Rating;
        let prompt = prompts::ai_rating(run.require_analysis(stage)?, run.require_risk(stage)?);
        tracing::info!("Running {}", stage.label());

        match self
            .call_structured::<AiRating>(stage, prompts::ANALYST_SYSTEM, prompt)
            .await
        {
            Ok(out) => {
                run.discard_from(stage);
                run.rating = Some(out.value.clone());
                run.succeed(stage, out.usage);
                Ok(out)
            }
            Err(err) => {
                run.fail(&err);
                Err(err)
            }
        }
    }

    /// RiskAssessing -> Eligibility. The amounts are computed locally; the
    /// model only supplies the qualitative assessment.
    pub async fn assess_eligibility(
        &self,
        run: &mut PipelineRun,
        params: &LoanParameters,
    ) -> Result<StepOutput<LoanEligibilityResult>, StepError> {
        let stage = Stage::Eligibility;
        validate_loan_parameters(params)
            .map_err(|msg| StepError::new(stage, StepErrorKind::InvalidInput(msg)))?;

        let analysis = run.require_analysis(stage)?;
        let calculation =
            EligibilityCalculation::compute(params, analysis.emi_summary.total_emi);
        let prompt = prompts::loan_eligibility(
            analysis,
            run.require_risk(stage)?,
            run.rating.as_ref(),
            params,
            &calculation,
        );
        tracing::info!(
            "Running {} (capacity {}, eligible {})",
            stage.label(),
            calculation.repayment_capacity,
            calculation.eligible_loan_amount
        );

        let result = self
            .call_structured::<EligibilityAssessment>(stage, prompts::UNDERWRITER_SYSTEM, prompt)
            .await;

        match result {
            Ok(out) => {
                let mut assessment = out.value;
                force_not_eligible(&calculation, &mut assessment);
                let value = LoanEligibilityResult {
                    calculation,
                    assessment,
                };
                run.discard_from(stage);
                run.eligibility = Some(value.clone());
                run.succeed(stage, out.usage);
                Ok(StepOutput {
                    value,
                    usage: out.usage,
                })
            }
            Err(err) => {
                run.fail(&err);
                Err(err)
            }
        }
    }

    /// RiskAssessing -> Underwriting. Uses the rating and eligibility when the
    /// run holds them.
    pub async fn underwrite(
        &self,
        run: &mut PipelineRun,
        params: &LoanParameters,
    ) -> Result<StepOutput<UnderwritingDecision>, StepError> {
        let stage = Stage::Underwriting;
        validate_loan_parameters(params)
            .map_err(|msg| StepError::new(stage, StepErrorKind::InvalidInput(msg)))?;

        let prompt = prompts::underwriting(
            run.require_analysis(stage)?,
            run.require_risk(stage)?,
            run.rating.as_ref(),
            run.eligibility.as_ref(),
            params,
        );
        let eligible_cap = run
            .eligibility
            .as_ref()
            .map(|e| e.calculation.eligible_loan_amount);
        tracing::info!("Running {}", stage.label());

        let result = self
            .call_structured::<UnderwritingDecision>(stage, prompts::UNDERWRITER_SYSTEM, prompt)
            .await;

        match result {
            Ok(mut out) => {
                enforce_underwriting_limits(&mut out.value, eligible_cap);
                run.underwriting = Some(out.value.clone());
                run.succeed(stage, out.usage);
                Ok(out)
            }
            Err(err) => {
                run.fail(&err);
                Err(err)
            }
        }
    }

    /// Analysis, risk assessment and, when parameters are given, eligibility,
    /// in order. Stops at the first failure; the run keeps what succeeded.
    pub async fn run_through(
        &self,
        run: &mut PipelineRun,
        params: Option<&LoanParameters>,
    ) -> Result<(), StepError> {
        self.analyze(run).await?;
        self.assess_risk(run).await?;
        if let Some(params) = params {
            self.assess_eligibility(run, params).await?;
        }
        Ok(())
    }

    // ============ Supporting Documents ============

    async fn analyze_bank_statement(
        &self,
        raw: &str,
    ) -> Result<StepOutput<BankStatementAnalysis>, StepError> {
        let stage = Stage::DocumentAnalysis;
        let text = clean_document_text(stage, raw)?;
        self.call_structured(
            stage,
            prompts::ANALYST_SYSTEM,
            prompts::supporting_document(DocumentKind::BankStatement, text.as_str()),
        )
        .await
    }

    async fn analyze_salary_slip(
        &self,
        raw: &str,
    ) -> Result<StepOutput<SalarySlipAnalysis>, StepError> {
        let stage = Stage::DocumentAnalysis;
        let text = clean_document_text(stage, raw)?;
        self.call_structured(
            stage,
            prompts::ANALYST_SYSTEM,
            prompts::supporting_document(DocumentKind::SalarySlip, text.as_str()),
        )
        .await
    }

    /// Analyzes one bank statement or salary slip.
    pub async fn analyze_document(
        &self,
        kind: DocumentKind,
        raw: &str,
    ) -> Result<StepOutput<DocumentAnalysis>, StepError> {
        tracing::info!("Analyzing supporting document: {:?}", kind);
        match kind {
            DocumentKind::BankStatement => {
                let out = self.analyze_bank_statement(raw).await?;
                Ok(StepOutput {
                    value: DocumentAnalysis::BankStatement(out.value),
                    usage: out.usage,
                })
            }
            DocumentKind::SalarySlip => {
                let out = self.analyze_salary_slip(raw).await?;
                Ok(StepOutput {
                    value: DocumentAnalysis::SalarySlip(out.value),
                    usage: out.usage,
                })
            }
        }
    }

    /// Analyzes every document concurrently, then merges them in one more call.
    ///
    /// The join waits for all documents. Failed documents are reported next
    /// to the successful ones; the merge runs when the CIBIL report and at
    /// least one supporting document were analyzed. When the CIBIL report
    /// failed, the verification carries that same error.
    pub async fn cross_verify(
        &self,
        documents: &CrossVerificationDocuments,
    ) -> CrossVerificationOutcome {
        let stage = Stage::CrossVerification;
        tracing::info!(
            "Cross-verifying CIBIL report with {} bank statement(s) and {} salary slip(s)",
            usize::from(documents.bank_statement.is_some()),
            documents.salary_slips.len()
        );

        let cibil_fut = async {
            let text = clean_document_text(Stage::Analysis, &documents.cibil_report)?;
            self.analyze_text(&text).await
        };
        let bank_fut = async {
            match documents.bank_statement.as_deref() {
                Some(raw) => Some(self.analyze_bank_statement(raw).await),
                None => None,
            }
        };
        let slips_fut = join_all(
            documents
                .salary_slips
                .iter()
                .map(|raw| self.analyze_salary_slip(raw)),
        );

        let (cibil, bank_statement, salary_slips) = tokio::join!(cibil_fut, bank_fut, slips_fut);

        let bank_ok = bank_statement
            .as_ref()
            .and_then(|r| r.as_ref().ok())
            .map(|out| &out.value);
        let slips_ok: Vec<&SalarySlipAnalysis> = salary_slips
            .iter()
            .filter_map(|r| r.as_ref().ok())
            .map(|out| &out.value)
            .collect();

        let failures = usize::from(cibil.is_err())
            + usize::from(matches!(bank_statement, Some(Err(_))))
            + salary_slips.iter().filter(|r| r.is_err()).count();
        if failures > 0 {
            tracing::warn!("{} document analysis call(s) failed", failures);
        }

        let verification = match &cibil {
            // The report's own failure is the reason there is nothing to merge
            Err(err) => Err(err.clone()),
            Ok(_) if bank_ok.is_none() && slips_ok.is_empty() => {
                Err(out_of_order(stage, Stage::DocumentAnalysis))
            }
            Ok(cibil_out) => {
                let prompt = prompts::cross_verification(&cibil_out.value, bank_ok, &slips_ok);
                self.call_structured::<CrossVerificationResult>(
                    stage,
                    prompts::UNDERWRITER_SYSTEM,
                    prompt,
                )
                .await
            }
        };

        CrossVerificationOutcome {
            cibil,
            bank_statement,
            salary_slips,
            verification,
        }
    }

    // ============ Chat ============

    /// Free-text answer about a report.
    pub async fn chat(
        &self,
        message: &str,
        history: &[ChatTurn],
        context: Option<&StructuredAnalysis>,
    ) -> Result<StepOutput<String>, StepError> {
        let stage = Stage::Chat;
        let message = message.trim();
        if message.is_empty() {
            return Err(StepError::new(
                stage,
                StepErrorKind::InvalidInput("Message cannot be empty".to_string()),
            ));
        }

        let mut messages = prompts::trim_history(history, MAX_CHAT_HISTORY).to_vec();
        messages.push(ChatTurn {
            role: ChatRole::User,
            content: message.to_string(),
        });

        let request = InferenceRequest {
            task: "report_chat".to_string(),
            system: prompts::chat_system(context),
            messages,
            response_schema: None,
            temperature: 0.5,
        };

        let response = self
            .backend
            .generate(&request)
            .await
            .map_err(|e| StepError::new(stage, e))?;

        Ok(StepOutput {
            value: response.content.trim().to_string(),
            usage: response.usage,
        })
    }
}

/// Keeps an underwriting decision consistent with hard limits.
fn enforce_underwriting_limits(decision: &mut UnderwritingDecision, eligible_cap: Option<f64>) {
    if decision.decision == Decision::Declined && decision.approved_amount != 0.0 {
        tracing::warn!(
            "Declined decision carried approved amount {}; zeroing",
            decision.approved_amount
        );
        decision.approved_amount = 0.0;
    }
    if let Some(cap) = eligible_cap {
        if decision.approved_amount > cap {
            tracing::warn!(
                "Approved amount {} exceeds eligible amount {}; capping",
                decision.approved_amount,
                cap
            );
            decision.approved_amount = cap;
        }
    }
}
