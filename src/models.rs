use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::finance::EligibilityCalculation;

// ============ Pipeline Records ============

/// Plain text pulled out of an uploaded credit report.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ExtractedReportText(String);

impl ExtractedReportText {
    /// Wraps already-trimmed text. Callers go through the extraction step,
    /// which rejects empty input.
    pub(crate) fn new_unchecked(text: String) -> Self {
        Self(text)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Identity block of a CIBIL report.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CustomerDetails {
    pub name: String,
    #[serde(default)]
    pub pan: Option<String>,
    #[serde(default)]
    pub mobile_number: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub date_of_birth: Option<String>,
    #[serde(default)]
    pub gender: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
}

/// Reported state of a tradeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum AccountStatus {
    Active,
    Closed,
    #[serde(rename = "Written Off")]
    WrittenOff,
    Settled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CreditAccount {
    pub lender: String,
    pub account_type: String,
    #[serde(default)]
    pub ownership: Option<String>,
    pub status: AccountStatus,
    #[schemars(range(min = 0))]
    pub sanctioned_amount: f64,
    #[schemars(range(min = 0))]
    pub current_balance: f64,
    #[serde(default)]
    #[schemars(range(min = 0))]
    pub overdue_amount: f64,
    #[serde(default)]
    #[schemars(range(min = 0))]
    pub emi_amount: f64,
    #[serde(default)]
    pub date_opened: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct EmiSummary {
    #[schemars(range(min = 0))]
    pub total_emi: f64,
    pub active_loan_count: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CreditSummary {
    pub total_accounts: u32,
    pub active_accounts: u32,
    pub closed_accounts: u32,
    #[schemars(range(min = 0))]
    pub total_sanctioned: f64,
    #[schemars(range(min = 0))]
    pub total_outstanding: f64,
    #[schemars(range(min = 0))]
    pub total_overdue: f64,
    #[serde(default)]
    pub recent_enquiries: u32,
}

/// Output of the first analysis step. Read-only input to every later step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct StructuredAnalysis {
    pub customer_details: CustomerDetails,
    /// `None` when the bureau reports no score (new-to-credit).
    #[serde(default)]
    #[schemars(range(min = 300, max = 900))]
    pub cibil_score: Option<i32>,
    pub accounts: Vec<CreditAccount>,
    pub emi_summary: EmiSummary,
    pub credit_summary: CreditSummary,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    #[serde(rename = "Very High")]
    VeryHigh,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum Severity {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RiskFactor {
    pub factor: String,
    pub severity: Severity,
    pub details: String,
}

/// PD and LGD are percentages; EAD and EL are currency amounts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct FinancialRisk {
    #[schemars(range(min = 0, max = 100))]
    pub probability_of_default: f64,
    #[schemars(range(min = 0, max = 100))]
    pub loss_given_default: f64,
    #[schemars(range(min = 0))]
    pub exposure_at_default: f64,
    /// Always recomputed locally; whatever the model sends is discarded.
    #[serde(default)]
    pub expected_loss: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RiskAssessment {
    #[schemars(range(max = 100))]
    pub risk_score: u8,
    pub risk_level: RiskLevel,
    #[schemars(length(min = 1))]
    pub factors: Vec<RiskFactor>,
    pub financial_risk: FinancialRisk,
    pub summary: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum RatingGrade {
    #[serde(rename = "AAA")]
    Aaa,
    #[serde(rename = "AA")]
    Aa,
    A,
    #[serde(rename = "BBB")]
    Bbb,
    #[serde(rename = "BB")]
    Bb,
    B,
    C,
    D,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum Outlook {
    Positive,
    Stable,
    Negative,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct AiRating {
    pub grade: RatingGrade,
    #[schemars(range(max = 100))]
    pub score: u8,
    pub outlook: Outlook,
    pub strengths: Vec<String>,
    pub weaknesses: Vec<String>,
    pub summary: String,
}

fn default_dti_ratio() -> f64 {
    50.0
}

/// User-supplied scalars for the eligibility and underwriting steps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoanParameters {
    pub monthly_income: f64,
    #[serde(default)]
    pub desired_loan_amount: Option<f64>,
    pub tenure_months: u32,
    pub annual_interest_rate: f64,
    /// Share of income that may go to EMIs, in percent.
    #[serde(default = "default_dti_ratio")]
    pub dti_ratio: f64,
    /// Rent and other fixed monthly outgoings, counted in FOIR only.
    #[serde(default)]
    pub other_obligations: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum EligibilityStatus {
    Eligible,
    #[serde(rename = "Partially Eligible")]
    PartiallyEligible,
    #[serde(rename = "Not Eligible")]
    NotEligible,
}

/// The model-authored half of an eligibility result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct EligibilityAssessment {
    pub status: EligibilityStatus,
    pub key_factors: Vec<String>,
    pub recommendations: Vec<String>,
    pub summary: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct LoanEligibilityResult {
    pub calculation: EligibilityCalculation,
    pub assessment: EligibilityAssessment,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum Decision {
    Approved,
    #[serde(rename = "Conditionally Approved")]
    ConditionallyApproved,
    Declined,
    #[serde(rename = "Refer to Underwriter")]
    ReferToUnderwriter,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct UnderwritingDecision {
    pub decision: Decision,
    #[schemars(range(min = 0))]
    pub approved_amount: f64,
    #[schemars(range(min = 0, max = 60))]
    pub interest_rate: f64,
    #[schemars(range(max = 480))]
    pub tenure_months: u32,
    pub conditions: Vec<String>,
    pub reasons: Vec<String>,
    pub summary: String,
}

// ============ Supporting Documents ============

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    BankStatement,
    SalarySlip,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct BankStatementAnalysis {
    pub account_holder: String,
    #[serde(default)]
    pub bank_name: Option<String>,
    /// Can be negative on an overdrawn account.
    pub average_monthly_balance: f64,
    #[schemars(range(min = 0))]
    pub average_monthly_credit: f64,
    #[serde(default)]
    #[schemars(range(min = 0))]
    pub monthly_salary_credit: Option<f64>,
    #[schemars(range(min = 0))]
    pub emi_debits_total: f64,
    pub bounced_transactions: u32,
    pub summary: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SalarySlipAnalysis {
    pub employee_name: String,
    #[serde(default)]
    pub employer: Option<String>,
    #[serde(default)]
    pub pan: Option<String>,
    #[serde(default)]
    pub pay_period: Option<String>,
    #[schemars(range(min = 0))]
    pub gross_salary: f64,
    #[schemars(range(min = 0))]
    pub net_salary: f64,
    #[serde(default)]
    #[schemars(range(min = 0))]
    pub total_deductions: f64,
}

/// Result of analyzing one supporting document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "analysis", rename_all = "snake_case")]
pub enum DocumentAnalysis {
    BankStatement(BankStatementAnalysis),
    SalarySlip(SalarySlipAnalysis),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum CheckStatus {
    Match,
    Mismatch,
    Unavailable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum VerificationStatus {
    Verified,
    #[serde(rename = "Minor Discrepancies")]
    MinorDiscrepancies,
    #[serde(rename = "Major Discrepancies")]
    MajorDiscrepancies,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct VerificationCheck {
    pub field: String,
    #[serde(default)]
    pub cibil_value: Option<String>,
    #[serde(default)]
    pub bank_value: Option<String>,
    #[serde(default)]
    pub salary_value: Option<String>,
    pub status: CheckStatus,
    #[serde(default)]
    pub note: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CrossVerificationResult {
    pub overall_status: VerificationStatus,
    #[schemars(range(max = 100))]
    pub consistency_score: u8,
    pub checks: Vec<VerificationCheck>,
    pub red_flags: Vec<String>,
    pub summary: String,
}

// ============ Model Boundary ============

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: ChatRole,
    pub content: String,
}

// ============ Database Models ============

/// Persisted projection of a completed analysis. Append-only.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportSummary {
    pub id: Uuid,
    pub user_id: String,
    pub name: String,
    pub pan: Option<String>,
    pub mobile_number: Option<String>,
    pub cibil_score: Option<i32>,
    pub total_emi: f64,
    pub active_loan_count: i32,
    pub created_at: DateTime<Utc>,
}

/// Row about to be written; `id` is assigned by storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewReportSummary {
    pub user_id: String,
    pub name: String,
    pub pan: Option<String>,
    pub mobile_number: Option<String>,
    pub cibil_score: Option<i32>,
    pub total_emi: f64,
    pub active_loan_count: i32,
    pub created_at: DateTime<Utc>,
}
