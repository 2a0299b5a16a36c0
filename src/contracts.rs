//! Response contracts for each model step.
//!
//! The JSON shape of every record comes from its `JsonSchema` derive in
//! `models`; this module only names each contract.

use crate::models::*;
use crate::schema::StructuredOutput;

impl StructuredOutput for StructuredAnalysis {
    const NAME: &'static str = "credit_report_analysis";
}

impl StructuredOutput for RiskAssessment {
    const NAME: &'static str = "risk_assessment";
}

impl StructuredOutput for AiRating {
    const NAME: &'static str = "ai_credit_rating";
}

impl StructuredOutput for EligibilityAssessment {
    const NAME: &'static str = "loan_eligibility";
}

impl StructuredOutput for UnderwritingDecision {
    const NAME: &'static str = "underwriting_decision";
}

impl StructuredOutput for BankStatementAnalysis {
    const NAME: &'static str = "bank_statement_analysis";
}

impl StructuredOutput for SalarySlipAnalysis {
    const NAME: &'static str = "salary_slip_analysis";
}

impl StructuredOutput for CrossVerificationResult {
    const NAME: &'static str = "cross_verification";
}
