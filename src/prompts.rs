//! Instruction templates for each model step.
//!
//! The decisions a step makes live in these instructions; the response
//! shape lives in `contracts`. Upstream records are interpolated as JSON so
//! the model reads exactly what the previous step produced.

use serde::Serialize;

use crate::finance::EligibilityCalculation;
use crate::models::{
    AiRating, ChatTurn, DocumentKind, LoanEligibilityResult, LoanParameters, RiskAssessment,
    StructuredAnalysis,
};

pub const ANALYST_SYSTEM: &str = "You are a senior credit analyst at an Indian lender. \
You read TransUnion CIBIL reports, bank statements and salary slips. \
Amounts are in Indian Rupees. Answer only with JSON that matches the requested schema. \
Never invent values: use null for anything the document does not state.";

pub const UNDERWRITER_SYSTEM: &str = "You are a retail-lending underwriter at an Indian bank. \
You apply RBI-aligned prudential norms and explain every decision in plain language. \
Answer only with JSON that matches the requested schema.";

pub const CHAT_SYSTEM: &str = "You are a helpful credit advisor. Answer questions about the \
user's credit report clearly and briefly. If the report does not contain the answer, say so. \
Do not give legal advice.";

/// Pretty JSON for interpolation; falls back to `{}` so a prompt is always built.
fn as_json<T: Serialize>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| "{}".to_string())
}

pub fn credit_analysis(report_text: &str) -> String {
    format!(
        r#"Extract a structured analysis from the CIBIL credit report below.

Rules:
- customerDetails: copy name, PAN, mobile number, email, date of birth, gender and the latest address exactly as printed.
- cibilScore: the CIBIL TransUnion score (300-900). Use null when the report shows "NH", "-1" or no score.
- accounts: one entry per tradeline. status is one of Active, Closed, Written Off, Settled. Use 0 for amounts that are not printed.
- emiSummary.totalEmi: sum of EMIs of Active accounts only. activeLoanCount: number of Active accounts.
- creditSummary: counts and totals across all accounts; recentEnquiries counts enquiries in the last 6 months.

CIBIL REPORT TEXT:
"""
{}
""""#,
        report_text
    )
}

pub fn risk_assessment(analysis: &StructuredAnalysis) -> String {
    format!(
        r#"Assess the credit risk of this borrower from the structured analysis below.

Rules:
- riskScore: 0 (no risk) to 100 (certain default).
- riskLevel: Low (0-25), Medium (26-50), High (51-75), Very High (76-100). It must agree with riskScore.
- factors: the main drivers (payment history, overdues, utilisation, enquiries, credit mix, written-off or settled accounts), each with a severity of Low, Medium or High.
- financialRisk: probabilityOfDefault and lossGivenDefault as percentages (0-100); exposureAtDefault as the total outstanding amount in rupees. Do not compute expected loss.
- summary: two or three sentences.

STRUCTURED ANALYSIS:
{}"#,
        as_json(analysis)
    )
}

pub fn ai_rating(analysis: &StructuredAnalysis, risk: &RiskAssessment) -> String {
    format!(
        r#"Assign an internal credit rating to this borrower.

Rules:
- grade: AAA, AA, A, BBB, BB, B, C or D, where AAA is the strongest.
- score: 0-100, higher is better; it must be consistent with the grade.
- outlook: Positive, Stable or Negative, based on recent behaviour.
- strengths and weaknesses: short bullet phrases.

STRUCTURED ANALYSIS:
{}

RISK ASSESSMENT:
{}"#,
        as_json(analysis),
        as_json(risk)
    )
}

pub fn loan_eligibility(
    analysis: &StructuredAnalysis,
    risk: &RiskAssessment,
    rating: Option<&AiRating>,
    params: &LoanParameters,
    calculation: &EligibilityCalculation,
) -> String {
    let rating_block = rating
        .map(|r| format!("\n\nAI RATING:\n{}", as_json(r)))
        .unwrap_or_default();

    format!(
        r#"Assess loan eligibility for this applicant.

The numbers in CALCULATION are computed exactly and are final; do not recompute or contradict them.
Rules:
- status: Eligible when the eligible amount covers the desired amount, Partially Eligible when it covers part of it, Not Eligible when the eligible amount is 0 or the risk profile rules out lending.
- keyFactors: what drove the outcome.
- recommendations: concrete steps that would improve eligibility.

APPLICANT PARAMETERS:
{}

CALCULATION:
{}

STRUCTURED ANALYSIS:
{}

RISK ASSESSMENT:
{}{}"#,
        as_json(params),
        as_json(calculation),
        as_json(analysis),
        as_json(risk),
        rating_block
    )
}

pub fn underwriting(
    analysis: &StructuredAnalysis,
    risk: &RiskAssessment,
    rating: Option<&AiRating>,
    eligibility: Option<&LoanEligibilityResult>,
    params: &LoanParameters,
) -> String {
    let rating_block = rating
        .map(|r| format!("\n\nAI RATING:\n{}", as_json(r)))
        .unwrap_or_default();
    let eligibility_block = eligibility
        .map(|e| format!("\n\nLOAN ELIGIBILITY:\n{}", as_json(e)))
        .unwrap_or_default();

    format!(
        r#"Make an underwriting decision for the requested loan.

Rules:
- decision: Approved, Conditionally Approved, Declined or Refer to Underwriter.
- approvedAmount: 0 when Declined; never above the eligible loan amount when one is given.
- interestRate: annual percentage you would price this loan at.
- tenureMonths: the tenure you approve.
- conditions: pre-disbursal conditions (documents, co-applicant, closure of existing loans).
- reasons: the reasons behind the decision.

APPLICANT PARAMETERS:
{}

STRUCTURED ANALYSIS:
{}

RISK ASSESSMENT:
{}{}{}"#,
        as_json(params),
        as_json(analysis),
        as_json(risk),
        rating_block,
        eligibility_block
    )
}

pub fn supporting_document(kind: DocumentKind, text: &str) -> String {
    let instructions = match kind {
        DocumentKind::BankStatement => {
            "Extract a summary of this bank statement. averageMonthlyBalance and averageMonthlyCredit \
are averages over the statement period. monthlySalaryCredit is the recurring salary credit, or null \
when none is visible. emiDebitsTotal is the monthly total of loan EMI debits. bouncedTransactions \
counts cheque or ECS/NACH returns."
        }
        DocumentKind::SalarySlip => {
            "Extract the figures from this salary slip. grossSalary and netSalary are monthly amounts; \
totalDeductions is gross minus net when not printed."
        }
    };

    format!(
        "{}\n\nDOCUMENT TEXT:\n\"\"\"\n{}\n\"\"\"",
        instructions, text
    )
}

pub fn cross_verification(
    cibil: &StructuredAnalysis,
    bank: Option<&impl Serialize>,
    salary_slips: &[impl Serialize],
) -> String {
    let bank_block = bank
        .map(as_json)
        .unwrap_or_else(|| "not provided".to_string());
    let slips_block = if salary_slips.is_empty() {
        "not provided".to_string()
    } else {
        as_json(&salary_slips)
    };

    format!(
        r#"Cross-verify the applicant's documents against each other.

Check at least: name, PAN, monthly income (salary slip net pay vs bank salary credit), and EMI obligations (CIBIL total EMI vs bank EMI debits).
Rules:
- checks[].status: Match, Mismatch, or Unavailable when a document does not carry the field.
- overallStatus: Verified, Minor Discrepancies or Major Discrepancies.
- consistencyScore: 0-100, higher means more consistent.
- redFlags: signs of tampering or undisclosed obligations.

CIBIL ANALYSIS:
{}

BANK STATEMENT ANALYSIS:
{}

SALARY SLIP ANALYSES:
{}"#,
        as_json(cibil),
        bank_block,
        slips_block
    )
}

/// System prompt for report chat, with the analysis attached when available.
pub fn chat_system(context: Option<&StructuredAnalysis>) -> String {
    match context {
        Some(analysis) => format!(
            "{}\n\nThe user's credit report analysis:\n{}",
            CHAT_SYSTEM,
            as_json(analysis)
        ),
        None => CHAT_SYSTEM.to_string(),
    }
}

/// Caps history so a long conversation cannot crowd out the report.
pub fn trim_history(history: &[ChatTurn], max_turns: usize) -> &[ChatTurn] {
    let start = history.len().saturating_sub(max_turns);
    &history[start..]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ChatRole;

    #[test]
    fn test_credit_analysis_embeds_report() {
        let prompt = credit_analysis("SCORE 782");
        assert!(prompt.contains("SCORE 782"));
        assert!(prompt.contains("cibilScore"));
    }

    #[test]
    fn test_trim_history_keeps_latest_turns() {
        let history: Vec<ChatTurn> = (0..5)
            .map(|i| ChatTurn {
                role: ChatRole::User,
                content: i.to_string(),
            })
            .collect();
        let trimmed = trim_history(&history, 2);
        assert_eq!(trimmed.len(), 2);
        assert_eq!(trimmed[0].content, "3");
        assert_eq!(trim_history(&history, 10).len(), 5);
    }
}
