//! Deterministic credit arithmetic.
//!
//! Every other number the service returns is authored by the model; the
//! formulas here are the only ones computed locally, so they are the only
//! ones the service can vouch for.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::models::LoanParameters;

/// Monthly rate as a fraction, from an annual percentage.
fn monthly_rate(annual_rate_pct: f64) -> f64 {
    annual_rate_pct.max(0.0) / 12.0 / 100.0
}

/// Expected Loss = PD% × LGD% × EAD, rounded to whole currency units.
///
/// PD and LGD are clamped to `[0, 100]` and EAD to `>= 0`, so the result is
/// never negative.
pub fn expected_loss(probability_of_default: f64, loss_given_default: f64, exposure: f64) -> f64 {
    let pd = probability_of_default.clamp(0.0, 100.0) / 100.0;
    let lgd = loss_given_default.clamp(0.0, 100.0) / 100.0;
    let ead = exposure.max(0.0);
    (pd * lgd * ead).round()
}

/// Largest EMI total the income can carry at the given DTI percentage.
pub fn max_allowable_emi(monthly_income: f64, dti_ratio: f64) -> f64 {
    monthly_income * dti_ratio / 100.0
}

/// Headroom left for a new EMI after existing obligations. Never negative.
pub fn repayment_capacity(monthly_income: f64, dti_ratio: f64, total_emi: f64) -> f64 {
    (max_allowable_emi(monthly_income, dti_ratio) - total_emi).max(0.0)
}

/// Principal that a given EMI amortizes over `tenure_months`.
///
/// `P = EMI × [(1 − (1+r)^−n) / r]`, with `r` the monthly rate. A zero rate
/// degenerates to `EMI × n`.
pub fn principal_from_emi(emi: f64, annual_rate_pct: f64, tenure_months: u32) -> f64 {
    if emi <= 0.0 || tenure_months == 0 {
        return 0.0;
    }
    let n = tenure_months as f64;
    let r = monthly_rate(annual_rate_pct);
    if r == 0.0 {
        return emi * n;
    }
    emi * (1.0 - (1.0 + r).powf(-n)) / r
}

/// Standard EMI for a principal: `P·r·(1+r)^n / ((1+r)^n − 1)`.
pub fn emi_for_principal(principal: f64, annual_rate_pct: f64, tenure_months: u32) -> f64 {
    if principal <= 0.0 || tenure_months == 0 {
        return 0.0;
    }
    let n = tenure_months as f64;
    let r = monthly_rate(annual_rate_pct);
    if r == 0.0 {
        return principal / n;
    }
    let growth = (1.0 + r).powf(n);
    principal * r * growth / (growth - 1.0)
}

/// Existing EMIs as a percentage of income.
pub fn dti_ratio(monthly_income: f64, total_emi: f64) -> f64 {
    if monthly_income <= 0.0 {
        return 0.0;
    }
    total_emi.max(0.0) / monthly_income * 100.0
}

/// Fixed Obligation to Income Ratio: DTI plus rent and other fixed outgoings.
pub fn foir(monthly_income: f64, total_emi: f64, other_obligations: f64) -> f64 {
    if monthly_income <= 0.0 {
        return 0.0;
    }
    (total_emi.max(0.0) + other_obligations.max(0.0)) / monthly_income * 100.0
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

/// Locally computed half of a loan eligibility result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct EligibilityCalculation {
    pub monthly_income: f64,
    pub existing_emi: f64,
    pub max_allowable_emi: f64,
    pub repayment_capacity: f64,
    pub eligible_loan_amount: f64,
    /// EMI the eligible amount would carry at the requested rate and tenure.
    pub eligible_emi: f64,
    pub current_dti: f64,
    pub foir: f64,
    pub tenure_months: u32,
    pub annual_interest_rate: f64,
}

impl EligibilityCalculation {
    pub fn compute(params: &LoanParameters, total_emi: f64) -> Self {
        // Zero reported capacity must mean zero eligibility, so round first
        let capacity =
            repayment_capacity(params.monthly_income, params.dti_ratio, total_emi).round();

        let eligible_loan_amount = if capacity <= 0.0 {
            0.0
        } else {
            principal_from_emi(capacity, params.annual_interest_rate, params.tenure_months).round()
        };

        let eligible_emi = emi_for_principal(
            eligible_loan_amount,
            params.annual_interest_rate,
            params.tenure_months,
        );

        Self {
            monthly_income: params.monthly_income,
            existing_emi: total_emi,
            max_allowable_emi: max_allowable_emi(params.monthly_income, params.dti_ratio).round(),
            repayment_capacity: capacity,
            eligible_loan_amount,
            eligible_emi: eligible_emi.round(),
            current_dti: round_to(dti_ratio(params.monthly_income, total_emi), 2),
            foir: round_to(
                foir(params.monthly_income, total_emi, params.other_obligations),
                2,
            ),
            tenure_months: params.tenure_months,
            annual_interest_rate: params.annual_interest_rate,
        }
    }

    pub fn is_eligible(&self) -> bool {
        self.eligible_loan_amount > 0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(income: f64, rate: f64, tenure: u32) -> LoanParameters {
        LoanParameters {
            monthly_income: income,
            desired_loan_amount: None,
            tenure_months: tenure,
            annual_interest_rate: rate,
            dti_ratio: 50.0,
            other_obligations: 0.0,
        }
    }

    #[test]
    fn test_expected_loss_rounds_to_currency_unit() {
        // 2.5% × 45% × 1,000,000 = 11,250
        assert_eq!(expected_loss(2.5, 45.0, 1_000_000.0), 11_250.0);
        // 3.3% × 40% × 12,345 = 162.954 -> 163
        assert_eq!(expected_loss(3.3, 40.0, 12_345.0), 163.0);
    }

    #[test]
    fn test_expected_loss_clamps_out_of_range_inputs() {
        assert_eq!(expected_loss(-5.0, 50.0, 1000.0), 0.0);
        assert_eq!(expected_loss(150.0, 100.0, 1000.0), 1000.0);
        assert_eq!(expected_loss(10.0, 10.0, -1000.0), 0.0);
    }

    #[test]
    fn test_repayment_capacity_never_negative() {
        assert_eq!(repayment_capacity(100_000.0, 50.0, 20_000.0), 30_000.0);
        assert_eq!(repayment_capacity(40_000.0, 50.0, 25_000.0), 0.0);
    }

    #[test]
    fn test_reference_scenario() {
        let calc = EligibilityCalculation::compute(&params(100_000.0, 12.0, 48), 20_000.0);
        assert_eq!(calc.max_allowable_emi, 50_000.0);
        assert_eq!(calc.repayment_capacity, 30_000.0);
        assert!(
            (calc.eligible_loan_amount - 1_139_000.0).abs() < 1_000.0,
            "got {}",
            calc.eligible_loan_amount
        );
        assert_eq!(calc.current_dti, 20.0);
        assert!((calc.eligible_emi - 30_000.0).abs() <= 1.0);
    }

    #[test]
    fn test_zero_capacity_forces_zero_eligibility() {
        let calc = EligibilityCalculation::compute(&params(30_000.0, 9.0, 240), 15_000.0);
        assert_eq!(calc.repayment_capacity, 0.0);
        assert_eq!(calc.eligible_loan_amount, 0.0);
        assert_eq!(calc.eligible_emi, 0.0);
        assert!(!calc.is_eligible());
    }

    #[test]
    fn test_sub_unit_capacity_rounds_to_no_eligibility() {
        // 50,000 allowance - 49,999.6 existing = 0.4, reported as 0
        let calc = EligibilityCalculation::compute(&params(100_000.0, 12.0, 48), 49_999.6);
        assert_eq!(calc.repayment_capacity, 0.0);
        assert_eq!(calc.eligible_loan_amount, 0.0);
        assert!(!calc.is_eligible());

        // 0.6 rounds up to 1 and still buys a (tiny) loan
        let calc = EligibilityCalculation::compute(&params(100_000.0, 12.0, 48), 49_999.4);
        assert_eq!(calc.repayment_capacity, 1.0);
        assert!(calc.is_eligible());
    }

    #[test]
    fn test_zero_rate_is_linear() {
        assert_eq!(principal_from_emi(1_000.0, 0.0, 12), 12_000.0);
        assert_eq!(emi_for_principal(12_000.0, 0.0, 12), 1_000.0);
    }

    #[test]
    fn test_zero_tenure() {
        assert_eq!(principal_from_emi(1_000.0, 10.0, 0), 0.0);
        assert_eq!(emi_for_principal(1_000.0, 10.0, 0), 0.0);
    }

    #[test]
    fn test_foir_includes_other_obligations() {
        assert_eq!(foir(100_000.0, 20_000.0, 15_000.0), 35.0);
        assert_eq!(dti_ratio(100_000.0, 20_000.0), 20.0);
        assert_eq!(foir(0.0, 20_000.0, 15_000.0), 0.0);
    }
}
