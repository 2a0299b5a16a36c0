//! Input and identity-field validation.
//!
//! PAN and mobile numbers come out of model responses, so they are checked
//! before they are persisted. Loan parameters come from the user and are
//! checked before any model call is made.

use phonenumber::country::Id as CountryId;
use phonenumber::Mode;
use regex::Regex;
use std::sync::OnceLock;

use crate::models::LoanParameters;

fn pan_regex() -> &'static Regex {
    static PAN: OnceLock<Regex> = OnceLock::new();
    // Five letters, four digits, one letter. The fourth letter encodes the
    // holder type (P = individual) but every type is accepted here.
    PAN.get_or_init(|| Regex::new(r"^[A-Z]{5}[0-9]{4}[A-Z]$").expect("PAN regex is valid"))
}

/// Uppercases and strips spaces/hyphens, then checks the PAN format.
///
/// Returns the normalized PAN, or `None` when it is not a valid PAN.
pub fn normalize_pan(raw: &str) -> Option<String> {
    let cleaned: String = raw
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '-')
        .collect::<String>()
        .to_uppercase();

    if pan_regex().is_match(&cleaned) {
        Some(cleaned)
    } else {
        tracing::warn!("Invalid PAN format: {}", raw);
        None
    }
}

pub fn is_valid_pan(raw: &str) -> bool {
    pan_regex().is_match(raw)
}

/// Validate and normalize an Indian mobile number.
///
/// Uses phonenumber library (port of Google's libphonenumber) to parse with
/// the IN region and return E.164 (`+919876543210`).
///
/// Returns: (is_valid, normalized_phone_or_error_msg)
pub fn validate_in_mobile(raw: &str) -> (bool, String) {
    let digits = raw.chars().filter(|c| c.is_ascii_digit()).count();
    if raw.trim().is_empty() || digits < 10 {
        return (false, "Phone too short".to_string());
    }

    match phonenumber::parse(Some(CountryId::IN), raw) {
        Ok(number) => {
            if phonenumber::is_valid(&number) {
                let formatted = number.format().mode(Mode::E164).to_string();
                tracing::debug!("Valid IN phone: {} -> {}", raw, formatted);
                (true, formatted)
            } else {
                tracing::warn!("Invalid IN phone number: {}", raw);
                (false, "Invalid Indian phone number".to_string())
            }
        }
        Err(e) => {
            tracing::warn!("Failed to parse IN phone '{}': {:?}", raw, e);
            (false, format!("Parse error: {:?}", e))
        }
    }
}

/// Range checks for user-supplied loan parameters.
pub fn validate_loan_parameters(params: &LoanParameters) -> Result<(), String> {
    if !params.monthly_income.is_finite() || params.monthly_income <= 0.0 {
        return Err("Monthly income must be greater than zero".to_string());
    }
    if params.tenure_months == 0 || params.tenure_months > 480 {
        return Err("Tenure must be between 1 and 480 months".to_string());
    }
    if !params.annual_interest_rate.is_finite()
        || !(0.0..=60.0).contains(&params.annual_interest_rate)
    {
        return Err("Annual interest rate must be between 0% and 60%".to_string());
    }
    if !params.dti_ratio.is_finite() || !(0.0..=100.0).contains(&params.dti_ratio) {
        return Err("DTI ratio must be between 0% and 100%".to_string());
    }
    if !params.other_obligations.is_finite() || params.other_obligations < 0.0 {
        return Err("Other obligations cannot be negative".to_string());
    }
    if let Some(desired) = params.desired_loan_amount {
        if !desired.is_finite() || desired < 0.0 {
            return Err("Desired loan amount cannot be negative".to_string());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_pan() {
        assert_eq!(normalize_pan("abcpe1234f"), Some("ABCPE1234F".to_string()));
        assert_eq!(normalize_pan(" ABCPE 1234-F "), Some("ABCPE1234F".to_string()));
        assert_eq!(normalize_pan("ABCPE12345"), None);
        assert_eq!(normalize_pan(""), None);
        assert!(is_valid_pan("ABCPE1234F"));
        assert!(!is_valid_pan("abcpe1234f"));
    }

    #[test]
    fn test_loan_parameter_ranges() {
        let mut params = LoanParameters {
            monthly_income: 100_000.0,
            desired_loan_amount: Some(500_000.0),
            tenure_months: 48,
            annual_interest_rate: 12.0,
            dti_ratio: 50.0,
            other_obligations: 0.0,
        };
        assert!(validate_loan_parameters(&params).is_ok());

        params.tenure_months = 0;
        assert!(validate_loan_parameters(&params).is_err());
        params.tenure_months = 48;

        params.dti_ratio = 120.0;
        assert!(validate_loan_parameters(&params).is_err());
        params.dti_ratio = 50.0;

        params.monthly_income = f64::NAN;
        assert!(validate_loan_parameters(&params).is_err());
    }
}
