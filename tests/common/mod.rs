//! Shared fixtures: a scripted in-process model backend and canned replies.
#![allow(dead_code)]

use async_trait::async_trait;
use credit_report_api::model_client::{
    InferenceRequest, InferenceResponse, ModelBackend, ModelCallError,
};
use credit_report_api::models::TokenUsage;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Mutex;

pub const CHAT_TASK: &str = "report_chat";

/// Answers each task with a fixed reply and records every request.
#[derive(Default)]
pub struct ScriptedBackend {
    replies: Mutex<HashMap<String, Result<String, ModelCallError>>>,
    requests: Mutex<Vec<InferenceRequest>>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply(self, task: &str, body: Value) -> Self {
        self.reply_text(task, &body.to_string())
    }

    pub fn reply_text(self, task: &str, content: &str) -> Self {
        self.replies
            .lock()
            .unwrap()
            .insert(task.to_string(), Ok(content.to_string()));
        self
    }

    pub fn fail(self, task: &str, err: ModelCallError) -> Self {
        self.replies
            .lock()
            .unwrap()
            .insert(task.to_string(), Err(err));
        self
    }

    /// Replaces one task's reply on a backend already handed out.
    pub fn set_reply(&self, task: &str, body: Value) {
        self.replies
            .lock()
            .unwrap()
            .insert(task.to_string(), Ok(body.to_string()));
    }

    pub fn calls(&self, task: &str) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.task == task)
            .count()
    }

    pub fn total_calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn last_request(&self, task: &str) -> Option<InferenceRequest> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|r| r.task == task)
            .cloned()
    }
}

#[async_trait]
impl ModelBackend for ScriptedBackend {
    async fn generate(
        &self,
        request: &InferenceRequest,
    ) -> Result<InferenceResponse, ModelCallError> {
        self.requests.lock().unwrap().push(request.clone());
        let reply = self
            .replies
            .lock()
            .unwrap()
            .get(&request.task)
            .cloned()
            .unwrap_or_else(|| panic!("no scripted reply for task '{}'", request.task));

        reply.map(|content| InferenceResponse {
            content,
            usage: Some(TokenUsage {
                prompt_tokens: 100,
                completion_tokens: 20,
                total_tokens: 120,
            }),
        })
    }
}

pub fn report_text() -> String {
    "CIBIL TRANSUNION SCORE 782\nNAME: ASHA RAO  PAN: ABCPR1234K  MOBILE: 9876543210\n\
     ACCOUNT 1: HDFC BANK HOME LOAN ACTIVE SANCTIONED 2500000 BALANCE 1800000 EMI 15000\n\
     ACCOUNT 2: ICICI BANK PERSONAL LOAN ACTIVE SANCTIONED 300000 BALANCE 120000 EMI 5000\n"
        .to_string()
}

pub fn analysis_json(total_emi: f64) -> Value {
    json!({
        "customerDetails": {
            "name": "Asha Rao",
            "pan": "ABCPR1234K",
            "mobileNumber": "9876543210",
            "email": null,
            "dateOfBirth": "14-02-1988",
            "gender": "Female",
            "address": "12 MG Road, Bengaluru"
        },
        "cibilScore": 782,
        "accounts": [
            {
                "lender": "HDFC Bank",
                "accountType": "Home Loan",
                "ownership": "Individual",
                "status": "Active",
                "sanctionedAmount": 2500000,
                "currentBalance": 1800000,
                "overdueAmount": 0,
                "emiAmount": 15000,
                "dateOpened": "01-04-2019"
            },
            {
                "lender": "ICICI Bank",
                "accountType": "Personal Loan",
                "ownership": "Individual",
                "status": "Active",
                "sanctionedAmount": 300000,
                "currentBalance": 120000,
                "overdueAmount": 0,
                "emiAmount": 5000,
                "dateOpened": "15-08-2022"
            }
        ],
        "emiSummary": { "totalEmi": total_emi, "activeLoanCount": 2 },
        "creditSummary": {
            "totalAccounts": 2,
            "activeAccounts": 2,
            "closedAccounts": 0,
            "totalSanctioned": 2800000,
            "totalOutstanding": 1920000,
            "totalOverdue": 0,
            "recentEnquiries": 1
        }
    })
}

pub fn risk_json() -> Value {
    json!({
        "riskScore": 22,
        "riskLevel": "Low",
        "factors": [
            { "factor": "Payment history", "severity": "Low", "details": "No missed payments in 36 months" }
        ],
        "financialRisk": {
            "probabilityOfDefault": 10,
            "lossGivenDefault": 50,
            "exposureAtDefault": 600000,
            "expectedLoss": 999999
        },
        "summary": "Low risk borrower with a clean repayment record."
    })
}

pub fn rating_json() -> Value {
    json!({
        "grade": "AA",
        "score": 84,
        "outlook": "Stable",
        "strengths": ["Clean repayment history"],
        "weaknesses": ["Concentrated secured exposure"],
        "summary": "Strong profile."
    })
}

pub fn eligibility_json(status: &str) -> Value {
    json!({
        "status": status,
        "keyFactors": ["Existing EMI burden is moderate"],
        "recommendations": ["Keep utilisation below 30%"],
        "summary": "Assessment complete."
    })
}

pub fn underwriting_json(decision: &str, amount: f64) -> Value {
    json!({
        "decision": decision,
        "approvedAmount": amount,
        "interestRate": 11.5,
        "tenureMonths": 48,
        "conditions": ["Latest 3 months salary slips"],
        "reasons": ["Repayment capacity supports the amount"],
        "summary": "Decision recorded."
    })
}

pub fn bank_statement_json() -> Value {
    json!({
        "accountHolder": "Asha Rao",
        "bankName": "HDFC Bank",
        "averageMonthlyBalance": 85000,
        "averageMonthlyCredit": 102000,
        "monthlySalaryCredit": 98000,
        "emiDebitsTotal": 20000,
        "bouncedTransactions": 0,
        "summary": "Regular salary credits, no bounces."
    })
}

pub fn salary_slip_json() -> Value {
    json!({
        "employeeName": "Asha Rao",
        "employer": "Acme Software Pvt Ltd",
        "pan": "ABCPR1234K",
        "payPeriod": "March 2024",
        "grossSalary": 125000,
        "netSalary": 98000,
        "totalDeductions": 27000
    })
}

pub fn cross_verification_json() -> Value {
    json!({
        "overallStatus": "Verified",
        "consistencyScore": 92,
        "checks": [
            {
                "field": "Name",
                "cibilValue": "Asha Rao",
                "bankValue": "Asha Rao",
                "salaryValue": "Asha Rao",
                "status": "Match",
                "note": null
            }
        ],
        "redFlags": [],
        "summary": "Documents agree."
    })
}

pub fn supporting_text(label: &str) -> String {
    format!(
        "{} FOR ASHA RAO, ACME SOFTWARE PVT LTD, MARCH 2024, NET PAY 98000, GROSS 125000",
        label
    )
}
