use crate::errors::{AppError, ResultExt};
use crate::models::{NewReportSummary, ReportSummary, StructuredAnalysis};
use crate::validation::{normalize_pan, validate_in_mobile};
use bigdecimal::BigDecimal;
use chrono::Utc;
use sqlx::PgPool;
use std::str::FromStr;

const SUMMARY_COLUMNS: &str = "id, user_id, name, pan, mobile_number, cibil_score, \
    total_emi::float8 AS total_emi, active_loan_count, created_at";

/// Builds the row persisted for a finished analysis.
///
/// PAN is kept only when it is well-formed. A mobile number that parses as
/// Indian is stored in E.164, anything else is stored as printed.
pub fn project_summary(user_id: &str, analysis: &StructuredAnalysis) -> NewReportSummary {
    let details = &analysis.customer_details;

    let pan = details.pan.as_deref().and_then(normalize_pan);

    let mobile_number = details
        .mobile_number
        .as_deref()
        .map(str::trim)
        .filter(|m| !m.is_empty())
        .map(|raw| match validate_in_mobile(raw) {
            (true, e164) => e164,
            (false, _) => raw.to_string(),
        });

    NewReportSummary {
        user_id: user_id.to_string(),
        name: details.name.trim().to_string(),
        pan,
        mobile_number,
        cibil_score: analysis.cibil_score,
        total_emi: analysis.emi_summary.total_emi,
        active_loan_count: i32::try_from(analysis.emi_summary.active_loan_count)
            .unwrap_or(i32::MAX),
        created_at: Utc::now(),
    }
}

/// Append-only store for report summaries.
pub struct SummaryStorage {
    pool: PgPool,
}

impl SummaryStorage {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Inserts a new summary row. Rows are never updated in place.
    pub async fn insert(&self, summary: &NewReportSummary) -> Result<ReportSummary, AppError> {
        if !summary.total_emi.is_finite() || summary.total_emi < 0.0 {
            return Err(AppError::BadRequest(format!(
                "Invalid total EMI: {}",
                summary.total_emi
            )));
        }
        let total_emi = BigDecimal::from_str(&format!("{:.2}", summary.total_emi))
            .map_err(|e| AppError::BadRequest(format!("Invalid total EMI: {}", e)))?;

        let sql = format!(
            r#"
            INSERT INTO report_summaries (
                user_id, name, pan, mobile_number, cibil_score,
                total_emi, active_loan_count, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING {}
            "#,
            SUMMARY_COLUMNS
        );

        let row = sqlx::query_as::<_, ReportSummary>(&sql)
            .bind(&summary.user_id)
            .bind(&summary.name)
            .bind(&summary.pan)
            .bind(&summary.mobile_number)
            .bind(summary.cibil_score)
            .bind(total_emi)
            .bind(summary.active_loan_count)
            .bind(summary.created_at)
            .fetch_one(&self.pool)
            .await
            .context("Failed to insert report summary")?;

        tracing::info!(
            "✓ Stored report summary {} for user {} (score: {:?})",
            row.id,
            row.user_id,
            row.cibil_score
        );

        Ok(row)
    }

    /// All summaries for a user, newest first.
    pub async fn list_for_user(&self, user_id: &str) -> Result<Vec<ReportSummary>, AppError> {
        let sql = format!(
            "SELECT {} FROM report_summaries WHERE user_id = $1",
            SUMMARY_COLUMNS
        );

        let mut rows = sqlx::query_as::<_, ReportSummary>(&sql)
            .bind(user_id)
            .fetch_all(&self.pool)
            .await
            .with_context(|| format!("Failed to list report summaries for {}", user_id))?;

        sort_newest_first(&mut rows);
        Ok(rows)
    }
}

fn sort_newest_first(rows: &mut [ReportSummary]) {
    rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
}
