use chrono::{Duration, Utc};
use std::env;
use uuid::Uuid;

use credit_report_api::db::Database;
use credit_report_api::db_storage::SummaryStorage;
use credit_report_api::models::NewReportSummary;

/// Integration smoke test for summary storage against a real Postgres.
/// Marked ignored to avoid running against production by accident; set TEST_DATABASE_URL to run
/// (after `cargo run --bin init_schema` against the same database).
#[tokio::test]
#[ignore]
async fn insert_and_list_summaries_smoke_test() -> anyhow::Result<()> {
    let db_url = env::var("TEST_DATABASE_URL")
        .or_else(|_| env::var("DATABASE_URL"))
        .map_err(|_| anyhow::anyhow!("Set TEST_DATABASE_URL or DATABASE_URL to run this test"))?;

    let db = Database::new(&db_url).await?;
    let storage = SummaryStorage::new(db.pool.clone());

    // Unique user so repeated runs do not see each other's rows
    let user_id = format!("test-user-{}", Uuid::new_v4());
    let now = Utc::now();

    let older = NewReportSummary {
        user_id: user_id.clone(),
        name: "Asha Rao".to_string(),
        pan: Some("ABCPR1234K".to_string()),
        mobile_number: Some("+919876543210".to_string()),
        cibil_score: Some(782),
        total_emi: 20_000.5,
        active_loan_count: 2,
        created_at: now - Duration::days(1),
    };
    let newer = NewReportSummary {
        cibil_score: None,
        total_emi: 0.0,
        active_loan_count: 0,
        created_at: now,
        ..older.clone()
    };

    let first = storage.insert(&older).await?;
    let second = storage.insert(&newer).await?;
    assert_ne!(first.id, second.id);
    assert_eq!(first.total_emi, 20_000.5);

    let rows = storage.list_for_user(&user_id).await?;
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].id, second.id, "newest first");
    assert_eq!(rows[1].cibil_score, Some(782));

    let none = storage.list_for_user("nobody-with-this-id").await?;
    assert!(none.is_empty());
    Ok(())
}
