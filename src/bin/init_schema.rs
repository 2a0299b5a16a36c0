//! Creates the `report_summaries` table and its index if they are missing.

use dotenvy::dotenv;
use sqlx::postgres::PgPoolOptions;
use std::env;

const STATEMENTS: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS report_summaries (
        id                UUID PRIMARY KEY DEFAULT gen_random_uuid(),
        user_id           TEXT NOT NULL,
        name              TEXT NOT NULL,
        pan               TEXT,
        mobile_number     TEXT,
        cibil_score       INTEGER CHECK (cibil_score IS NULL OR cibil_score BETWEEN 300 AND 900),
        total_emi         NUMERIC(14, 2) NOT NULL DEFAULT 0,
        active_loan_count INTEGER NOT NULL DEFAULT 0,
        created_at        TIMESTAMPTZ NOT NULL DEFAULT now()
    )
    "#,
    "CREATE INDEX IF NOT EXISTS report_summaries_user_id_idx ON report_summaries (user_id)",
];

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    tracing_subscriber::fmt::init();

    let database_url = env::var("DATABASE_URL")
        .or_else(|_| env::var("DB_URL"))
        .map_err(|_| anyhow::anyhow!("DATABASE_URL or DB_URL environment variable required"))?;
    let pool = PgPoolOptions::new()
        .max_connections(1)
        .connect(&database_url)
        .await?;

    for statement in STATEMENTS {
        sqlx::query(statement).execute(&pool).await?;
    }

    tracing::info!("✓ report_summaries schema is in place");
    Ok(())
}
