use credit_report_api::api::{self, RateLimit};
use credit_report_api::config::Config;
use credit_report_api::db::Database;
use credit_report_api::handlers::AppState;
use credit_report_api::identity::{self, IdentityClient};
use credit_report_api::model_client::HttpModelClient;
use credit_report_api::pipeline::AnalysisPipeline;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Main entry point for the application.
///
/// This function initializes the application, including:
/// - Logging and tracing.
/// - Configuration loading.
/// - Database connection.
/// - Model and identity clients.
/// - HTTP routes and middleware (CORS, body limit, rate limiting).
///
/// It then starts the Axum server.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "credit_report_api=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::from_env()?;
    tracing::info!("Configuration loaded successfully");

    // Initialize database connection pool
    let db = Database::new(&config.database_url).await?;
    tracing::info!("Database connection pool established");

    let model_client = HttpModelClient::from_config(&config)?;
    tracing::info!(
        "✓ Model client initialized: {} ({})",
        model_client.endpoint(),
        config.model_name
    );

    let identity_client = IdentityClient::from_config(&config)?;
    let session_cache = identity::session_cache(config.session_cache_ttl_secs);
    tracing::info!(
        "Session cache initialized ({}s TTL)",
        config.session_cache_ttl_secs
    );

    // Build application state
    let app_state = Arc::new(AppState {
        db: db.pool.clone(),
        config: config.clone(),
        pipeline: AnalysisPipeline::new(Arc::new(model_client)),
        identity: identity_client,
        session_cache,
    });

    let app = api::router(
        app_state,
        Some(RateLimit {
            per_second: config.rate_limit_per_second,
            burst: config.rate_limit_burst,
        }),
    )?;

    // Start server
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
