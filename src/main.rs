mod api;
mod config;
mod domain;
mod infrastructure;

/// Returns the NewsFlux user agent string with the current version
///
/// Format: "NewsFlux/X.Y.Z"
///
/// The version is read from Cargo.toml at compile time, ensuring it's
/// always in sync with the package version.
pub fn user_agent() -> String {
    format!("NewsFlux/{}", env!("CARGO_PKG_VERSION"))
}

use api::feeds::AppState;
use axum::{response::Redirect, routing::get, Router};
use config::Config;
use infrastructure::database::setup_database;
use infrastructure::supervisor::Supervisor;
use tower_http::{compression::CompressionLayer, trace::TraceLayer};

async fn index() -> Redirect {
    Redirect::to("/feeds/global")
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to install shutdown handler: {}", error);
    }
    tracing::info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    // Default to info level in production; use RUST_LOG env var to override
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "newsflux=info,tower_http=info".into()),
        )
        .init();

    // Load configuration
    let config = Config::from_env()?;

    // Setup database
    tracing::info!("Connecting to database: {}", config.database_url);
    let db_pool = setup_database(&config.database_url).await?;

    // Run migrations
    tracing::info!("Running database migrations");
    sqlx::migrate!().run(&db_pool).await?;
    tracing::info!("Migrations complete");

    // Create shared application state
    let state = AppState {
        db_pool: db_pool.clone(),
    };

    // Start the ingestion and maintenance workers
    tracing::info!("Starting worker supervisor");
    let supervisor = Supervisor::start(db_pool.clone(), &config)?;

    // Build router
    let app = Router::new()
        .route("/", get(index))
        .route("/health", get(api::health::check))
        .route("/feeds/global", get(api::feeds::global_feed))
        .route("/users/:user_id/feed", get(api::feeds::personalised_feed))
        .route(
            "/xrpc/app.bsky.feed.getFeedSkeleton",
            get(api::skeleton::get_feed_skeleton),
        )
        .route(
            "/xrpc/app.bsky.feed.describeFeedGenerator",
            get(api::skeleton::describe_feed_generator),
        )
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    // Start server
    let bind_addr = format!("{}:{}", config.host, config.port);
    tracing::info!("NewsFlux server listening on http://{}", bind_addr);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Drain the workers before exiting
    supervisor.shutdown().await;

    Ok(())
}
