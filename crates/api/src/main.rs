//! Herald API server binary entrypoint.

use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use herald_common::config::AppConfig;
use herald_common::db::{create_pool, migrate};

use herald_api::routes::create_router;
use herald_api::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(
                "herald_api=debug,herald_notifier=debug,herald_content=debug,tower_http=debug",
            )
        }))
        .init();

    tracing::info!("Starting Herald API server...");

    // Load configuration
    let config = AppConfig::from_env()?;
    tracing::info!(
        whatsapp_enabled = config.whatsapp_enabled,
        media_root = %config.media_root.display(),
        "Configuration loaded"
    );

    // Create database connection pool
    let pool = create_pool(&config.database_url, config.db_max_connections).await?;
    migrate(&pool).await?;

    std::fs::create_dir_all(&config.media_root)?;
    let media = ServeDir::new(&config.media_root);
    // Extracted archives are served here when MEDIA_URL is a local path
    let media_prefix = config
        .media_url
        .starts_with('/')
        .then(|| format!("/{}", config.media_url.trim_matches('/')))
        .filter(|prefix| prefix.len() > 1);
    let bind_addr = config.bind_addr.clone();

    // Build application state
    let state = AppState::new(pool, config);

    // Build router
    let mut app = create_router(state);
    if let Some(prefix) = media_prefix {
        app = app.nest_service(&prefix, media);
    }
    let app = app
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    // Start server
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!("API server listening on {}", listener.local_addr()?);

    axum::serve(listener, app).await?;

    Ok(())
}
