use clap::Parser;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use genoserve::{
    Config,
    formats::Backends,
    handlers::{AppState, create_router},
    query::QueryEngine,
    registry::RegistryStore,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::parse();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // The catalog is loaded once; the server never writes to it.
    let registry = Arc::new(RegistryStore::open(&config.repo_dir)?);
    let engine = QueryEngine::load(registry.clone(), Backends::noodles(), config.query_config()).await?;
    let state = AppState {
        engine: Arc::new(engine),
    };

    let app = create_router(state).layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()));
    let app = if config.cors {
        app.layer(CorsLayer::permissive())
    } else {
        app
    };

    let addr = format!("{}:{}", config.host, config.port);
    tracing::info!("Starting genoserve on {}", addr);
    tracing::info!(
        "Repository: {:?} ({} objects)",
        config.repo_dir,
        registry.entries().len()
    );

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
