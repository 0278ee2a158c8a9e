use std::sync::Arc;

use anyhow::Context;
use clap::Parser;

use quire::app::{build_router, AppState};
use quire::config::AppConfig;
use quire::db::allocator::SlugAllocator;
use quire::db::repository::{DocumentRepository, MongoDocumentRepository};

#[derive(Debug, Parser)]
#[command(name = "quire", about = "Draft lifecycle and publication service")]
struct Cli {
    /// Optional configuration file; `QUIRE_*` environment variables override it.
    #[arg(short, long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "quire=info,tower_http=info".into()),
        )
        .init();

    let cli = Cli::parse();
    let config = AppConfig::load(cli.config.as_deref())?;

    tracing::info!("Starting Quire server...");

    // Connect to MongoDB
    let mongo_client = mongodb::Client::with_uri_str(&config.database.uri)
        .await
        .context("Failed to connect to MongoDB")?;
    let mongo_db = mongo_client.database(&config.database.name);

    let mongo_repo = MongoDocumentRepository::new(&mongo_db);
    mongo_repo.ensure_indexes().await?;
    let document_repo: Arc<dyn DocumentRepository> = Arc::new(mongo_repo);

    tracing::info!(database = %config.database.name, "Connected to MongoDB");

    let state = AppState::new(document_repo, SlugAllocator::new(&config.allocator));
    let app = build_router(state);

    tracing::info!("Listening on http://{}", config.server.bind_addr);
    let listener = tokio::net::TcpListener::bind(&config.server.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.server.bind_addr))?;
    axum::serve(listener, app).await?;

    Ok(())
}
