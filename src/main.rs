use anyhow::Result;
use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{info, warn};

mod config;
mod dashboard;
mod db;
mod docstore;
mod error;
mod model;
mod pipeline;
mod scoring;
mod sources;

use config::{Command, Config};
use dashboard::AppState;
use db::Database;
use docstore::DocumentStore;
use model::{ArtifactStore, Trainer};
use pipeline::ingest::Ingestor;
use scoring::{RiskScoringService, ServiceState};
use sources::{
    FileWellnessSource, HttpWellnessSource, RawSources, WellnessSource, MEDICAL_FILE,
    TELEMETRY_FILE, WELLNESS_FILE,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialise tracing / logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = Config::parse();
    config.validate()?;

    match config.command {
        Command::Simulate => simulate(&config).await,
        Command::Ingest => ingest(&config).await,
        Command::Train => train(&config).await,
        Command::Run => {
            ingest(&config).await?;
            train(&config).await
        }
        Command::Serve => serve(&config).await,
    }
}

async fn simulate(config: &Config) -> Result<()> {
    let sim = config.simulation();
    let dir = config.raw_data_dir.clone();
    tokio::task::spawn_blocking(move || pipeline::simulate::generate(&sim, &dir)).await??;
    Ok(())
}

fn open_database(config: &Config) -> Result<Database> {
    let db = Database::open(&config.database_path)?;
    info!("Database opened: {}", config.database_path);
    Ok(db)
}

async fn ingest(config: &Config) -> Result<()> {
    let db = open_database(config)?;
    let documents = DocumentStore::open(&config.document_store_dir)?;

    let wellness: Arc<dyn WellnessSource> = match &config.wellness_api_url {
        Some(url) => Arc::new(HttpWellnessSource::new(url)?),
        None => Arc::new(FileWellnessSource::new(config.raw_data_dir.join(WELLNESS_FILE))),
    };
    let sources = RawSources::new(
        config.raw_data_dir.join(TELEMETRY_FILE),
        config.raw_data_dir.join(MEDICAL_FILE),
        wellness,
    );

    Ingestor::new(sources, db, documents, config.ingest())
        .run()
        .await?;
    Ok(())
}

async fn train(config: &Config) -> Result<()> {
    let db = open_database(config)?;
    let trainer = Trainer::new(db, ArtifactStore::new(&config.artifact_dir), config.train()?);
    let (_, path) = tokio::task::spawn_blocking(move || trainer.run()).await??;
    info!("New model published at {}", path.display());
    Ok(())
}

async fn serve(config: &Config) -> Result<()> {
    let scoring = RiskScoringService::start(&ArtifactStore::new(&config.artifact_dir));
    if let ServiceState::Unloaded { reason } = scoring.state() {
        warn!("Starting without a model, /predict will answer 503: {}", reason);
    }

    let app = dashboard::router(AppState {
        scoring: Arc::new(scoring),
    });
    let addr: SocketAddr = config.scoring_addr.parse()?;
    info!("Scoring service listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    // Run scoring server (blocks until shutdown)
    axum::serve(listener, app).await?;

    Ok(())
}
