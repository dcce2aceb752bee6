//! The coral server binary.

use coral_api::{router, AppState};
use coral_core::DatabaseId;
use coral_storage::{Database, EngineConfig, StorageEngine};
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let data_directory = std::env::var("CORAL_DATA_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("coral-data"));
    let engine = StorageEngine::open(EngineConfig {
        data_directory,
        ..Default::default()
    })?;
    let database = Database::new(engine, DatabaseId::new(1), "_system");
    let state = AppState::new(database);

    let addr: SocketAddr = std::env::var("CORAL_BIND")
        .unwrap_or_else(|_| "0.0.0.0:8529".to_string())
        .parse()?;
    tracing::info!(%addr, "coral listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router(state)).await?;
    Ok(())
}
