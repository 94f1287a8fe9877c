use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use pantry::api::{self, AppState};
use pantry::db::{DbHandle, PantryDb};

#[derive(Parser)]
#[command(name = "pantry")]
#[command(version, about = "Grocery inventory microservice")]
struct Cli {
    #[arg(long, default_value = "8001")]
    port: u16,

    /// Path to the SQLite database file
    #[arg(long, default_value = "pantry.db")]
    db: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let db = PantryDb::new(&cli.db)?;
    let state = Arc::new(AppState {
        db: DbHandle::new(db),
    });
    let app = api::api_router().with_state(state);

    let addr = format!("127.0.0.1:{}", cli.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;
    tracing::info!(addr = %listener.local_addr()?, db = %cli.db.display(), "Pantry listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;
    Ok(())
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install Ctrl+C handler");
    tracing::info!("Shutting down...");
}
