use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use sge_api::config::ServerConfig;
use sge_api::db::SgeDb;
use sge_api::server;

#[derive(Parser)]
#[command(name = "sge-api")]
#[command(version, about = "Placement management API for a school placement program")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP API server
    Serve {
        #[arg(long)]
        port: Option<u16>,

        /// Path to the SQLite database file
        #[arg(long)]
        db: Option<PathBuf>,

        /// Bind on all interfaces with permissive CORS (frontend development)
        #[arg(long)]
        dev: bool,

        /// Path to a TOML config file (defaults to ./sge.toml when present)
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Create the schema and load demo reference data plus a demo session token
    Seed {
        /// Path to the SQLite database file
        #[arg(long)]
        db: Option<PathBuf>,

        /// Path to a TOML config file (defaults to ./sge.toml when present)
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Serve {
            port,
            db,
            dev,
            config,
        } => {
            let mut config = ServerConfig::load(config.as_deref())?;
            if let Some(port) = port {
                config.port = port;
            }
            if let Some(db) = db {
                config.db_path = db;
            }
            config.dev_mode = dev;
            server::start_server(config).await
        }
        Commands::Seed { db, config } => {
            let mut config = ServerConfig::load(config.as_deref())?;
            if let Some(db) = db {
                config.db_path = db;
            }
            let db = SgeDb::new(&config.db_path)?;
            let token = db.seed_demo_data()?;
            tracing::info!(db = %config.db_path.display(), "Demo data loaded");
            println!("Demo session token: {token}");
            Ok(())
        }
    }
}
