use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use kyc_relay::config::{Config, DEFAULT_DB_PATH};
use kyc_relay::server;
use kyc_relay::store::ClientStore;

#[derive(Parser)]
#[command(name = "kyc-relay")]
#[command(version, about = "Identity-verification session relay")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP service
    Serve {
        /// Listening port (overrides PORT)
        #[arg(short, long)]
        port: Option<u16>,

        /// SQLite database path (overrides DATABASE_PATH)
        #[arg(long)]
        db_path: Option<PathBuf>,
    },
    /// Create the database and run migrations without serving
    InitDb {
        /// SQLite database path (overrides DATABASE_PATH)
        #[arg(long)]
        db_path: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "kyc_relay=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Serve { port, db_path } => {
            let mut config = Config::from_env()?;
            if let Some(port) = port {
                config.port = port;
            }
            if let Some(db_path) = db_path {
                config.db_path = db_path;
            }
            server::start_server(config).await
        }
        Commands::InitDb { db_path } => {
            let path = db_path
                .or_else(|| std::env::var("DATABASE_PATH").ok().map(PathBuf::from))
                .unwrap_or_else(|| PathBuf::from(DEFAULT_DB_PATH));
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)
                        .context("Failed to create database directory")?;
                }
            }
            ClientStore::new(&path).context("Failed to initialize client store")?;
            println!("Database ready at {}", path.display());
            Ok(())
        }
    }
}
