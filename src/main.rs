use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use storyloom::{
    config::Config,
    media::FsMediaStore,
    providers::ProviderRouter,
    rate_limit::SlidingWindowLimiter,
    server::{AppState, RpcServer},
    storage::SqliteStorage,
};

/// Storyloom generation service
#[derive(Debug, Parser)]
#[command(name = "storyloom", version, about)]
struct Cli {
    /// Override the database path from configuration
    #[arg(long)]
    database: Option<PathBuf>,

    /// Override the log level from configuration
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let mut config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };
    if let Some(database) = cli.database {
        config.database.path = database;
    }
    if let Some(log_level) = cli.log_level {
        config.logging.level = log_level;
    }

    // Initialize logging
    init_logging(&config);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "Storyloom generation service starting..."
    );

    // Initialize storage
    let storage = match SqliteStorage::new(&config.database).await {
        Ok(s) => {
            info!(path = %config.database.path.display(), "Database initialized");
            s
        }
        Err(e) => {
            error!(error = %e, "Failed to initialize database");
            return Err(e.into());
        }
    };

    // Initialize provider router (validates the routing table)
    let router = match ProviderRouter::from_config(&config) {
        Ok(r) => {
            info!(
                text_primary = %config.generation.text.primary,
                image_primary = %config.generation.image.primary,
                narration_primary = %config.generation.narration.primary,
                "Provider router initialized"
            );
            r
        }
        Err(e) => {
            error!(error = %e, "Failed to initialize provider router");
            return Err(e.into());
        }
    };

    let media = Arc::new(FsMediaStore::new(&config.media));
    let limiter = Arc::new(SlidingWindowLimiter::new(config.rate_limit));

    // Create application state
    let state = Arc::new(AppState::new(config, storage, router, media, limiter));

    // Start RPC server
    let server = RpcServer::new(state);

    info!("Server ready, waiting for requests on stdin...");

    if let Err(e) = server.run().await {
        error!(error = %e, "Server error");
        return Err(e.into());
    }

    info!("Server shutdown complete");
    Ok(())
}

/// Initialize tracing/logging
fn init_logging(config: &Config) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    match config.logging.format {
        storyloom::config::LogFormat::Json => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        storyloom::config::LogFormat::Pretty => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}
