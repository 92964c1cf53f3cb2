//! Volplane Server - storage control plane
//!
//! Serves the HTTP API, or exports and imports the database offline.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use volplane_executor::backend;
use volplane_server::{App, recover, router, settings};
use volplane_store::{DbDump, EntryStore};

#[derive(Parser, Debug)]
#[command(name = "volplane-server")]
#[command(about = "Volplane storage control plane")]
#[command(version)]
struct Args {
    /// Configuration file path
    #[arg(short, long, env = "VOLPLANE_CONFIG")]
    config: Option<PathBuf>,

    /// Database path (overrides the configuration)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Log level (overrides the configuration)
    #[arg(long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the HTTP API (default)
    Serve {
        /// Listen address (overrides the configuration)
        #[arg(short, long)]
        listen: Option<SocketAddr>,
    },
    /// Offline database maintenance
    Db {
        #[command(subcommand)]
        command: DbCommand,
    },
}

#[derive(Subcommand, Debug)]
enum DbCommand {
    /// Write every entry to a JSON file
    Export {
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Load a JSON export into a new database
    Import {
        #[arg(short, long)]
        input: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    let mut config = settings::load_config(args.config.as_deref())
        .context("failed to load configuration")?;
    if let Some(db) = args.db {
        config.server.db_path = db;
    }
    if let Some(level) = args.log_level {
        config.server.log_level = level;
    }

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.server.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    match args.command {
        Some(Command::Db {
            command: DbCommand::Export { output },
        }) => {
            let store = EntryStore::open(&config.server.db_path)?;
            let dump = store.export()?;
            dump.write_json(&output)?;
            info!(
                "Exported {} to {}",
                config.server.db_path.display(),
                output.display()
            );
            Ok(())
        }
        Some(Command::Db {
            command: DbCommand::Import { input },
        }) => {
            if config.server.db_path.exists() {
                anyhow::bail!(
                    "refusing to import into existing database {}",
                    config.server.db_path.display()
                );
            }
            let dump = DbDump::read_json(&input)?;
            let store = EntryStore::open(&config.server.db_path)?;
            store.import(&dump)?;
            info!(
                "Imported {} into {}",
                input.display(),
                config.server.db_path.display()
            );
            Ok(())
        }
        Some(Command::Serve { listen }) => {
            if let Some(listen) = listen {
                config.server.listen = listen;
            }
            serve(config).await
        }
        None => serve(config).await,
    }
}

async fn serve(config: volplane_common::Config) -> Result<()> {
    info!("Starting Volplane server");
    info!("Database: {}", config.server.db_path.display());

    if let Some(parent) = config.server.db_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let store = EntryStore::open(&config.server.db_path)?;
    let transport = backend::from_config(&config.executor).await?;
    let listen = config.server.listen;
    let auto_recover = config.server.auto_recover;
    let app = App::new(config, store, transport);

    if auto_recover {
        let report = recover(&app).await?;
        info!(
            "Recovery: {} completed, {} rolled back, {} quarantined",
            report.completed.len(),
            report.rolled_back.len(),
            report.quarantined.len()
        );
    } else {
        warn!("Startup recovery disabled; pending operations stay in place");
    }

    let listener = TcpListener::bind(listen).await?;
    info!("HTTP API listening on {}", listen);

    axum::serve(listener, router(app).into_make_service())
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            info!("Shutting down...");
        })
        .await?;

    Ok(())
}
