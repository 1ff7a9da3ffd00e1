//! protofleet agent - main entry point

use anyhow::Result;
use clap::{Parser, Subcommand};
use protofleet_agent::sync::{Fetcher, Uploader};
use protofleet_agent::ws::client::WsConnector;
use protofleet_agent::{utils, Config, PullMultiplexer, SchemaClient};
use protofleet_core::{Ledger, Manifest};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Pull the manifest once and exit
    Pull,
    /// Pull, then keep applying pushed updates until interrupted
    Watch,
    /// Fetch a single artifact into the local ledger
    Fetch {
        path: String,
        /// Transfer even when the local copy is current
        #[arg(long)]
        force: bool,
    },
    /// Check a local artifact against the server
    Verify { path: String },
    /// Upload local changes to the server
    Upload,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration
    let config = match &args.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };

    // Initialize logging
    let log_level = args.log_level.as_deref().unwrap_or(&config.log.level);
    utils::logger::init(log_level)?;

    tracing::info!("Starting protofleet-agent v{}", env!("CARGO_PKG_VERSION"));

    let ledger = Arc::new(Ledger::with_extension(
        &config.ledger.root,
        config.ledger.extension.clone(),
    ));
    ledger.bootstrap().await?;
    let client = SchemaClient::new(&config.server.url)?;

    match args.command {
        Command::Pull => {
            let mux = multiplexer(&config, ledger.clone());
            let manifest = load_manifest(&config, &ledger).await?;
            mux.pull(&manifest, config.watch.batch_size).await?;
            tracing::info!("Pulled {} artifact(s)", manifest.len());
            mux.close();
        }
        Command::Watch => watch(&config, ledger).await?,
        Command::Fetch { path, force } => {
            let entry = Fetcher::new(ledger, client).fetch(&path, force).await?;
            println!("{}:{}", entry.path, entry.digest);
        }
        Command::Verify { path } => {
            let digest = ledger.digest_of(&path).await?;
            let matches = client.verify(&path, &digest).await?;
            println!("{}: {}", path, if matches { "match" } else { "mismatch" });
        }
        Command::Upload => {
            let summary = Uploader::new(ledger, client).upload().await?;
            println!(
                "uploaded {} ({} updated, {} skipped)",
                summary.success, summary.update, summary.skipped
            );
            for (path, message) in &summary.errors {
                eprintln!("{}: {}", path, message);
            }
        }
    }

    Ok(())
}

fn multiplexer(config: &Config, ledger: Arc<Ledger>) -> PullMultiplexer {
    let connector = Arc::new(WsConnector::new(config.watch_url()));
    PullMultiplexer::new(connector, ledger, config.watch.strict)
}

/// The configured manifest file, or every artifact of the local ledger.
async fn load_manifest(config: &Config, ledger: &Ledger) -> Result<Manifest> {
    match &config.watch.manifest {
        Some(path) => {
            let text = tokio::fs::read_to_string(path).await?;
            Ok(Manifest::parse(&text))
        }
        None => Ok(ledger.manifest().await),
    }
}

/// Keep the stream open, re-pulling with backoff whenever it drops.
async fn watch(config: &Config, ledger: Arc<Ledger>) -> Result<()> {
    let mux = multiplexer(config, ledger.clone());
    let mut backoff_ms: u64 = 1000;
    let max_backoff_ms: u64 = 30000;

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        let manifest = load_manifest(config, &ledger).await?;
        match mux.pull(&manifest, config.watch.batch_size).await {
            Ok(()) => {
                tracing::info!("Watching {} artifact(s)", manifest.len());
                backoff_ms = 1000;
                tokio::select! {
                    _ = &mut shutdown => break,
                    _ = mux.closed() => tracing::warn!("Watch stream dropped"),
                }
            }
            Err(e) => tracing::warn!("Pull failed: {}", e),
        }

        tracing::info!("Reconnecting in {}ms...", backoff_ms);
        tokio::select! {
            _ = &mut shutdown => break,
            _ = tokio::time::sleep(Duration::from_millis(backoff_ms)) => {}
        }
        backoff_ms = (backoff_ms * 2).min(max_backoff_ms);
    }

    mux.close();
    tracing::info!("Watch stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received SIGINT, shutting down"),
        _ = terminate => tracing::info!("Received SIGTERM, shutting down"),
    }
}
