use protofleet_core::Ledger;
use protofleet_server::config::AppConfig;
use protofleet_server::state::AppState;
use std::sync::Arc;
use tokio::signal;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log_level.clone().into()),
        )
        .init();

    tracing::info!("Starting protofleet server on port {}", config.port);

    // The ledger is the source of truth; nothing is served without it
    let ledger = Arc::new(Ledger::with_extension(
        &config.schema_root,
        config.schema_extension.clone(),
    ));
    if let Err(e) = ledger.bootstrap().await {
        tracing::error!("Failed to load ledger: {}", e);
        return Err(e.into());
    }
    tracing::info!(
        "Ledger ready: {} entries under {}",
        ledger.len().await,
        config.schema_root.display()
    );

    let state = Arc::new(AppState::new(ledger, config.clone()));

    let addr = config.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Listening on {}", addr);

    protofleet_server::serve(listener, state, shutdown_signal()).await?;

    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to listen for ctrl+c");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to listen for SIGTERM")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received SIGINT"),
        _ = terminate => tracing::info!("Received SIGTERM"),
    }
}
