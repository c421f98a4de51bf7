//! Gatehouse Server - Main entry point

use std::sync::Arc;
use std::time::Duration;

use gatehouse_core::{
    api::{self, AppState},
    config::Config,
    db::Database,
    middleware::auth::StoreSessionVerifier,
    rbac::{ActionCatalog, ActionReconciler, RbacStore},
    telemetry::init_telemetry,
};
use tokio::sync::watch;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let config = Config::load()?;
    let telemetry = init_telemetry(&config.telemetry)?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        "Starting Gatehouse Server"
    );

    let db = Database::new(&config.database).await?;
    tracing::info!("Connected to database");

    if config.database.run_migrations {
        db.migrate().await?;
    }

    let store: Arc<dyn RbacStore> = Arc::new(db.clone());

    // Routes reference actions by id; refuse to serve with a stale action set.
    let reconciler = ActionReconciler::new(ActionCatalog::builtin(), store.clone());
    if let Err(e) = reconciler.run_once().await {
        e.log();
        return Err(anyhow::anyhow!("Action reconciliation failed: {}", e));
    }

    let sessions = Arc::new(StoreSessionVerifier::new(store.clone(), config.auth.clone()));
    let app_state = AppState::new(store, sessions, telemetry.metrics).with_database(db);
    let app = api::build_router(app_state, &config.server);

    let addr = config.server.bind_address();
    tracing::info!(address = %addr, "Starting HTTP server");
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    let server = axum::serve(listener, app).with_graceful_shutdown(async move {
        shutdown_signal().await;
        let _ = shutdown_tx.send(true);
    });

    let drain_timeout = Duration::from_secs(config.server.shutdown_timeout_secs);
    tokio::select! {
        result = server => result?,
        _ = async {
            let _ = shutdown_rx.wait_for(|stopping| *stopping).await;
            tokio::time::sleep(drain_timeout).await;
        } => {
            tracing::warn!(
                timeout_secs = config.server.shutdown_timeout_secs,
                "In-flight requests did not finish before the shutdown timeout"
            );
        }
    }

    tracing::info!("Server shutdown complete");
    Ok(())
}

/// Wait for shutdown signal.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
