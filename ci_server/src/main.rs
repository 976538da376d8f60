//! CI lifecycle server.
//!
//! Serves the pipeline admin API and the webhook intake, and runs the
//! stale-run sweeper in the background.

use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use diesel_async::pooled_connection::deadpool::Pool;
use diesel_async::pooled_connection::AsyncDieselConnectionManager;
use diesel_async::AsyncPgConnection;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use ci_lifecycle::clients::{
    RecordingDispatcher, RecordingExecutor, RecordingNotificationBus, RecordingSourceNotifier,
};
use ci_lifecycle::routes::{self, CiRouterState};
use ci_lifecycle::services::sweeper;
use ci_lifecycle::store::postgres::migration;
use ci_lifecycle::store::{InMemoryStore, PgStore};
use ci_lifecycle::{CiConfig, CiContext};

#[derive(Parser)]
#[command(name = "ci-lifecycle", about = "CI pipeline lifecycle engine")]
struct Cli {
    /// Server port
    #[arg(short, long, env = "CI_PORT", default_value = "9090")]
    port: u16,

    /// PostgreSQL connection URL
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,

    /// Run against the in-memory store and recording collaborators
    #[arg(long)]
    in_memory: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_default();
    if log_format == "json" {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "info".into()),
            )
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "info".into()),
            )
            .init();
    }

    let cli = Cli::parse();
    let config = CiConfig::from_env();

    tracing::info!("Starting CI lifecycle server...");

    let ctx = if cli.in_memory {
        tracing::warn!("Running with in-memory store; state is lost on exit");
        CiContext::new(
            Arc::new(InMemoryStore::new()),
            Arc::new(RecordingSourceNotifier::new()),
            Arc::new(RecordingNotificationBus::new()),
            Arc::new(RecordingDispatcher::new()),
            Arc::new(RecordingExecutor::new()),
            config,
        )
    } else {
        let db_url = cli
            .database_url
            .ok_or_else(|| anyhow::anyhow!("DATABASE_URL is required unless --in-memory"))?;
        let manager = AsyncDieselConnectionManager::<AsyncPgConnection>::new(db_url);
        let pool = Pool::builder(manager)
            .build()
            .map_err(|e| anyhow::anyhow!("diesel pool: {e}"))?;

        {
            let mut conn = pool
                .get()
                .await
                .map_err(|e| anyhow::anyhow!("diesel pool: {e}"))?;
            tracing::info!("Running CI lifecycle migration...");
            migration::run_migration(&mut conn).await?;
            tracing::info!("CI lifecycle migration completed.");
        }

        CiContext::with_http_clients(Arc::new(PgStore::new(pool)), config)
    };

    // Initialize metrics
    ci_lifecycle::metrics::init_metrics();

    tokio::spawn(sweeper::run_sweeper(ctx.clone()));

    let app = routes::ci_router(CiRouterState { ctx }).layer(
        ServiceBuilder::new()
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive()),
    );

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], cli.port));
    tracing::info!("CI lifecycle server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {e}");
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
                tracing::error!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received SIGINT, shutting down..."),
        _ = terminate => tracing::info!("Received SIGTERM, shutting down..."),
    }
}
