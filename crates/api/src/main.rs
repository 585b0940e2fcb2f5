//! API server entry point.

use std::sync::Arc;

use api::config::{Config, LogFormat};
use api::error::StartupError;
use api::{AppState, create_app, spawn_sweeper};
use inventory::InventoryStore;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use orders::OrderStore;
use tokio::signal;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    let registry = tracing_subscriber::registry().with(filter);
    match config.log_format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

fn build_app<O, S>(
    state: Arc<AppState<O, S>>,
    config: &Config,
    metrics_handle: PrometheusHandle,
) -> axum::Router
where
    O: OrderStore + 'static,
    S: InventoryStore + 'static,
{
    match config.sweep_interval() {
        Some(interval) => {
            spawn_sweeper(state.clone(), interval);
        }
        None => tracing::info!("periodic checkout sweep disabled"),
    }
    create_app(state, metrics_handle)
}

#[tokio::main]
async fn main() -> Result<(), StartupError> {
    let config = Config::from_env();
    init_tracing(&config);

    let metrics_handle = PrometheusBuilder::new().install_recorder()?;

    let app = match &config.database_url {
        Some(url) => {
            let pool = sqlx::postgres::PgPoolOptions::new()
                .max_connections(config.database_max_connections)
                .connect(url)
                .await?;
            sqlx::migrate!("../../migrations").run(&pool).await?;
            tracing::info!("connected to Postgres, migrations applied");
            build_app(api::postgres_state(pool, &config), &config, metrics_handle)
        }
        None => {
            tracing::warn!("DATABASE_URL not set, state is kept in memory only");
            build_app(api::in_memory_state(&config), &config, metrics_handle)
        }
    };

    let addr = config.addr();
    tracing::info!(%addr, "starting API server");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("server shut down gracefully");
    Ok(())
}
