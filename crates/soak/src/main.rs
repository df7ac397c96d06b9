//! Soak run entry point.
//!
//! Drives many concurrent attendees against a handful of resources, then
//! checks that every resource still balances and prints the collected metrics.

mod config;
mod run;

use std::process::ExitCode;
use std::sync::Arc;

use booking::BookingService;
use seat_store::{InMemorySeatStore, PostgresSeatStore, SeatStore, SystemClock};
use tokio::signal;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use crate::config::{Config, LogFormat};
use crate::run::{SoakError, SoakReport};

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
            tracing::info!("received SIGINT, abandoning soak run");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, abandoning soak run");
        }
    }
}

async fn soak<S>(store: S, config: &Config) -> Result<SoakReport, SoakError>
where
    S: SeatStore + 'static,
    S::Transaction: 'static,
{
    let service = Arc::new(BookingService::new(store, config.engine.clone()));
    run::run(service, config).await
}

#[tokio::main]
async fn main() -> ExitCode {
    let config = Config::from_env();

    // 1. Initialize tracing
    let fmt_layer = match config.log_format {
        LogFormat::Json => tracing_subscriber::fmt::layer().json().boxed(),
        LogFormat::Text => tracing_subscriber::fmt::layer().boxed(),
    };
    tracing_subscriber::registry()
        .with(EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt_layer)
        .init();

    // 2. Install Prometheus metrics recorder
    let prometheus_builder = metrics_exporter_prometheus::PrometheusBuilder::new();
    let metrics_handle = prometheus_builder
        .install_recorder()
        .expect("failed to install Prometheus recorder");

    // 3. Pick the store and run
    let outcome = tokio::select! {
        outcome = async {
            match config.database_url.as_deref() {
                Some(url) => {
                    tracing::info!("using PostgreSQL seat store");
                    let pool = sqlx::postgres::PgPoolOptions::new()
                        .max_connections(config.max_connections)
                        .connect(url)
                        .await
                        .expect("failed to connect to database");
                    let store = PostgresSeatStore::with_config(pool, config.store.clone());
                    store.run_migrations().await.expect("failed to run migrations");
                    soak(store, &config).await
                }
                None => {
                    tracing::info!("using in-memory seat store");
                    let store = InMemorySeatStore::with_config(
                        config.store.clone(),
                        Arc::new(SystemClock),
                    );
                    soak(store, &config).await
                }
            }
        } => outcome,
        () = shutdown_signal() => return ExitCode::from(130),
    };

    // 4. Report
    let report = match outcome {
        Ok(report) => report,
        Err(err) => {
            tracing::error!(error = %err, "soak run failed");
            return ExitCode::FAILURE;
        }
    };

    match serde_json::to_string_pretty(&report) {
        Ok(json) => println!("{json}"),
        Err(err) => tracing::warn!(error = %err, "failed to serialize report"),
    }
    println!("{}", metrics_handle.render());

    if report.is_consistent() {
        tracing::info!(
            allocated = report.tally.allocated,
            reversed = report.tally.reversed,
            elapsed_ms = report.elapsed_ms as u64,
            "soak run finished, all resources balance"
        );
        ExitCode::SUCCESS
    } else {
        tracing::error!("soak run finished with unbalanced seat accounting");
        ExitCode::FAILURE
    }
}
