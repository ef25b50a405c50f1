use std::future::ready;
use std::net::SocketAddr;

use axum::routing::get;
use mailconfirm::{app, initialize_state, telemetry};
use tokio::signal;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

const OTLP_ENDPOINT: &str = "OTEL_EXPORTER_OTLP_ENDPOINT";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let endpoint = std::env::var(OTLP_ENDPOINT).ok();

    // initialize logs.
    let otel_logs = match endpoint.as_deref() {
        Some(endpoint) => Some(telemetry::setup_logging(endpoint)?),
        None => None,
    };
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(fmt::layer())
        .with(otel_logs)
        .init();

    // initialize tracing.
    let tracer = match endpoint.as_deref() {
        Some(endpoint) => {
            let provider = telemetry::setup_tracer(endpoint)?;
            opentelemetry::global::set_tracer_provider(provider.clone());
            Some(provider)
        },
        None => None,
    };

    // initialize metrics.
    let recorder = telemetry::setup_metrics_recorder()?;

    let state = initialize_state().await?;
    let port = state.config.port;

    let app = app(state)
        .route("/metrics", get(move || ready(recorder.render())));

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "server started");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(provider) = tracer {
        provider.shutdown()?;
    }

    Ok(())
}

/// Wait for Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(error) = signal::ctrl_c().await {
            tracing::error!(%error, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            },
            Err(error) => {
                tracing::error!(%error, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("shutting down gracefully");
}
