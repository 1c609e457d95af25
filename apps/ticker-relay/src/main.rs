//! Ticker Relay Binary
//!
//! Starts the Upbit ticker relay.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin ticker-relay
//! ```
//!
//! # Environment Variables
//!
//! - `WEBSOCKET_RELAY_PORT`: Downstream WebSocket port (default: 8080)
//! - `TICKER_RELAY_HEALTH_PORT`: Health check HTTP port, 0 disables (default: 8082)
//! - `TICKER_RELAY_UPSTREAM_URL`: Upstream feed (default: wss://api.upbit.com/websocket/v1)
//! - `TICKER_RELAY_SUBSCRIBE_CHUNK_SIZE`: Codes per subscription frame (default: 500)
//! - `TICKER_RELAY_RECONNECT_DELAY_MS`: Fixed reconnect delay (default: 5000)
//! - `TICKER_RELAY_KEEPALIVE_SECS`: Upstream ping interval, 0 disables (default: 60)
//! - `TICKER_RELAY_TICKET_PREFIX`: Subscription ticket prefix (default: relay-server-ticker)
//! - `TICKER_RELAY_REFERENCE_URL`: Market list URL
//! - `TICKER_RELAY_MARKET_PREFIX`: Market code prefix to subscribe (default: KRW-)
//! - `TICKER_RELAY_REFERENCE_TIMEOUT_SECS`: Market list timeout (default: 10)
//! - `TICKER_RELAY_DISPLAY_FIELD`: Enrichment field name (default: korean_name)
//! - `TICKER_RELAY_EVENT_CAPACITY`: Upstream event queue size (default: 4096)
//! - `OTEL_ENABLED`: Enable OpenTelemetry export (default: false)
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP endpoint (default: <http://localhost:4317>)
//! - `OTEL_SERVICE_NAME`: Service name (default: ticker-relay)
//! - `RUST_LOG`: Log level (default: info)

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use ticker_relay::infrastructure::health::{HealthServer, HealthServerState};
use ticker_relay::infrastructure::telemetry;
use ticker_relay::{RelayConfig, RelayCoordinator, UpbitMarketCatalog, init_metrics};
use tokio::signal;
use tokio_util::sync::CancellationToken;

/// Graceful shutdown timeout.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("failed to install rustls crypto provider"))?;

    load_dotenv();

    let _telemetry_guard = telemetry::init().context("failed to initialize telemetry")?;

    tracing::info!("Starting ticker relay");

    let _metrics_handle = init_metrics().context("failed to install metrics recorder")?;

    let config = RelayConfig::from_env().context("invalid configuration")?;
    log_config(&config);

    let shutdown_token = CancellationToken::new();

    let reference = Arc::new(
        UpbitMarketCatalog::from_settings(&config.reference)
            .context("failed to build market list client")?,
    );

    let relay = RelayCoordinator::new(config.clone(), reference, shutdown_token.clone())
        .start()
        .await
        .context("failed to start relay")?;

    let mut health_task = None;
    if config.server.health_port == 0 {
        tracing::info!("Health server disabled");
    } else {
        let health_state = Arc::new(HealthServerState::for_relay(
            env!("CARGO_PKG_VERSION").to_string(),
            &relay,
        ));
        let health_server = HealthServer::new(
            config.server.health_port,
            health_state,
            shutdown_token.clone(),
        );
        health_task = Some(tokio::spawn(async move {
            if let Err(e) = health_server.run().await {
                tracing::error!(error = %e, "Health server error");
            }
        }));
    }

    tracing::info!(addr = %relay.local_addr(), "Ticker relay ready");

    await_shutdown(shutdown_token).await;

    relay.shutdown(SHUTDOWN_TIMEOUT).await;
    if let Some(task) = health_task
        && tokio::time::timeout(SHUTDOWN_TIMEOUT, task).await.is_err()
    {
        tracing::warn!("Health server did not stop in time");
    }

    tracing::info!("Ticker relay stopped");
    Ok(())
}

/// Log the parsed configuration.
fn log_config(config: &RelayConfig) {
    tracing::info!(
        relay_port = config.server.relay_port,
        health_port = config.server.health_port,
        upstream = %config.upstream.url,
        chunk_size = config.upstream.chunk_size,
        reconnect_delay_ms = config.upstream.reconnect_delay.as_millis(),
        display_field = %config.display_field,
        "Configuration loaded"
    );
    tracing::debug!(
        reference_url = %config.reference.url,
        market_prefix = %config.reference.market_prefix,
        keepalive_secs = config.upstream.keepalive.map(|d| d.as_secs()),
        "Reference data source"
    );
}

/// Load .env file from current directory or any ancestor directory.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
#[allow(clippy::expect_used)]
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("signal handler installation is critical for graceful shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation is critical for graceful shutdown")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }

    shutdown_token.cancel();

    tracing::info!(
        timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
        "Graceful shutdown started"
    );
}
