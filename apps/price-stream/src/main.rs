//! Price Stream Binary
//!
//! Streams live prices for a watchlist and logs them.
//!
//! # Usage
//!
//! ```bash
//! PRICE_STREAM_SYMBOLS=bitcoin,ethereum cargo run --bin price-stream
//! ```
//!
//! # Environment Variables
//!
//! - `PRICE_STREAM_FEED_URL`: Feed endpoint (default: <wss://ws.coincap.io/prices>)
//! - `PRICE_STREAM_SYMBOLS`: Comma-separated watchlist
//! - `PRICE_STREAM_RECONNECT_DELAY_INITIAL_MS`: First backoff delay (default: 500)
//! - `PRICE_STREAM_RECONNECT_DELAY_MAX_SECS`: Backoff ceiling (default: 30)
//! - `PRICE_STREAM_RECONNECT_DELAY_MULTIPLIER`: Backoff multiplier (default: 2.0)
//! - `PRICE_STREAM_RECONNECT_JITTER`: Backoff jitter fraction (default: 0.1)
//! - `PRICE_STREAM_MAX_RECONNECT_ATTEMPTS`: Attempts before giving up, 0 = never (default: 10)
//! - `PRICE_STREAM_CONNECT_TIMEOUT_SECS`: Open timeout (default: 10)
//! - `PRICE_STREAM_IDLE_TIMEOUT_SECS`: Silence before reconnecting (default: 60)
//! - `PRICE_STREAM_CLOSE_TIMEOUT_MS`: Close timeout (default: 2000)
//! - `PRICE_STREAM_PRICE_CAPACITY`: Price channel capacity (default: 64)
//! - `PRICE_STREAM_STATE_CAPACITY`: State transition channel capacity (default: 64)
//! - `PRICE_STREAM_HEALTH_PORT`: Health check HTTP port, 0 = disabled (default: 8083)
//! - `OTEL_ENABLED`: Export spans over OTLP (default: false)
//! - `RUST_LOG`: Log filter (default: `price_stream=info`)

use std::sync::Arc;

use anyhow::Context;
use price_stream::domain::streaming::PriceDirection;
use price_stream::infrastructure::health::{HealthServer, HealthServerState};
use price_stream::infrastructure::telemetry;
use price_stream::{
    ConnectionController, ControllerConfig, PriceUpdateReceiver, StaticSymbolSource, StreamConfig,
    WatchlistSync, WebSocketTransport, init_metrics,
};
use tokio::signal;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("failed to install rustls crypto provider"))?;

    load_dotenv();

    let _telemetry_guard = telemetry::init().context("failed to initialize telemetry")?;

    tracing::info!("Starting price stream");

    let _metrics_handle = init_metrics().context("failed to install metrics recorder")?;

    let config = StreamConfig::from_env()?;
    log_config(&config);

    let shutdown_token = CancellationToken::new();

    let controller = ConnectionController::spawn(
        Arc::new(WebSocketTransport::new()),
        ControllerConfig::from(&config),
    );

    // Observers subscribe before the first connect so nothing is missed.
    tokio::spawn(log_transitions(controller.state_transitions()));
    tokio::spawn(log_prices(controller.price_updates()));

    if config.server.health_port > 0 {
        let health_state = Arc::new(HealthServerState::new(
            env!("CARGO_PKG_VERSION").to_string(),
            controller.clone(),
        ));
        let health_server = HealthServer::new(
            config.server.health_port,
            health_state,
            shutdown_token.clone(),
        );
        tokio::spawn(async move {
            if let Err(e) = health_server.run().await {
                tracing::error!(error = %e, "Health server error");
            }
        });
    }

    let watchlist = WatchlistSync::new(
        StaticSymbolSource::new(config.symbols.clone()),
        controller.clone(),
    );
    match watchlist.sync().await {
        Ok(changes) if changes.added.is_empty() => {
            tracing::warn!("No symbols configured, set PRICE_STREAM_SYMBOLS to start streaming");
        }
        Ok(_) => tracing::info!(state = %controller.state(), "Price stream ready"),
        Err(e) => tracing::error!(error = %e, "Failed to apply watchlist"),
    }

    await_shutdown(shutdown_token).await;

    controller.disconnect().await?;
    tracing::info!(stats = ?controller.stats(), "Price stream stopped");
    Ok(())
}

async fn log_transitions(mut rx: broadcast::Receiver<price_stream::StateTransition>) {
    loop {
        match rx.recv().await {
            Ok(transition) => {
                tracing::info!(from = %transition.from, to = %transition.to, "Connection state");
            }
            Err(RecvError::Lagged(missed)) => {
                tracing::warn!(missed, "State log lagged");
            }
            Err(RecvError::Closed) => break,
        }
    }
}

async fn log_prices(mut rx: PriceUpdateReceiver) {
    while let Some(event) = rx.recv().await {
        let arrow = match event.direction() {
            PriceDirection::Up => "▲",
            PriceDirection::Down => "▼",
            PriceDirection::Unchanged => "=",
        };
        tracing::info!(
            symbol = event.symbol(),
            price = event.price(),
            change = event.change(),
            change_pct = event.change_percent().unwrap_or_default(),
            "{arrow}"
        );
    }
}

/// Log the parsed configuration.
fn log_config(config: &StreamConfig) {
    tracing::info!(
        feed_url = %config.feed_url,
        symbols = ?config.symbols,
        health_port = config.server.health_port,
        max_reconnect_attempts = config.reconnect.max_attempts,
        "Configuration loaded"
    );
}

/// Load .env file from current directory or any ancestor directory.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        for dir in cwd.ancestors().skip(1) {
            let env_path = dir.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
        }
    }
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
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
}
