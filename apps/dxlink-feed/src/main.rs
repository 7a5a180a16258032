//! DXLink Feed Binary
//!
//! Downloads candle history or streams live quotes from DXLink.
//!
//! # Usage
//!
//! ```bash
//! DXLINK_MODE=history DXLINK_SYMBOLS=AAPL,MSFT DXLINK_INTERVAL=5m cargo run -p dxlink-feed
//! DXLINK_MODE=stream DXLINK_SYMBOLS=SPY,QQQ cargo run -p dxlink-feed
//! ```
//!
//! # Environment Variables
//!
//! ## Required
//! - `DXLINK_URL`: DXLink WebSocket URL
//! - `DXLINK_TOKEN`: Feed token
//!
//! ## Optional
//! - `DXLINK_MODE`: history | stream (default: history)
//! - `DXLINK_SYMBOLS`: Comma-separated symbols (default: SPY)
//! - `DXLINK_INTERVAL`: Candle interval, e.g. 5m, 1h, 1d (default: 1d)
//! - `DXLINK_MAX_ROWS`: Rows per symbol (default: 100)
//! - `DXLINK_CANDLE_FIELDS`: Comma-separated OHLCV fields (default: all)
//! - `DXLINK_CONNECT_TIMEOUT_SECS`, `DXLINK_READY_TIMEOUT_SECS`, `DXLINK_DATA_TIMEOUT_SECS`,
//!   `DXLINK_GRACE_PERIOD_MILLIS`, `DXLINK_JOIN_TIMEOUT_SECS`: Collection limits
//! - `DXLINK_MAX_AUTH_ATTEMPTS`, `DXLINK_KEEPALIVE_TIMEOUT_SECS`,
//!   `DXLINK_AGGREGATION_PERIOD`: Handshake parameters
//! - `DXLINK_TRADING_HOURS_TZ`: Exchange time zone for the session filter (default: fixed UTC)
//! - `DXLINK_METRICS_PORT`: Prometheus metrics port (default: 0, disabled)
//! - `OTEL_ENABLED`, `OTEL_EXPORTER_OTLP_ENDPOINT`, `OTEL_SERVICE_NAME`: Tracing export
//! - `RUST_LOG`: Log filter

use std::time::Duration;

use anyhow::Context;
use dxlink_feed::application::services::resolve_connection;
use dxlink_feed::infrastructure::telemetry;
use dxlink_feed::{
    ConnectionInfo, FeedConfig, FeedMode, RealTimeSession, StaticTokenSource, init_metrics,
};
use tokio::signal;

/// Interval between live price log lines in stream mode.
const SNAPSHOT_INTERVAL: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        eprintln!("rustls crypto provider already installed");
    }

    load_dotenv();

    let _telemetry_guard = telemetry::init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting DXLink feed");

    let config = FeedConfig::from_env().context("invalid configuration")?;
    log_config(&config);

    if let Some(addr) = init_metrics(config.metrics_port).context("metrics exporter")? {
        tracing::info!(addr = %addr, "Prometheus metrics listening");
    }

    let source = StaticTokenSource::new(config.connection.clone());
    let info = resolve_connection(&source)
        .await
        .context("feed token unavailable")?;

    match config.mode {
        FeedMode::History => run_history(&config, info).await,
        FeedMode::Stream => run_stream(config.session(info), config.policy.ready_timeout).await,
    }
}

/// Download history and print it to stdout as JSON.
async fn run_history(config: &FeedConfig, info: ConnectionInfo) -> anyhow::Result<()> {
    let request = config.historical_request();
    let result = config
        .collector(info)
        .collect(&request)
        .await
        .context("historical collection failed")?;

    if result.is_empty() {
        tracing::warn!("No historical data returned");
    }

    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

/// Stream quotes until a shutdown signal or the connection ends.
async fn run_stream(mut session: RealTimeSession, ready_timeout: Duration) -> anyhow::Result<()> {
    session.start().await.context("quote session failed to start")?;

    if !session.wait_until_streaming(ready_timeout).await {
        tracing::warn!(state = ?session.state(), "Quote session not streaming yet");
    }

    let mut ticker = tokio::time::interval(SNAPSHOT_INTERVAL);
    let mut state = session.watch_state();
    let shutdown = await_shutdown();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            () = &mut shutdown => break,
            _ = ticker.tick() => {
                let mut prices: Vec<_> = session.live_prices().into_iter().collect();
                prices.sort_by(|a, b| a.0.cmp(&b.0));
                tracing::info!(symbols = prices.len(), prices = ?prices, "Live prices");
            }
            changed = state.changed() => {
                if changed.is_err() || state.borrow_and_update().is_terminal() {
                    tracing::warn!(state = ?session.state(), "Quote session ended");
                    break;
                }
            }
        }
    }

    session.stop().await;
    tracing::info!("DXLink feed stopped");
    Ok(())
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

/// Log the parsed configuration.
fn log_config(config: &FeedConfig) {
    tracing::info!(
        mode = config.mode.as_str(),
        symbols = ?config.symbols,
        interval = %config.interval,
        max_rows = config.max_rows,
        metrics_port = config.metrics_port,
        "Configuration loaded"
    );
    tracing::debug!(url = %config.connection.url, "DXLink endpoint");
}

/// Wait for SIGINT or SIGTERM.
async fn await_shutdown() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Ctrl+C handler failed");
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
                tracing::error!(error = %e, "SIGTERM handler failed");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, shutting down");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, shutting down");
        }
    }
}
