//! Market Stream Mux Binary
//!
//! Connects to the exchange feed, attaches a few logging listeners and
//! serves health and metrics until interrupted.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin market-stream-mux
//! ```
//!
//! # Environment Variables
//!
//! - `STREAM_MUX_NETWORK`: mainnet | testnet (default: mainnet)
//! - `STREAM_MUX_WS_URL`: Override the WebSocket endpoint
//! - `STREAM_MUX_COINS`: Comma-separated coins for `l2Book`, `trades` and
//!   `activeAssetCtx` (default: BTC,ETH)
//! - `STREAM_MUX_USER`: Wallet address for identity-scoped channels
//! - `STREAM_MUX_HEALTH_PORT`: Health check HTTP port (default: 8083)
//! - `STREAM_MUX_PING_INTERVAL_SECS`, `STREAM_MUX_MAX_MISSED_PONGS`: Keepalive
//! - `STREAM_MUX_RECONNECT_DELAY_INITIAL_MS`, `STREAM_MUX_RECONNECT_DELAY_MAX_SECS`,
//!   `STREAM_MUX_RECONNECT_DELAY_MULTIPLIER`, `STREAM_MUX_STABILITY_WINDOW_SECS`: Backoff
//! - `STREAM_MUX_CONNECT_TIMEOUT_SECS`: Connect attempt bound (default: 30)
//! - `OTEL_ENABLED`, `OTEL_EXPORTER_OTLP_ENDPOINT`, `OTEL_SERVICE_NAME`: Tracing export
//! - `RUST_LOG`: Log filter (default: info)

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use market_stream_mux::domain::streaming::{
    ActiveAssetCtxData, AllMidsData, L2BookData, TradeData,
};
use market_stream_mux::{
    HealthServer, HealthServerState, Listener, MuxConfig, Params, StreamMultiplexer,
    SupervisorConfig, WebSocketTransport, init_metrics, init_telemetry,
};
use tokio::signal;
use tokio_util::sync::CancellationToken;

/// Graceful shutdown timeout.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("rustls crypto provider already installed"))?;

    load_dotenv();

    let _telemetry_guard = init_telemetry().context("telemetry initialization failed")?;

    tracing::info!("Starting Market Stream Mux");

    init_metrics().context("metrics initialization failed")?;

    let config = MuxConfig::from_env()?;
    log_config(&config);

    let shutdown_token = CancellationToken::new();

    let transport = WebSocketTransport::new(config.ws_url.clone());
    let (mux, supervisor_task) = StreamMultiplexer::spawn(
        SupervisorConfig::from_stream_settings(&config.stream),
        transport,
    );

    let mut handles = Vec::new();
    for coin in &config.demo.coins {
        let params = Params::new().with("coin", coin.as_str());
        handles.push(mux.subscribe("l2Book", params.clone(), Listener::new(log_book)));
        handles.push(mux.subscribe("trades", params.clone(), Listener::new(log_trades)));
        handles.push(mux.subscribe("activeAssetCtx", params, Listener::new(log_asset_ctx)));
    }
    handles.push(mux.add_listener("allMids", Listener::new(log_mids)));

    if let Some(user) = config.demo.user.as_deref() {
        mux.update_active_identity(Some(user));
        handles.push(mux.add_listener(
            "webData2",
            Listener::new(|data| {
                tracing::info!(bytes = data.to_string().len(), "webData2 update");
            }),
        ));
    }

    let health_state = Arc::new(HealthServerState::new(
        env!("CARGO_PKG_VERSION").to_string(),
        mux.clone(),
    ));
    let health_server = HealthServer::new(
        config.server.health_port,
        health_state,
        shutdown_token.clone(),
    );
    let health_task = tokio::spawn(async move {
        if let Err(e) = health_server.run().await {
            tracing::error!(error = %e, "Health server failed");
        }
    });

    await_shutdown(shutdown_token).await;

    // Closing the socket releases every server-side subscription, so the
    // handles are kept until the supervisor is gone.
    mux.shutdown();

    let drained = tokio::time::timeout(SHUTDOWN_TIMEOUT, async {
        let _ = supervisor_task.await;
        let _ = health_task.await;
    })
    .await;
    if drained.is_err() {
        tracing::warn!(
            timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
            "Shutdown timed out"
        );
    }

    drop(handles);
    tracing::info!("Market Stream Mux stopped");
    Ok(())
}

fn log_book(data: &serde_json::Value) {
    match serde_json::from_value::<L2BookData>(data.clone()) {
        Ok(book) => tracing::info!(
            coin = %book.coin,
            bid = ?book.best_bid().map(|l| l.px),
            ask = ?book.best_ask().map(|l| l.px),
            mid = ?book.mid(),
            "l2Book"
        ),
        Err(e) => tracing::warn!(error = %e, "Unexpected l2Book payload"),
    }
}

fn log_trades(data: &serde_json::Value) {
    match serde_json::from_value::<Vec<TradeData>>(data.clone()) {
        Ok(trades) => {
            for trade in trades {
                tracing::debug!(
                    coin = %trade.coin,
                    side = %trade.side,
                    px = %trade.px,
                    sz = %trade.sz,
                    tid = trade.tid,
                    "trade"
                );
            }
        }
        Err(e) => tracing::warn!(error = %e, "Unexpected trades payload"),
    }
}

fn log_asset_ctx(data: &serde_json::Value) {
    match serde_json::from_value::<ActiveAssetCtxData>(data.clone()) {
        Ok(asset) => tracing::info!(
            coin = %asset.coin,
            mark = %asset.ctx.mark_px,
            oracle = %asset.ctx.oracle_px,
            funding = %asset.ctx.funding,
            "activeAssetCtx"
        ),
        Err(e) => tracing::warn!(error = %e, "Unexpected activeAssetCtx payload"),
    }
}

fn log_mids(data: &serde_json::Value) {
    match serde_json::from_value::<AllMidsData>(data.clone()) {
        Ok(mids) => tracing::debug!(coins = mids.mids.len(), "allMids"),
        Err(e) => tracing::warn!(error = %e, "Unexpected allMids payload"),
    }
}

/// Log the parsed configuration.
fn log_config(config: &MuxConfig) {
    tracing::info!(
        network = config.network.as_str(),
        ws_url = %config.ws_url,
        health_port = config.server.health_port,
        coins = ?config.demo.coins,
        identity = config.demo.user.is_some(),
        "Configuration loaded"
    );
    tracing::debug!(
        ping_interval_secs = config.stream.heartbeat_interval.as_secs(),
        max_missed_pongs = config.stream.max_missed_pongs,
        reconnect_max_secs = config.stream.reconnect_delay_max.as_secs(),
        "Stream settings"
    );
}

/// Load `.env` from the current directory or the nearest ancestor.
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

/// Wait for SIGINT or SIGTERM, then cancel `shutdown_token`.
async fn await_shutdown(shutdown_token: CancellationToken) {
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
        () = ctrl_c => tracing::info!("Received Ctrl+C, initiating shutdown"),
        () = terminate => tracing::info!("Received SIGTERM, initiating shutdown"),
    }

    shutdown_token.cancel();
}
