use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use sweep_engine::config::{self, EngineConfig};
use sweep_engine::core::data_service::{BinanceCandleClient, CandleSource};
use sweep_engine::core::paper_broker::PaperBroker;
use sweep_engine::core::pipeline::SymbolPipeline;
use sweep_engine::core::regime::MarketRegime;
use sweep_engine::core::telemetry::{self, Telemetry};
use sweep_engine::core::trade_ledger::TradeLedger;
use sweep_engine::core::trade_stream::TradeStream;
use sweep_engine::execution::ExecutionAdapter;
use sweep_engine::logging;
use sweep_engine::types::{MarketEvent, Timeframe};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file (ignore if missing).
    let _ = dotenvy::dotenv();

    let config_dir = std::env::var("SWEEP_CONFIG_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("config"));

    let config = config::load_config(&config_dir)?;

    // Hold the guard for the process lifetime.
    let _guard = logging::init_tracing(&config.app.logging)?;

    let symbol = config.app.symbol.clone();
    info!(
        symbol = %symbol,
        starting_balance = %config.paper.starting_balance,
        telemetry_enabled = config.telemetry.as_ref().is_some_and(|t| t.enabled),
        "Sweep engine starting"
    );

    // -----------------------------------------------------------------------
    // Market context
    // -----------------------------------------------------------------------

    let candles: Arc<dyn CandleSource> = Arc::new(
        BinanceCandleClient::new(config.stream.rest_url.clone())
            .context("failed to build Binance REST client")?,
    );

    let regime = Arc::new(
        MarketRegime::load(candles.clone(), symbol.clone(), config.regime.clone()).await?,
    );

    // -----------------------------------------------------------------------
    // Component construction
    // -----------------------------------------------------------------------

    let ledger = match TradeLedger::open(&config.paper.ledger_dir, &symbol) {
        Ok(l) => {
            info!(path = %l.path().display(), "trade ledger ready");
            Some(l)
        }
        Err(e) => {
            warn!(error = %e, dir = %config.paper.ledger_dir, "trade ledger unavailable, trades will not be persisted");
            None
        }
    };

    let telemetry_shutdown = CancellationToken::new();
    let (telemetry, publisher_handle) = init_telemetry(&config, telemetry_shutdown.clone());

    let broker = PaperBroker::new(&config.paper);
    info!(balance = %broker.balance(), "paper broker initialized");

    let mut pipeline = SymbolPipeline::new(&config, broker, regime.handle(), telemetry, ledger);

    if config.stream.seed_levels {
        seed_levels(&mut pipeline, candles.as_ref(), &config).await;
    }

    info!("all components initialized");

    // -----------------------------------------------------------------------
    // Launch concurrent tasks
    // -----------------------------------------------------------------------

    let (event_tx, event_rx) = mpsc::channel::<MarketEvent>(config.stream.channel_capacity);
    let shutdown = CancellationToken::new();

    let stream = TradeStream::new(config.stream.clone(), symbol.clone(), event_tx, shutdown.clone());
    let stream_shutdown = shutdown.clone();
    let stream_handle = tokio::spawn(async move {
        if let Err(e) = stream.run().await {
            error!(error = %e, "trade stream exited with error");
            stream_shutdown.cancel();
        }
    });

    let pipeline_shutdown = shutdown.clone();
    let pipeline_handle = tokio::spawn(async move {
        if let Err(e) = pipeline.run(event_rx, pipeline_shutdown).await {
            error!(error = %e, "pipeline exited with error");
        }
    });

    let refresh_handle = regime.clone().spawn_refresh(shutdown.clone());

    info!("all tasks running, press Ctrl+C to shutdown");

    // -----------------------------------------------------------------------
    // Wait for shutdown signal
    // -----------------------------------------------------------------------

    tokio::select! {
        res = tokio::signal::ctrl_c() => {
            res.context("failed to listen for Ctrl+C")?;
            info!("shutdown signal received, stopping gracefully...");
        }
        _ = shutdown.cancelled() => {
            warn!("internal shutdown requested");
        }
    }
    shutdown.cancel();

    let (stream_res, pipeline_res, refresh_res) =
        tokio::join!(stream_handle, pipeline_handle, refresh_handle);

    if let Err(e) = stream_res {
        error!(error = %e, "trade stream task panicked");
    }
    if let Err(e) = pipeline_res {
        error!(error = %e, "pipeline task panicked");
    }
    if let Err(e) = refresh_res {
        error!(error = %e, "regime refresh task panicked");
    }

    // The pipeline publishes its final trade updates while flushing, so the
    // publisher stops only after it.
    telemetry_shutdown.cancel();
    if let Some(handle) = publisher_handle {
        if let Err(e) = handle.await {
            error!(error = %e, "telemetry publisher task panicked");
        }
    }

    info!("shutdown complete");
    Ok(())
}

// ---------------------------------------------------------------------------
// Initialization helpers
// ---------------------------------------------------------------------------

/// Build the telemetry handle and spawn its Redis publisher, if enabled.
fn init_telemetry(
    config: &EngineConfig,
    shutdown: CancellationToken,
) -> (Telemetry, Option<tokio::task::JoinHandle<()>>) {
    match &config.telemetry {
        Some(t) if t.enabled => {
            let (handle, rx) = Telemetry::channel(t.queue_capacity);
            let task = tokio::spawn(telemetry::run_publisher(
                rx,
                t.redis_url.clone(),
                t.channel.clone(),
                shutdown,
            ));
            info!(channel = %t.channel, "telemetry enabled");
            (handle, Some(task))
        }
        _ => {
            info!("telemetry disabled");
            (Telemetry::disabled(), None)
        }
    }
}

/// Warm levels and ATR from REST history.
///
/// A failed fetch leaves the tracker cold; it fills in from live ticks.
async fn seed_levels<E: ExecutionAdapter>(
    pipeline: &mut SymbolPipeline<E>,
    source: &dyn CandleSource,
    config: &EngineConfig,
) {
    let symbol = config.app.symbol.as_str();
    let levels = &config.strategy.levels;

    let fetch = |tf: Timeframe, count: usize| async move {
        let limit = u32::try_from(count).unwrap_or(u32::MAX);
        match source.fetch_candles(symbol, tf, limit).await {
            Ok(c) => c,
            Err(e) => {
                warn!(timeframe = %tf, error = %e, "level seed fetch failed");
                Vec::new()
            }
        }
    };

    let h1 = fetch(Timeframe::H1, levels.h1_lookback + 1).await;
    let h4 = fetch(Timeframe::H4, levels.h4_lookback + 1).await;
    let m1 = fetch(Timeframe::M1, levels.atr_period + 2).await;

    pipeline.seed_levels(&h1, &h4, &m1);
    info!(
        h1 = h1.len(),
        h4 = h4.len(),
        m1 = m1.len(),
        atr = %pipeline.levels().atr(),
        "levels seeded"
    );
}
