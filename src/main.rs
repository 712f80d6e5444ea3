//! tickflow binary
//!
//! Wires the feed, strategy engine, execution, risk, position, and
//! persistence components onto one event bus and runs them until
//! ctrl-c or a fatal error. Services stop in reverse construction
//! order under a bounded drain deadline.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use tickflow::api::{self, ApiState};
use tickflow::feed::{ExchangeFeed, MarketFeed, SyntheticFeed};
use tickflow::orders::ExecutionConfig;
use tickflow::risk::RiskLimits;
use tickflow::{
    metrics, Config, EventBus, MeanReversionStrategy, OrderManager, PairsTradingStrategy,
    PersistenceService, PositionTracker, RiskManager, StopLossManager, Storage, StrategyEngine,
};

const SHUTDOWN_DEADLINE: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = Config::from_env();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.clone()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!(
        symbols = ?config.symbols,
        synthetic_feed = config.use_synthetic_feed,
        initial_cash = %config.initial_cash,
        db_path = %config.db_path,
        "starting tickflow"
    );

    metrics::init();

    // ---- Shared infrastructure ----
    let bus = Arc::new(EventBus::new());
    let shutdown = Arc::new(Notify::new());
    let storage = Arc::new(Storage::new(&config.db_path).await?);

    // ---- Core services, construction order matters for shutdown ----
    let persistence = PersistenceService::new(Arc::clone(&storage));
    Arc::clone(&persistence).start(&bus);

    let tracker = PositionTracker::new(config.initial_cash, Arc::clone(&shutdown));
    Arc::clone(&tracker).start(&bus);

    let risk = RiskManager::new(
        RiskLimits {
            max_order_value: config.max_order_value,
            max_position_size: config.max_position_size,
            max_drawdown_pct: config.max_drawdown_pct,
        },
        Arc::clone(&tracker),
    );
    Arc::clone(&risk).start(&bus);

    let order_manager = OrderManager::new(ExecutionConfig {
        max_qty_per_signal: config.max_qty_per_signal,
        risk_wait: Duration::from_millis(config.risk_wait_ms),
        slippage_bps: config.slippage_bps,
    });
    Arc::clone(&order_manager).start(&bus);

    let stops = StopLossManager::new(Arc::clone(&tracker), config.stop_loss_pct);
    Arc::clone(&stops).start(&bus);

    let engine = StrategyEngine::new();
    engine.register(Box::new(MeanReversionStrategy::new(
        config.symbols.clone(),
        config.window_size,
        config.entry_z,
    )));
    if config.symbols.len() >= 2 {
        engine.register(Box::new(PairsTradingStrategy::new(
            config.symbols[0].clone(),
            config.symbols[1].clone(),
            60,
            config.entry_z,
            0.5,
        )));
    }
    Arc::clone(&engine).start(&bus);

    // ---- Market data ----
    let tick_interval = Duration::from_millis(config.tick_interval_ms);
    let mut feed: Box<dyn MarketFeed> = if config.use_synthetic_feed {
        Box::new(SyntheticFeed::new(
            Arc::clone(&bus),
            config.symbols.clone(),
            tick_interval,
        ))
    } else {
        Box::new(ExchangeFeed::new(
            Arc::clone(&bus),
            config.symbols.clone(),
            config.exchange_ws_url.clone(),
            tick_interval,
        ))
    };
    feed.connect().await?;
    let feed_stop = feed.stop_handle();
    let feed_task = tokio::spawn(async move {
        if let Err(err) = feed.run().await {
            error!(error = %err, "feed stopped with error");
        }
    });

    // ---- API server ----
    let api_state = Arc::new(ApiState {
        tracker: Arc::clone(&tracker),
        orders: Arc::clone(&order_manager),
        storage: Arc::clone(&storage),
        started_at: Instant::now(),
    });
    let api_host = config.api_host.clone();
    let api_port = config.api_port;
    let api_task = tokio::spawn(async move {
        if let Err(err) = api::serve(api_state, &api_host, api_port).await {
            error!(error = %err, "API server error");
        }
    });

    // ---- Periodic snapshot persistence ----
    let snapshot_tracker = Arc::clone(&tracker);
    let snapshot_storage = Arc::clone(&storage);
    let snapshot_interval = Duration::from_secs(config.snapshot_interval_secs);
    let snapshot_task = tokio::spawn(async move {
        let mut interval = tokio::time::interval(snapshot_interval);
        interval.tick().await;
        loop {
            interval.tick().await;
            let snapshot = snapshot_tracker.snapshot();
            if let Err(err) = snapshot_storage.insert_snapshot(&snapshot).await {
                warn!(error = %err, "failed to persist snapshot");
            } else {
                info!(equity = %snapshot.total_equity, "snapshot persisted");
            }
        }
    });

    info!("all services started");

    // ---- Wait for ctrl-c or a fatal component error ----
    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("shutdown requested"),
        _ = shutdown.notified() => error!("fatal error, shutting down"),
    }

    // ---- Drain in reverse construction order ----
    feed_stop.stop();
    let drained = tokio::time::timeout(SHUTDOWN_DEADLINE, async {
        engine.stop(&bus);
        stops.stop(&bus);
        order_manager.stop(&bus).await;
        risk.stop(&bus);
        tracker.stop(&bus);
        persistence.stop(&bus);
        let _ = feed_task.await;
    })
    .await;
    if drained.is_err() {
        warn!("drain deadline exceeded, aborting remaining work");
    }

    snapshot_task.abort();
    api_task.abort();

    let final_snapshot = tracker.snapshot();
    if let Err(err) = storage.insert_snapshot(&final_snapshot).await {
        warn!(error = %err, "failed to persist final snapshot");
    }

    info!(equity = %final_snapshot.total_equity, "shutdown complete");
    Ok(())
}
