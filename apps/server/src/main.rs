//! Pool activity monitor - headless server.
//!
//! Watches factory and pool logs on one chain, scores tracked pools with
//! four signal detectors, and dispatches at most one alert per pool
//! qualification.

mod config;
mod recorder;
mod state;

use clap::Parser;
use config::AppConfig;
use recorder::FEED_SOURCE;
use state::{create_state, SharedState};
use std::time::Duration;
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use poolwatch_alerts::{AlertSink, Dispatcher, LogSink, WebhookSink};
use poolwatch_engine::SignalEngine;
use poolwatch_feeds::{
    ChainEventFeed, HttpSentimentOracle, PoolRegistry, SentimentCache, SentimentPoller,
};
use poolwatch_store::Store;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Pool monitor CLI
#[derive(Parser, Debug)]
#[command(name = "poolwatch")]
#[command(about = "Multi-signal on-chain liquidity pool monitor", long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "config.json")]
    config: String,

    /// Log level: trace, debug, info, warn, error
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// SQLite database URL, overriding the config file
    #[arg(short, long)]
    database_url: Option<String>,

    /// Validate the configuration and exit
    #[arg(long, default_value_t = false)]
    check_config: bool,
}

fn init_logging(level: &str) {
    let level = match level {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .expect("Failed to set tracing subscriber");
}

/// Load and validate configuration. A missing file falls back to the
/// defaults; a malformed or invalid one is fatal.
fn load_config(args: &Args) -> Result<AppConfig, config::ConfigError> {
    let mut config = if std::path::Path::new(&args.config).exists() {
        AppConfig::load(&args.config)?
    } else {
        info!("no config file at {}, using defaults", args.config);
        AppConfig::default()
    };
    if let Some(url) = &args.database_url {
        config.database_url = url.clone();
    }
    config.log_level = args.log_level.clone();
    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();

    let args = Args::parse();
    init_logging(&args.log_level);

    info!("pool monitor starting");

    // Configuration problems are the only fatal errors. Everything after
    // startup degrades and retries instead of exiting.
    let config = match load_config(&args) {
        Ok(config) => config,
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    };

    if args.check_config {
        info!("configuration OK");
        return;
    }

    let state = create_state();
    state.start();

    if let Err(e) = run(config, state).await {
        error!("{}", e);
        std::process::exit(1);
    }
}

async fn run(
    config: AppConfig,
    state: SharedState,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let store = Store::open(&config.database_url).await?;

    // Warm restart: tracked pools, the resume block and per-pool strategy
    // state all come back from the store before anything connects.
    let registry = PoolRegistry::new(config.chain, config.quote_book()?);
    let pools = store.load_pools().await?;
    let restored_pools = pools.len();
    for pool in pools {
        registry.restore(pool);
    }
    let resume_block = store.load_checkpoint(FEED_SOURCE).await?.unwrap_or(0);
    let checkpoint = Arc::new(AtomicU64::new(resume_block));
    let snapshots = store.load_snapshots().await?;
    info!(
        "warm restart: {} pool(s), {} strategy snapshot(s), resuming after block {}",
        restored_pools,
        snapshots.len(),
        resume_block
    );

    let sentiment = Arc::new(SentimentCache::new(config.sentiment.staleness_secs));

    // Channel chain: feed -> recorder -> engine -> dispatcher.
    let (feed_tx, feed_rx) = mpsc::channel(4096);
    let (engine_tx, engine_rx) = mpsc::channel(4096);
    let (alerts_tx, alerts_rx) = mpsc::channel(256);
    let (snapshots_tx, snapshots_rx) = mpsc::channel(1024);

    let feed = ChainEventFeed::new(
        config.feed_settings(),
        config.decoder()?,
        registry.clone(),
        Arc::clone(&checkpoint),
        feed_tx,
    );
    let engine = SignalEngine::new(
        config.detector.clone(),
        config.aggregator.clone(),
        registry.clone(),
        Arc::clone(&sentiment),
        Arc::clone(&state.stats),
    );
    let sink: Arc<dyn AlertSink> = match &config.webhook_url {
        Some(url) => {
            info!("alerts go to the webhook at {}", url);
            Arc::new(WebhookSink::new(url)?)
        }
        None => {
            warn!("no webhook configured, alerts go to the log only");
            Arc::new(LogSink)
        }
    };
    let dispatcher = Dispatcher::new(store.clone(), sink, config.dispatcher.clone());

    let mut feed_handle = tokio::spawn(feed.run(Arc::clone(&state.running)));
    let recorder_handle = tokio::spawn(recorder::run_event_recorder(
        store.clone(),
        feed_rx,
        engine_tx,
    ));
    let engine_handle = tokio::spawn(engine.run(engine_rx, snapshots, alerts_tx, snapshots_tx));
    let dispatcher_handle = tokio::spawn(dispatcher.run(alerts_rx));
    let snapshot_handle = tokio::spawn(recorder::run_snapshot_saver(store.clone(), snapshots_rx));
    let checkpoint_handle = tokio::spawn(recorder::run_checkpoint_saver(
        store.clone(),
        Arc::clone(&checkpoint),
        Arc::clone(&state.running),
    ));
    let maintenance_handle = tokio::spawn(recorder::run_store_maintenance(
        store.clone(),
        config.event_retention_days,
        Arc::clone(&state.running),
    ));

    let poller_handle = match &config.sentiment.url {
        Some(url) => {
            let oracle = HttpSentimentOracle::new(url, config.sentiment.request_timeout_ms)?;
            let poller = SentimentPoller::new(
                Arc::new(oracle),
                Arc::clone(&sentiment),
                registry.clone(),
                config.sentiment.poll_interval_secs,
            );
            Some(tokio::spawn(poller.run(Arc::clone(&state.running))))
        }
        None => {
            warn!("no sentiment service configured, sentiment signals stay dark");
            None
        }
    };

    let stats_state = state.clone();
    let stats_registry = registry.clone();
    let stats_handle = tokio::spawn(async move {
        run_stats_reporter(stats_state, stats_registry).await;
    });

    info!("pool monitor running, press Ctrl+C to stop");

    tokio::signal::ctrl_c()
        .await
        .expect("Failed to listen for Ctrl+C");

    warn!("Shutdown signal received");
    state.stop();

    // The feed stops on the flag and drops its sender; the drain then
    // cascades recorder -> engine -> dispatcher along the channel chain.
    // The engine gets the longest window since its lanes flush snapshots.
    let _ = tokio::time::timeout(Duration::from_secs(5), &mut feed_handle).await;
    // The socket may be blocked on remote I/O rather than the flag check.
    feed_handle.abort();
    let _ = tokio::time::timeout(Duration::from_secs(5), recorder_handle).await;
    let _ = tokio::time::timeout(Duration::from_secs(10), engine_handle).await;
    let _ = tokio::time::timeout(Duration::from_secs(5), snapshot_handle).await;
    let _ = tokio::time::timeout(Duration::from_secs(10), dispatcher_handle).await;
    let _ = tokio::time::timeout(Duration::from_secs(2), checkpoint_handle).await;
    let _ = tokio::time::timeout(Duration::from_secs(2), maintenance_handle).await;
    if let Some(handle) = poller_handle {
        let _ = tokio::time::timeout(Duration::from_secs(2), handle).await;
    }
    let _ = tokio::time::timeout(Duration::from_secs(2), stats_handle).await;

    let summary = state.stats_summary();
    info!("Final stats:");
    info!("  Uptime: {} seconds", summary.uptime_secs);
    info!("  Events processed: {}", summary.events_processed);
    info!("  Invalid events: {}", summary.invalid_events);
    info!("  Alerts emitted: {}", summary.alerts_emitted);
    info!("  Resume block: {}", checkpoint.load(Ordering::Relaxed));

    info!("pool monitor stopped");
    Ok(())
}

/// Periodic status line. Checks the running flag every 100ms so shutdown
/// stays prompt, reports every 30 seconds.
async fn run_stats_reporter(state: SharedState, registry: PoolRegistry) {
    info!("stats reporter started");
    loop {
        for _ in 0..300 {
            if !state.is_running() {
                info!("stats reporter stopped");
                return;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        let summary = state.stats_summary();
        info!(
            "up {}s | pools {} | machines {} | events {} | invalid {} | alerts {}",
            summary.uptime_secs,
            registry.len(),
            summary.pools_tracked,
            summary.events_processed,
            summary.invalid_events,
            summary.alerts_emitted
        );
    }
}
