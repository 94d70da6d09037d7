//! Live feed runtime
//!
//! Seeds the dashboard state from the history API, subscribes to the live
//! request-log feed, and logs a snapshot summary periodically until CTRL+C.
//!
//! Usage:
//!   cargo run --release --bin logpulse_feed
//!
//! Environment variables:
//!   LOGPULSE_SERVER_URL - API base URL (required)
//!   LOGPULSE_AUTHORIZATION - credential for history and live feed
//!   LOGPULSE_DEFAULT_RANGE - initial chart range (default: 90d)
//!   LOGPULSE_SNAPSHOT_LOG_INTERVAL_MS - summary log interval (default: 10000)

use dotenv::dotenv;
use log::{error, info, warn};
use logpulse::pipeline::{
    config::PipelineConfig,
    engine::{AggregationCoordinator, DashboardSnapshot},
    history::HistoryClient,
    ingestion::LiveSession,
    speedtest::{bytes_to_mbps, percent_change},
    types::current_timestamp_ms,
};
use logpulse::streamer_core::{config::RuntimeConfig, ws_client::WsTransport};
use std::time::Duration;

fn log_snapshot(snapshot: &DashboardSnapshot) {
    let bucket_total: u64 = snapshot.buckets.iter().map(|b| b.counts.total()).sum();
    let bucket_errors: u64 = snapshot.buckets.iter().map(|b| b.counts.error).sum();
    let newest = snapshot
        .window
        .last()
        .map(|r| format!("{} {} {} ({})", r.method, r.path, r.status, r.timestamp))
        .unwrap_or_else(|| "none".to_string());

    info!("📊 Snapshot [{}] connection: {}", snapshot.range.as_str(), snapshot.connection);
    info!("   ├─ Buckets: {} ({} events, {} errors)", snapshot.buckets.len(), bucket_total, bucket_errors);
    info!(
        "   ├─ Trend: all {}/{} | errors {}/{} | 4xx {}/{}",
        snapshot.trend.all.total,
        snapshot.trend.all.last,
        snapshot.trend.errors.total,
        snapshot.trend.errors.last,
        snapshot.trend.bad_requests.total,
        snapshot.trend.bad_requests.last
    );
    info!("   ├─ Window: {} records, newest: {}", snapshot.window.len(), newest);
    info!("   └─ Live: {} processed, {} dropped", snapshot.processed, snapshot.dropped);
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize environment and logging
    dotenv().ok();

    // Logger first so configuration warnings are visible
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .init();

    let runtime_config = RuntimeConfig::from_env()?;

    // NOTE: Workaround for rustls issue
    if rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .is_err()
    {
        warn!("⚠️  Crypto provider already installed");
    }

    let config = PipelineConfig::from_env();

    info!("🚀 LogPulse feed");
    info!("   ├─ Server: {}", runtime_config.server_url);
    info!("   ├─ Live path: {}", runtime_config.ws_path);
    info!("   ├─ Range: {}", config.default_range.as_str());
    info!("   ├─ Window capacity: {}", config.window_capacity);
    info!("   ├─ Error policy: {}", config.error_policy.as_str());
    info!("   ├─ Log filter: {}", runtime_config.rust_log);
    info!(
        "   └─ Backoff: {}ms..{}ms",
        runtime_config.backoff_base_ms, runtime_config.backoff_max_ms
    );

    // Historical seed; failures degrade to empty defaults
    let history = HistoryClient::new(
        &runtime_config.server_url,
        runtime_config.authorization.clone(),
        config.fetch_timeout(),
    )?;
    let seed = history.fetch_seed(config.history_limit).await;

    match history.speedtest_headline(current_timestamp_ms()).await {
        Ok(trend) => {
            let down_last = bytes_to_mbps(trend.download.last);
            let down_avg = bytes_to_mbps(trend.download.avg);
            info!(
                "📶 Speedtest: {} runs ({} in 24h) | down {} Mbps ({:+.1}% vs 7d avg {}) | up {} Mbps avg | ping {}ms avg",
                trend.total.sum,
                trend.total.trending,
                down_last,
                percent_change(down_last, down_avg),
                down_avg,
                bytes_to_mbps(trend.upload.avg),
                trend.ping.avg
            );
        }
        Err(e) => warn!("⚠️  Speedtest metrics unavailable: {}", e),
    }

    let mut coordinator = AggregationCoordinator::from_config(&config);
    coordinator.initialize(seed);
    log_snapshot(&coordinator.snapshot());

    let transport = WsTransport::new(
        &runtime_config.server_url,
        &runtime_config.ws_path,
        runtime_config.authorization.clone(),
    )?;
    info!("🔗 Live feed: {}", transport.url());

    let mut session = LiveSession::start_with_log_interval(
        coordinator,
        transport,
        runtime_config.backoff(),
        config.channel_buffer,
        Duration::from_millis(config.snapshot_log_interval_ms),
    );

    let snapshots = session.snapshots();
    let log_interval = Duration::from_millis(config.snapshot_log_interval_ms);
    let reporter = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(log_interval);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let snapshot = snapshots.borrow().clone();
            log_snapshot(&snapshot);
        }
    });

    info!("🔄 Press CTRL+C to shutdown gracefully");

    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            info!("");
            info!("⚠️  Received CTRL+C, shutting down...");
        }
        Err(err) => {
            error!("❌ Failed to listen for CTRL+C: {}", err);
        }
    }

    reporter.abort();

    if let Some(report) = session.shutdown().await {
        log_snapshot(&report.snapshot);
        info!(
            "✅ Feed stopped at {} ({} connects, {} delivered, {} dropped)",
            current_timestamp_ms(),
            report.connection.connects,
            report.connection.delivered,
            report.connection.dropped
        );
    }

    Ok(())
}
