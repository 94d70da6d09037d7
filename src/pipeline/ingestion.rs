//! Single-writer ingestion loop and live session wiring
//!
//! The connection manager runs in its own task and forwards `LiveMessage`s
//! over a bounded channel. One ingestion task owns the coordinator, applies
//! messages strictly in receipt order, and publishes a fresh snapshot through
//! a `watch` channel after each drained batch.

use super::buckets::TimeRange;
use super::engine::{AggregationCoordinator, DashboardSnapshot};
use crate::streamer_core::backoff::ExponentialBackoff;
use crate::streamer_core::connection::{ConnectionManager, ConnectionStats, LiveMessage, Transport};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Duration, Instant};

pub const DEFAULT_LOG_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionCommand {
    ChangeRange(TimeRange),
    Shutdown,
}

/// What the ingestion loop hands back when it stops
pub struct IngestionReport {
    pub coordinator: AggregationCoordinator,
    pub applied: u64,
    pub published: u64,
}

/// Apply live messages and session commands until the live channel closes
///
/// Messages already queued behind the one just received are drained before
/// publishing, so a burst yields a single snapshot.
pub async fn run_ingestion(
    mut coordinator: AggregationCoordinator,
    mut rx: mpsc::Receiver<LiveMessage>,
    mut commands: mpsc::Receiver<SessionCommand>,
    snapshots: watch::Sender<DashboardSnapshot>,
    log_interval: Duration,
) -> IngestionReport {
    log::info!("🚀 Starting ingestion loop");
    log::info!("   ├─ Range: {}", coordinator.range().as_str());
    log::info!("   └─ Throughput log every {}ms", log_interval.as_millis());

    let mut log_timer = interval_at(Instant::now() + log_interval, log_interval);
    let mut last_log_time = Instant::now();
    let mut applied = 0u64;
    let mut applied_since_log = 0u64;
    let mut published = 0u64;
    let mut commands_open = true;

    loop {
        tokio::select! {
            message = rx.recv() => {
                let Some(message) = message else {
                    log::info!("Live channel closed, stopping ingestion");
                    break;
                };

                coordinator.apply(message);
                let mut batch = 1u64;
                while let Ok(message) = rx.try_recv() {
                    coordinator.apply(message);
                    batch += 1;
                }

                applied += batch;
                applied_since_log += batch;
                snapshots.send_replace(coordinator.snapshot());
                published += 1;
            }

            command = commands.recv(), if commands_open => {
                match command {
                    Some(SessionCommand::ChangeRange(range)) => {
                        coordinator.change_range(range);
                        snapshots.send_replace(coordinator.snapshot());
                        published += 1;
                    }
                    Some(SessionCommand::Shutdown) => coordinator.shutdown(),
                    None => {
                        // Session handle dropped without an explicit shutdown
                        commands_open = false;
                        coordinator.shutdown();
                    }
                }
            }

            _ = log_timer.tick() => {
                let elapsed = last_log_time.elapsed().as_secs_f64();
                let rate = if elapsed > 0.0 { applied_since_log as f64 / elapsed } else { 0.0 };
                log::info!(
                    "📊 Ingestion: {:.1} msg/sec | events: {} | dropped: {} | connection: {} | channel: {}",
                    rate,
                    coordinator.processed(),
                    coordinator.dropped(),
                    coordinator.connection_state(),
                    rx.len()
                );
                last_log_time = Instant::now();
                applied_since_log = 0;
            }
        }
    }

    snapshots.send_replace(coordinator.snapshot());
    published += 1;

    log::info!("✅ Ingestion stopped after {} messages", applied);
    IngestionReport {
        coordinator,
        applied,
        published,
    }
}

/// Final state of a finished session
pub struct SessionReport {
    pub connection: ConnectionStats,
    pub snapshot: DashboardSnapshot,
}

/// Handle to a running connection task and ingestion task
pub struct LiveSession {
    commands: mpsc::Sender<SessionCommand>,
    snapshots: watch::Receiver<DashboardSnapshot>,
    manager_task: Option<JoinHandle<ConnectionStats>>,
    ingestion_task: Option<JoinHandle<IngestionReport>>,
}

impl LiveSession {
    pub fn start<T>(
        coordinator: AggregationCoordinator,
        transport: T,
        backoff: ExponentialBackoff,
        buffer: usize,
    ) -> Self
    where
        T: Transport + 'static,
    {
        Self::start_with_log_interval(coordinator, transport, backoff, buffer, DEFAULT_LOG_INTERVAL)
    }

    pub fn start_with_log_interval<T>(
        mut coordinator: AggregationCoordinator,
        transport: T,
        backoff: ExponentialBackoff,
        buffer: usize,
        log_interval: Duration,
    ) -> Self
    where
        T: Transport + 'static,
    {
        let (manager, shutdown) = ConnectionManager::new(transport, backoff);
        coordinator.attach_shutdown(shutdown);

        let (tx, rx) = mpsc::channel(buffer.max(1));
        let (command_tx, command_rx) = mpsc::channel(16);
        let (snapshot_tx, snapshot_rx) = watch::channel(coordinator.snapshot());

        let manager_task = tokio::spawn(manager.run(tx));
        let ingestion_task = tokio::spawn(run_ingestion(
            coordinator,
            rx,
            command_rx,
            snapshot_tx,
            log_interval,
        ));

        Self {
            commands: command_tx,
            snapshots: snapshot_rx,
            manager_task: Some(manager_task),
            ingestion_task: Some(ingestion_task),
        }
    }

    pub fn snapshots(&self) -> watch::Receiver<DashboardSnapshot> {
        self.snapshots.clone()
    }

    pub fn latest(&self) -> DashboardSnapshot {
        self.snapshots.borrow().clone()
    }

    /// Returns false once the session has stopped
    pub async fn change_range(&self, range: TimeRange) -> bool {
        self.commands
            .send(SessionCommand::ChangeRange(range))
            .await
            .is_ok()
    }

    /// Stop reconnecting, close the subscription and wait for both tasks
    ///
    /// Only the first call returns a report.
    pub async fn shutdown(&mut self) -> Option<SessionReport> {
        let manager_task = self.manager_task.take()?;
        let ingestion_task = self.ingestion_task.take()?;

        let _ = self.commands.send(SessionCommand::Shutdown).await;

        let connection = match manager_task.await {
            Ok(stats) => stats,
            Err(e) => {
                log::error!("❌ Connection task failed: {}", e);
                ConnectionStats::default()
            }
        };

        let snapshot = match ingestion_task.await {
            Ok(report) => report.coordinator.snapshot(),
            Err(e) => {
                log::error!("❌ Ingestion task failed: {}", e);
                self.latest()
            }
        };

        Some(SessionReport {
            connection,
            snapshot,
        })
    }
}
