//! Live subscription state machine
//!
//! `ConnectionManager` owns the transport exclusively and walks
//! `Idle -> Connecting -> Open -> Backoff -> Connecting ...` until a shutdown
//! is requested, at which point it tears the subscription down and parks in
//! `Closing`. Parsed events and every state transition are handed to an
//! `EventSink`; nothing else observes or mutates the connection state.

use super::backoff::ExponentialBackoff;
use crate::pipeline::types::{log_prefix, EventRecord, PayloadError};
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, watch};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Open,
    Closing,
    Backoff { attempt: u32, delay: Duration },
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Idle => write!(f, "idle"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Open => write!(f, "open"),
            ConnectionState::Closing => write!(f, "closing"),
            ConnectionState::Backoff { attempt, delay } => {
                write!(f, "backoff(attempt={}, delay={}ms)", attempt, delay.as_millis())
            }
        }
    }
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("connect failed: {0}")]
    Connect(String),

    #[error("receive failed: {0}")]
    Receive(String),
}

/// The consumer of a sink went away
#[derive(Debug, Error)]
#[error("event sink closed")]
pub struct SinkClosed;

/// Opens live subscriptions against a fixed address
#[async_trait]
pub trait Transport: Send {
    async fn connect(&mut self) -> Result<Box<dyn LiveConnection>, TransportError>;
}

/// One established subscription
#[async_trait]
pub trait LiveConnection: Send {
    /// Next text payload; `None` once the remote has closed the subscription
    async fn next_message(&mut self) -> Option<Result<String, TransportError>>;

    async fn close(&mut self);
}

/// Receiver of everything the connection manager produces
#[async_trait]
pub trait EventSink: Send {
    async fn on_event(&mut self, record: EventRecord) -> Result<(), SinkClosed>;

    async fn on_state_change(&mut self, state: ConnectionState) -> Result<(), SinkClosed>;

    async fn on_malformed(&mut self, _error: &PayloadError) -> Result<(), SinkClosed> {
        Ok(())
    }
}

/// Messages forwarded from the connection task to the single writer
#[derive(Debug, Clone, PartialEq)]
pub enum LiveMessage {
    Event(EventRecord),
    State(ConnectionState),
    Dropped,
}

#[async_trait]
impl EventSink for mpsc::Sender<LiveMessage> {
    async fn on_event(&mut self, record: EventRecord) -> Result<(), SinkClosed> {
        self.send(LiveMessage::Event(record)).await.map_err(|_| SinkClosed)
    }

    async fn on_state_change(&mut self, state: ConnectionState) -> Result<(), SinkClosed> {
        self.send(LiveMessage::State(state)).await.map_err(|_| SinkClosed)
    }

    async fn on_malformed(&mut self, _error: &PayloadError) -> Result<(), SinkClosed> {
        self.send(LiveMessage::Dropped).await.map_err(|_| SinkClosed)
    }
}

/// Requests manager shutdown; cloning and repeated calls are harmless
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownHandle {
    pub fn shutdown(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_shutdown(&self) -> bool {
        *self.tx.borrow()
    }
}

/// Manager side of the shutdown channel
#[derive(Debug)]
pub struct ShutdownSignal {
    rx: watch::Receiver<bool>,
}

impl ShutdownSignal {
    /// Resolves once shutdown was requested or every handle was dropped
    pub async fn wait(&mut self) {
        loop {
            if *self.rx.borrow_and_update() {
                return;
            }
            if self.rx.changed().await.is_err() {
                return;
            }
        }
    }
}

pub fn shutdown_channel() -> (ShutdownHandle, ShutdownSignal) {
    let (tx, rx) = watch::channel(false);
    (ShutdownHandle { tx: Arc::new(tx) }, ShutdownSignal { rx })
}

enum PumpOutcome {
    Shutdown,
    SinkClosed,
    Ended(Option<TransportError>),
}

/// Counters kept by the manager for its final log line
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectionStats {
    pub connects: u64,
    pub delivered: u64,
    pub dropped: u64,
}

pub struct ConnectionManager<T: Transport> {
    transport: T,
    backoff: ExponentialBackoff,
    state: ConnectionState,
    shutdown: ShutdownSignal,
    stats: ConnectionStats,
}

impl<T: Transport> ConnectionManager<T> {
    pub fn new(transport: T, backoff: ExponentialBackoff) -> (Self, ShutdownHandle) {
        let (handle, signal) = shutdown_channel();
        (Self::with_shutdown(transport, backoff, signal), handle)
    }

    pub fn with_shutdown(transport: T, backoff: ExponentialBackoff, shutdown: ShutdownSignal) -> Self {
        Self {
            transport,
            backoff,
            state: ConnectionState::Idle,
            shutdown,
            stats: ConnectionStats::default(),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    async fn set_state<S: EventSink>(
        &mut self,
        sink: &mut S,
        state: ConnectionState,
    ) -> Result<(), SinkClosed> {
        self.state = state;
        match state {
            ConnectionState::Open => log::info!("✅ Live subscription open"),
            ConnectionState::Closing => log::info!("🛑 Live subscription closing"),
            ConnectionState::Backoff { attempt, delay } => log::warn!(
                "⏳ Reconnect attempt {} in {}ms",
                attempt + 1,
                delay.as_millis()
            ),
            _ => log::debug!("Connection state: {}", state),
        }
        sink.on_state_change(state).await
    }

    /// Drive the subscription until shutdown or until the sink goes away
    pub async fn run<S: EventSink>(mut self, mut sink: S) -> ConnectionStats {
        loop {
            if self.set_state(&mut sink, ConnectionState::Connecting).await.is_err() {
                break;
            }

            let connected = tokio::select! {
                biased;
                _ = self.shutdown.wait() => break,
                result = self.transport.connect() => result,
            };

            match connected {
                Ok(mut conn) => {
                    self.stats.connects += 1;
                    self.backoff.reset();

                    if self.set_state(&mut sink, ConnectionState::Open).await.is_err() {
                        conn.close().await;
                        break;
                    }

                    match self.pump(conn.as_mut(), &mut sink).await {
                        PumpOutcome::Shutdown | PumpOutcome::SinkClosed => {
                            conn.close().await;
                            break;
                        }
                        PumpOutcome::Ended(Some(e)) => {
                            log::warn!("⚠️  Live subscription failed: {}", e);
                            conn.close().await;
                        }
                        PumpOutcome::Ended(None) => {
                            log::warn!("⚠️  Live subscription closed by remote");
                        }
                    }
                }
                Err(e) => {
                    log::warn!("⚠️  Connect failed: {}", e);
                }
            }

            let (attempt, delay) = self.backoff.next_delay();
            if self
                .set_state(&mut sink, ConnectionState::Backoff { attempt, delay })
                .await
                .is_err()
            {
                break;
            }

            tokio::select! {
                biased;
                _ = self.shutdown.wait() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        let _ = self.set_state(&mut sink, ConnectionState::Closing).await;
        log::info!(
            "Connection manager stopped: {} connects, {} delivered, {} dropped",
            self.stats.connects,
            self.stats.delivered,
            self.stats.dropped
        );
        self.stats
    }

    async fn pump<S: EventSink>(&mut self, conn: &mut dyn LiveConnection, sink: &mut S) -> PumpOutcome {
        loop {
            let next = tokio::select! {
                biased;
                _ = self.shutdown.wait() => return PumpOutcome::Shutdown,
                next = conn.next_message() => next,
            };

            let payload = match next {
                Some(Ok(payload)) => payload,
                Some(Err(e)) => return PumpOutcome::Ended(Some(e)),
                None => return PumpOutcome::Ended(None),
            };

            let delivered = match EventRecord::from_json(&payload) {
                Ok(record) => {
                    self.stats.delivered += 1;
                    sink.on_event(record).await
                }
                Err(e) => {
                    self.stats.dropped += 1;
                    log::warn!(
                        "⚠️  Dropped malformed payload: {} (payload: {})",
                        e,
                        log_prefix(&payload)
                    );
                    sink.on_malformed(&e).await
                }
            };

            if delivered.is_err() {
                return PumpOutcome::SinkClosed;
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tokio::time::Instant;

    /// How a scripted connection behaves after its messages run out
    #[derive(Debug, Clone, Copy)]
    pub enum Ending {
        RemoteClose,
        Error,
        Hang,
    }

    #[derive(Debug, Clone)]
    pub enum Step {
        Refuse,
        Serve(Vec<String>, Ending),
    }

    /// In-memory transport that plays back a fixed script of connect attempts
    pub struct ScriptedTransport {
        steps: VecDeque<Step>,
        pub connects: Arc<Mutex<Vec<Instant>>>,
        pub closes: Arc<AtomicUsize>,
    }

    impl ScriptedTransport {
        pub fn new(steps: Vec<Step>) -> Self {
            Self {
                steps: steps.into(),
                connects: Arc::new(Mutex::new(Vec::new())),
                closes: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    struct ScriptedConnection {
        messages: VecDeque<String>,
        ending: Ending,
        closes: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn connect(&mut self) -> Result<Box<dyn LiveConnection>, TransportError> {
            self.connects.lock().unwrap().push(Instant::now());
            match self.steps.pop_front().unwrap_or(Step::Refuse) {
                Step::Refuse => Err(TransportError::Connect("refused".to_string())),
                Step::Serve(messages, ending) => Ok(Box::new(ScriptedConnection {
                    messages: messages.into(),
                    ending,
                    closes: self.closes.clone(),
                })),
            }
        }
    }

    #[async_trait]
    impl LiveConnection for ScriptedConnection {
        async fn next_message(&mut self) -> Option<Result<String, TransportError>> {
            if let Some(msg) = self.messages.pop_front() {
                return Some(Ok(msg));
            }
            match self.ending {
                Ending::RemoteClose => None,
                Ending::Error => Some(Err(TransportError::Receive("reset".to_string()))),
                Ending::Hang => std::future::pending().await,
            }
        }

        async fn close(&mut self) {
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    pub fn payload(id: &str, ts: i64, status: i32) -> String {
        format!(
            r#"{{"req_id":"{}","timestamp":{},"status":{},"method":"GET","path":"/api"}}"#,
            id, ts, status
        )
    }

    async fn next_backoff(rx: &mut mpsc::Receiver<LiveMessage>) -> (u32, Duration) {
        loop {
            match rx.recv().await {
                Some(LiveMessage::State(ConnectionState::Backoff { attempt, delay })) => {
                    return (attempt, delay)
                }
                Some(_) => continue,
                None => panic!("channel closed before backoff"),
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_doubles_then_resets_after_open() {
        // Test: two refused connects, then an open that errors out
        let transport = ScriptedTransport::new(vec![
            Step::Refuse,
            Step::Refuse,
            Step::Serve(vec![payload("a", 1_700_000_000_000, 200)], Ending::Error),
        ]);
        let connects = transport.connects.clone();
        let (manager, handle) =
            ConnectionManager::new(transport, ExponentialBackoff::from_millis(100, 1_000));
        let (tx, mut rx) = mpsc::channel(64);
        let task = tokio::spawn(manager.run(tx));

        assert_eq!(next_backoff(&mut rx).await, (0, Duration::from_millis(100)));
        assert_eq!(next_backoff(&mut rx).await, (1, Duration::from_millis(200)));
        // Successful open reset the counter
        assert_eq!(next_backoff(&mut rx).await, (0, Duration::from_millis(100)));

        handle.shutdown();
        let stats = task.await.unwrap();
        assert_eq!(stats.connects, 1);
        assert_eq!(stats.delivered, 1);

        let times = connects.lock().unwrap().clone();
        assert!(times.len() >= 3);
        assert_eq!(times[1] - times[0], Duration::from_millis(100));
        assert_eq!(times[2] - times[1], Duration::from_millis(200));
    }

    #[tokio::test(start_paused = true)]
    async fn test_delay_capped_at_max() {
        let transport = ScriptedTransport::new(vec![]);
        let (manager, handle) =
            ConnectionManager::new(transport, ExponentialBackoff::from_millis(100, 300));
        let (tx, mut rx) = mpsc::channel(64);
        let task = tokio::spawn(manager.run(tx));

        let delays: Vec<Duration> = {
            let mut out = Vec::new();
            for _ in 0..5 {
                out.push(next_backoff(&mut rx).await.1);
            }
            out
        };
        assert_eq!(
            delays,
            vec![100, 200, 300, 300, 300]
                .into_iter()
                .map(Duration::from_millis)
                .collect::<Vec<_>>()
        );

        handle.shutdown();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_malformed_payload_dropped_and_delivery_continues() {
        let transport = ScriptedTransport::new(vec![Step::Serve(
            vec![
                payload("a", 1, 200),
                "{not json".to_string(),
                r#"{"req_id":"x","timestamp":1,"status":200,"method":"GET","path":""}"#.to_string(),
                payload("b", 2, 503),
            ],
            Ending::Hang,
        )]);
        let (manager, handle) =
            ConnectionManager::new(transport, ExponentialBackoff::from_millis(10, 10));
        let (tx, mut rx) = mpsc::channel(64);
        let task = tokio::spawn(manager.run(tx));

        let mut events = Vec::new();
        let mut dropped = 0;
        while events.len() < 2 {
            match rx.recv().await.unwrap() {
                LiveMessage::Event(record) => events.push(record.id),
                LiveMessage::Dropped => dropped += 1,
                LiveMessage::State(_) => {}
            }
        }

        assert_eq!(events, vec!["a", "b"]);
        assert_eq!(dropped, 2);

        handle.shutdown();
        let stats = task.await.unwrap();
        assert_eq!(stats.dropped, 2);
    }

    #[tokio::test]
    async fn test_shutdown_closes_open_connection() {
        let transport = ScriptedTransport::new(vec![Step::Serve(vec![], Ending::Hang)]);
        let closes = transport.closes.clone();
        let (manager, handle) =
            ConnectionManager::new(transport, ExponentialBackoff::from_millis(10, 10));
        let (tx, mut rx) = mpsc::channel(64);
        let task = tokio::spawn(manager.run(tx));

        loop {
            if let Some(LiveMessage::State(ConnectionState::Open)) = rx.recv().await {
                break;
            }
        }

        handle.shutdown();
        handle.shutdown();
        task.await.unwrap();

        assert_eq!(closes.load(Ordering::SeqCst), 1);
        let mut last = None;
        while let Ok(msg) = rx.try_recv() {
            last = Some(msg);
        }
        assert_eq!(last, Some(LiveMessage::State(ConnectionState::Closing)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_cancels_backoff_timer() {
        let transport = ScriptedTransport::new(vec![]);
        let connects = transport.connects.clone();
        let (manager, handle) =
            ConnectionManager::new(transport, ExponentialBackoff::from_millis(60_000, 60_000));
        let (tx, mut rx) = mpsc::channel(64);
        let task = tokio::spawn(manager.run(tx));

        next_backoff(&mut rx).await;
        let started = Instant::now();
        handle.shutdown();
        task.await.unwrap();

        assert!(Instant::now() - started < Duration::from_millis(60_000));
        assert_eq!(connects.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_dropped_receiver_stops_manager() {
        let transport = ScriptedTransport::new(vec![Step::Serve(
            vec![payload("a", 1, 200)],
            Ending::Hang,
        )]);
        let (manager, _handle) =
            ConnectionManager::new(transport, ExponentialBackoff::from_millis(10, 10));
        let (tx, rx) = mpsc::channel(1);
        drop(rx);

        let stats = manager.run(tx).await;
        assert_eq!(stats.connects, 0);
    }
}
