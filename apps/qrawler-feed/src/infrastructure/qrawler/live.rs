//! Qrawler Live Socket Client
//!
//! Implements [`LiveConnection`] over a WebSocket. The socket is driven by a
//! task on the tokio runtime; ticks land in a bounded buffer that blocking
//! consumers drain through [`LiveConnection::pull_ticks`].
//!
//! # Reconnection
//!
//! Dropped connections are retried with exponential backoff. The set of
//! desired symbols is kept client-side and re-sent after every reconnect.

use std::collections::{BTreeSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::{Condvar, Mutex};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use super::codec::{CodecError, JsonCodec};
use super::messages::{QrawlerMessage, SubscriptionCommand, WireSymbol};
use super::reconnect::{ReconnectConfig, ReconnectPolicy};
use crate::application::ports::{LiveConnection, ProviderTick};
use crate::domain::market_data::ProviderSymbolRef;
use crate::error::{FeedError, FeedResult};
use crate::infrastructure::metrics::{self, TickDropReason};

/// Default tick buffer capacity.
pub const DEFAULT_BUFFER_CAPACITY: usize = 100_000;

// =============================================================================
// Error Type
// =============================================================================

/// Errors that end one connection attempt.
#[derive(Debug, thiserror::Error)]
pub enum LiveClientError {
    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Codec error.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// Server closed the connection.
    #[error("connection closed")]
    ConnectionClosed,
}

impl LiveClientError {
    /// Metric label.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::WebSocket(_) => "websocket",
            Self::Codec(_) => "codec",
            Self::ConnectionClosed => "closed",
        }
    }
}

// =============================================================================
// Configuration
// =============================================================================

/// Live client configuration.
#[derive(Debug, Clone)]
pub struct LiveClientConfig {
    /// Socket URL.
    pub url: String,
    /// Backoff between connection attempts.
    pub reconnect: ReconnectConfig,
    /// Ticks held before the oldest is discarded.
    pub buffer_capacity: usize,
}

impl LiveClientConfig {
    /// Configuration with default backoff and buffer.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            reconnect: ReconnectConfig::default(),
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
        }
    }

    /// Override the backoff.
    #[must_use]
    pub fn with_reconnect(mut self, reconnect: ReconnectConfig) -> Self {
        self.reconnect = reconnect;
        self
    }

    /// Override the buffer capacity.
    #[must_use]
    pub const fn with_buffer_capacity(mut self, capacity: usize) -> Self {
        self.buffer_capacity = capacity;
        self
    }
}

// =============================================================================
// Shared State
// =============================================================================

#[derive(Default)]
struct TickBuffer {
    items: VecDeque<ProviderTick>,
    closed: bool,
}

struct Shared {
    config: LiveClientConfig,
    codec: JsonCodec,
    desired: Mutex<BTreeSet<WireSymbol>>,
    buffer: Mutex<TickBuffer>,
    ready: Condvar,
    connected: AtomicBool,
}

impl Shared {
    fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::Release);
        metrics::set_websocket_connected(connected);
    }

    fn close(&self) {
        self.buffer.lock().closed = true;
        self.ready.notify_all();
        self.set_connected(false);
    }

    fn handle_text(&self, text: &str) {
        let messages = match self.codec.decode(text) {
            Ok(messages) => messages,
            Err(e) => {
                tracing::warn!(error = %e, "Undecodable live frame");
                metrics::record_websocket_error("codec");
                return;
            }
        };

        let mut received = 0_usize;
        {
            let mut buffer = self.buffer.lock();
            for message in messages {
                match message {
                    QrawlerMessage::Tick(tick) => {
                        if buffer.items.len() >= self.config.buffer_capacity
                            && buffer.items.pop_front().is_some()
                        {
                            metrics::record_tick_dropped(TickDropReason::BufferFull);
                        }
                        buffer.items.push_back(tick.into());
                        received += 1;
                    }
                    QrawlerMessage::Subscribed(ack) => {
                        tracing::debug!(count = ack.symbols.len(), "Subscription acknowledged");
                    }
                    QrawlerMessage::Error(error) => {
                        tracing::warn!(code = error.code, msg = %error.msg, "Live stream error");
                        metrics::record_websocket_error("server");
                    }
                }
            }
        }
        if received > 0 {
            self.ready.notify_all();
        }
    }
}

struct Running {
    commands: mpsc::UnboundedSender<SubscriptionCommand>,
    cancel: CancellationToken,
}

// =============================================================================
// Client
// =============================================================================

/// WebSocket client for the Qrawler live stream.
pub struct QrawlerLiveClient {
    shared: Arc<Shared>,
    runtime: Handle,
    running: Mutex<Option<Running>>,
}

impl QrawlerLiveClient {
    /// Create a client whose socket task runs on `runtime`.
    #[must_use]
    pub fn new(config: LiveClientConfig, runtime: Handle) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                codec: JsonCodec::new(),
                desired: Mutex::new(BTreeSet::new()),
                buffer: Mutex::new(TickBuffer::default()),
                ready: Condvar::new(),
                connected: AtomicBool::new(false),
            }),
            runtime,
            running: Mutex::new(None),
        }
    }

    /// Symbols re-sent on every reconnect.
    #[must_use]
    pub fn desired_symbols(&self) -> Vec<WireSymbol> {
        self.shared.desired.lock().iter().cloned().collect()
    }

    fn send(&self, command: SubscriptionCommand) -> FeedResult<()> {
        let running = self.running.lock();
        let Some(running) = running.as_ref() else {
            return Ok(());
        };
        running
            .commands
            .send(command)
            .map_err(|_| FeedError::ProviderUnavailable("live socket task has ended".to_string()))
    }
}

impl LiveConnection for QrawlerLiveClient {
    fn start(&self) -> FeedResult<()> {
        let mut running = self.running.lock();
        if running.is_some() {
            return Ok(());
        }

        self.shared.buffer.lock().closed = false;
        let (commands, receiver) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        self.runtime
            .spawn(run(Arc::clone(&self.shared), receiver, cancel.clone()));
        *running = Some(Running { commands, cancel });

        tracing::info!(url = %self.shared.config.url, "Live client started");
        Ok(())
    }

    fn stop(&self) {
        let Some(running) = self.running.lock().take() else {
            return;
        };
        running.cancel.cancel();
        self.shared.close();
        tracing::info!("Live client stopped");
    }

    fn subscribe(&self, symbols: &[ProviderSymbolRef]) -> FeedResult<()> {
        let wire: Vec<WireSymbol> = symbols.iter().map(WireSymbol::from).collect();
        self.shared.desired.lock().extend(wire.iter().cloned());
        self.send(SubscriptionCommand::subscribe(wire))
    }

    fn unsubscribe(&self, symbols: &[ProviderSymbolRef]) -> FeedResult<()> {
        let wire: Vec<WireSymbol> = symbols.iter().map(WireSymbol::from).collect();
        {
            let mut desired = self.shared.desired.lock();
            for symbol in &wire {
                desired.remove(symbol);
            }
        }
        self.send(SubscriptionCommand::unsubscribe(wire))
    }

    fn pull_ticks(&self, wait: Duration) -> FeedResult<Vec<ProviderTick>> {
        let mut buffer = self.shared.buffer.lock();
        if buffer.items.is_empty() && !buffer.closed {
            let _ = self.shared.ready.wait_for(&mut buffer, wait);
        }
        if buffer.items.is_empty() && buffer.closed {
            return Err(FeedError::ProviderUnavailable(
                "live connection closed".to_string(),
            ));
        }
        Ok(buffer.items.drain(..).collect())
    }

    fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::Acquire)
    }
}

impl Drop for QrawlerLiveClient {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for QrawlerLiveClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QrawlerLiveClient")
            .field("url", &self.shared.config.url)
            .field("connected", &self.is_connected())
            .field("desired", &self.shared.desired.lock().len())
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Socket Task
// =============================================================================

async fn run(
    shared: Arc<Shared>,
    mut commands: mpsc::UnboundedReceiver<SubscriptionCommand>,
    cancel: CancellationToken,
) {
    let mut policy = ReconnectPolicy::new(shared.config.reconnect.clone());

    while !cancel.is_cancelled() {
        match connect_and_run(&shared, &mut commands, &cancel, &mut policy).await {
            Ok(()) => break,
            Err(e) => {
                shared.set_connected(false);
                tracing::warn!(error = %e, "Live connection error");
                metrics::record_websocket_error(e.kind());

                let delay = match policy.next_delay() {
                    Ok(delay) => delay,
                    Err(e) => {
                        tracing::error!(error = %e, "Giving up on live connection");
                        break;
                    }
                };
                tracing::info!(
                    attempt = policy.attempts(),
                    delay_ms = delay.as_millis(),
                    "Reconnecting to live stream"
                );
                metrics::record_reconnect();

                tokio::select! {
                    () = cancel.cancelled() => break,
                    () = tokio::time::sleep(delay) => {}
                }
            }
        }
    }

    if !cancel.is_cancelled() {
        shared.close();
    }
}

async fn connect_and_run(
    shared: &Shared,
    commands: &mut mpsc::UnboundedReceiver<SubscriptionCommand>,
    cancel: &CancellationToken,
    policy: &mut ReconnectPolicy,
) -> Result<(), LiveClientError> {
    tracing::info!(url = %shared.config.url, "Connecting to live stream");
    let (socket, _response) = tokio::select! {
        () = cancel.cancelled() => return Ok(()),
        connected = tokio_tungstenite::connect_async(shared.config.url.as_str()) => connected?,
    };
    let (mut write, mut read) = socket.split();

    policy.reset();
    shared.set_connected(true);
    tracing::info!("Live stream connected");

    let restore: Vec<WireSymbol> = shared.desired.lock().iter().cloned().collect();
    if !restore.is_empty() {
        tracing::info!(count = restore.len(), "Restoring live subscriptions");
        let text = shared.codec.encode(&SubscriptionCommand::subscribe(restore))?;
        write.send(Message::text(text)).await?;
    }

    loop {
        tokio::select! {
            () = cancel.cancelled() => {
                let _ = write.send(Message::Close(None)).await;
                return Ok(());
            }
            command = commands.recv() => {
                let Some(command) = command else {
                    return Ok(());
                };
                tracing::debug!(
                    action = ?command.action,
                    count = command.symbols.len(),
                    "Sending subscription command"
                );
                write.send(Message::text(shared.codec.encode(&command)?)).await?;
            }
            message = read.next() => {
                match message {
                    Some(Ok(Message::Text(text))) => shared.handle_text(text.as_str()),
                    Some(Ok(Message::Ping(data))) => write.send(Message::Pong(data)).await?,
                    Some(Ok(Message::Close(_))) | None => {
                        tracing::info!("Live stream closed by server");
                        return Err(LiveClientError::ConnectionClosed);
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Err(e.into()),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TICK: &str =
        r#"{"type":"tick","symbol":"IBM","feed":"XNYS","time":"2024-01-02T15:00:00Z","last":"1"}"#;

    fn client(capacity: usize) -> (tokio::runtime::Runtime, QrawlerLiveClient) {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let config = LiveClientConfig::new("ws://127.0.0.1:1").with_buffer_capacity(capacity);
        let client = QrawlerLiveClient::new(config, runtime.handle().clone());
        (runtime, client)
    }

    #[test]
    fn pull_times_out_empty_before_start() {
        let (_runtime, client) = client(10);
        let ticks = client.pull_ticks(Duration::from_millis(5)).unwrap();
        assert!(ticks.is_empty());
        assert!(!client.is_connected());
    }

    #[test]
    fn decoded_ticks_are_drained_in_order() {
        let (_runtime, client) = client(10);
        client.shared.handle_text(&format!("[{TICK},{TICK}]"));
        client.shared.handle_text(r#"{"type":"error","code":1,"msg":"x"}"#);

        let ticks = client.pull_ticks(Duration::ZERO).unwrap();
        assert_eq!(ticks.len(), 2);
        assert!(client.pull_ticks(Duration::ZERO).unwrap().is_empty());
    }

    #[test]
    fn full_buffer_discards_oldest() {
        let (_runtime, client) = client(2);
        let at = |minute: u32| {
            TICK.replace("15:00:00", &format!("15:{minute:02}:00"))
        };
        for minute in 0..3 {
            client.shared.handle_text(&at(minute));
        }
        let ticks = client.pull_ticks(Duration::ZERO).unwrap();
        assert_eq!(ticks.len(), 2);
        assert_eq!(ticks[0].time.to_rfc3339(), "2024-01-02T15:01:00+00:00");
    }

    #[test]
    fn desired_symbols_track_subscriptions_while_stopped() {
        let (_runtime, client) = client(10);
        let ibm = ProviderSymbolRef::new("IBM", "XNYS");
        let aapl = ProviderSymbolRef::new("AAPL", "XNAS");

        client.subscribe(&[ibm.clone(), aapl]).unwrap();
        client.unsubscribe(&[ibm]).unwrap();

        let desired = client.desired_symbols();
        assert_eq!(desired.len(), 1);
        assert_eq!(desired[0].symbol, "AAPL");
        assert_eq!(desired[0].venue, "*");
    }

    #[test]
    fn stop_closes_the_buffer_after_draining() {
        let (_runtime, client) = client(10);
        client.start().unwrap();
        client.start().unwrap();
        client.shared.handle_text(TICK);
        client.stop();
        client.stop();

        assert_eq!(client.pull_ticks(Duration::ZERO).unwrap().len(), 1);
        assert!(matches!(
            client.pull_ticks(Duration::ZERO),
            Err(FeedError::ProviderUnavailable(_))
        ));
    }
}
