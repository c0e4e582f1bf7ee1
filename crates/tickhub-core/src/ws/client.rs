//! Single WebSocket connection with bounded reconnect and subscription replay.
//!
//! A `WsTransport` runs one tokio task that:
//! 1. Connects to the price-stream endpoint.
//! 2. Asks the reconnect handler for the directives that describe the current
//!    subscription set and sends them first. The handler switches the
//!    transport live inside its own critical section, so no directive is both
//!    queued and covered by the replay.
//! 3. Reads messages and forwards text frames to the message handler.
//! 4. Forwards outbound directives queued through [`WsTransport::send`].
//! 5. Sends optional keep-alive pings.
//! 6. Reconnects after a failure, at most `max_reconnect_attempts` times per
//!    outage, then reports a terminal `Disconnected` status.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

use crate::config::HubConfig;
use crate::error::HubError;
use crate::types::{BackoffPolicy, ConnectionStatus, Directive, StatusEvent};
use crate::ws::DirectiveSink;

/// Callback invoked for each received text message.
pub type OnMessageCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// Callback invoked on every status transition.
pub type OnStatusCallback = Arc<dyn Fn(&StatusEvent) + Send + Sync>;

/// Callback invoked after each successful connection. Returns the directives
/// to send before anything else on the new session.
///
/// The argument puts the transport live: it discards directives queued for
/// the previous session and makes [`WsTransport::send`] accept new ones. The
/// handler must call it exactly once, under the same lock that guards both
/// its snapshot and its calls to `send`.
pub type OnReconnectCallback = Arc<dyn Fn(&mut dyn FnMut()) -> Vec<Directive> + Send + Sync>;

/// Outbound queue depth. Directives beyond this are dropped; the next
/// reconnect replay restores the full set anyway.
const OUTBOUND_QUEUE: usize = 256;

/// Configuration for a single WebSocket connection.
#[derive(Debug, Clone)]
pub struct WsConnConfig {
    /// Full WebSocket URL (e.g. `wss://prices.example.com/ws`).
    pub url: String,
    /// Extra HTTP headers for the handshake.
    pub extra_headers: HashMap<String, String>,
    /// Interval between keep-alive pings.
    pub ping_interval: Option<Duration>,
    /// Reconnect attempts per outage.
    pub max_reconnect_attempts: u32,
    /// Base delay between attempts.
    pub reconnect_delay: Duration,
    pub backoff: BackoffPolicy,
    /// Upper bound for exponential backoff.
    pub max_reconnect_delay: Duration,
}

impl WsConnConfig {
    pub fn from_hub_config(config: &HubConfig) -> Self {
        Self {
            url: config.endpoint_url.clone(),
            extra_headers: config.extra_headers.clone(),
            ping_interval: config.ping_interval(),
            max_reconnect_attempts: config.max_reconnect_attempts,
            reconnect_delay: config.reconnect_delay(),
            backoff: config.backoff,
            max_reconnect_delay: config.max_reconnect_delay(),
        }
    }

    /// Delay before reconnect attempt number `attempt` (1-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        match self.backoff {
            BackoffPolicy::Fixed => self.reconnect_delay,
            BackoffPolicy::Exponential => {
                let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
                self.reconnect_delay.saturating_mul(factor).min(self.max_reconnect_delay)
            }
        }
    }
}

#[derive(Default)]
struct Handlers {
    on_message: Option<OnMessageCallback>,
    on_status: Vec<OnStatusCallback>,
    on_reconnect: Option<OnReconnectCallback>,
}

/// State shared between the transport handle and its connection task.
struct Shared {
    status: watch::Sender<ConnectionStatus>,
    handlers: RwLock<Handlers>,
}

impl Shared {
    fn set_status(&self, event: StatusEvent) {
        self.status.send_replace(event.status);
        self.notify(&event);
    }

    fn notify(&self, event: &StatusEvent) {
        let handlers: Vec<OnStatusCallback> =
            self.handlers.read().unwrap_or_else(PoisonError::into_inner).on_status.clone();
        for h in handlers {
            h(event);
        }
    }

    fn message_handler(&self) -> Option<OnMessageCallback> {
        self.handlers.read().unwrap_or_else(PoisonError::into_inner).on_message.clone()
    }

    /// Go live and collect the replay. Status handlers hear about the
    /// transition only after the reconnect handler returned.
    fn go_live(&self, outbound_rx: &mut mpsc::Receiver<String>) -> Vec<Directive> {
        let handler = self.handlers.read().unwrap_or_else(PoisonError::into_inner).on_reconnect.clone();
        let mut live = false;
        let mut mark_live = || {
            if !live {
                while outbound_rx.try_recv().is_ok() {}
                self.status.send_replace(ConnectionStatus::Connected);
                live = true;
            }
        };
        let replay = match handler {
            Some(h) => h(&mut mark_live),
            None => Vec::new(),
        };
        mark_live();
        self.notify(&StatusEvent::new(ConnectionStatus::Connected));
        replay
    }
}

/// The streaming connection, managed by a background tokio task.
pub struct WsTransport {
    config: WsConnConfig,
    shared: Arc<Shared>,
    /// Channel to send outbound messages.
    outbound_tx: Mutex<Option<mpsc::Sender<String>>>,
    /// Shutdown signal sender.
    shutdown_tx: Mutex<Option<watch::Sender<bool>>>,
    /// Task join handle.
    task: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl WsTransport {
    /// Create a new (not yet connected) transport.
    pub fn new(config: WsConnConfig) -> Self {
        let (status, _) = watch::channel(ConnectionStatus::Disconnected);
        Self {
            config,
            shared: Arc::new(Shared { status, handlers: RwLock::new(Handlers::default()) }),
            outbound_tx: Mutex::new(None),
            shutdown_tx: Mutex::new(None),
            task: Mutex::new(None),
        }
    }

    /// Set the handler for inbound text frames, replacing any previous one.
    pub fn on_message(&self, handler: OnMessageCallback) {
        self.shared.handlers.write().unwrap_or_else(PoisonError::into_inner).on_message = Some(handler);
    }

    /// Add a status transition handler.
    pub fn on_status_change(&self, handler: OnStatusCallback) {
        self.shared.handlers.write().unwrap_or_else(PoisonError::into_inner).on_status.push(handler);
    }

    /// Set the handler that supplies the replay directives on each connection.
    pub fn on_reconnect(&self, handler: OnReconnectCallback) {
        self.shared.handlers.write().unwrap_or_else(PoisonError::into_inner).on_reconnect = Some(handler);
    }

    /// Current connection status.
    pub fn status(&self) -> ConnectionStatus {
        *self.shared.status.borrow()
    }

    /// Watch channel over the connection status.
    pub fn watch_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.shared.status.subscribe()
    }

    /// Start the connection task unless one is already running.
    ///
    /// Must be called from within a tokio runtime. After a terminal failure
    /// this starts a fresh task with a new attempt budget.
    pub fn connect(&self) -> Result<(), HubError> {
        let mut task = lock(&self.task);
        if task.as_ref().is_some_and(|t| !t.is_finished()) {
            debug!("[ws] connect() ignored, connection task already running");
            return Ok(());
        }

        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| HubError::WebSocket(format!("no tokio runtime: {e}")))?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (outbound_tx, outbound_rx) = mpsc::channel::<String>(OUTBOUND_QUEUE);
        let config = self.config.clone();
        let shared = self.shared.clone();

        *lock(&self.shutdown_tx) = Some(shutdown_tx);
        *lock(&self.outbound_tx) = Some(outbound_tx);
        *task = Some(runtime.spawn(async move {
            connection_loop(config, shared, outbound_rx, shutdown_rx).await;
        }));
        Ok(())
    }

    /// Queue a directive for transmission. Dropped silently when not connected;
    /// the replay on the next connection covers it.
    pub fn send(&self, directive: &Directive) {
        if self.status() != ConnectionStatus::Connected {
            debug!("[ws] not connected, dropping {} {:?}", directive.event(), directive.symbols());
            return;
        }
        if let Some(tx) = lock(&self.outbound_tx).as_ref()
            && let Err(e) = tx.try_send(directive.to_wire())
        {
            warn!("[ws] outbound queue rejected {}: {e}", directive.event());
        }
    }

    /// Stop the connection and wait for the task to finish.
    pub async fn shutdown(&self) {
        if let Some(tx) = lock(&self.shutdown_tx).take() {
            let _ = tx.send(true);
        }
        lock(&self.outbound_tx).take();
        let task = lock(&self.task).take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }
}

impl DirectiveSink for WsTransport {
    fn send(&self, directive: &Directive) {
        WsTransport::send(self, directive);
    }
}

/// How a connected session ended.
enum SessionEnd {
    Shutdown,
    Lost(String),
}

/// Main connection loop: connect, replay, read/write, reconnect.
async fn connection_loop(
    config: WsConnConfig,
    shared: Arc<Shared>,
    mut outbound_rx: mpsc::Receiver<String>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut attempt: u32 = 0;

    loop {
        if *shutdown_rx.borrow() {
            info!("[ws] shutdown requested");
            shared.set_status(StatusEvent::new(ConnectionStatus::Disconnected));
            return;
        }

        shared.set_status(StatusEvent::new(ConnectionStatus::Connecting));
        info!("[ws] connecting to {} (attempt {attempt})", config.url);

        let connected = tokio::select! {
            res = connect_ws(&config) => res,
            _ = shutdown_rx.changed() => {
                shared.set_status(StatusEvent::new(ConnectionStatus::Disconnected));
                return;
            }
        };

        let failure = match connected {
            Ok(ws_stream) => {
                attempt = 0;
                match run_session(&config, &shared, ws_stream, &mut outbound_rx, &mut shutdown_rx).await {
                    SessionEnd::Shutdown => {
                        shared.set_status(StatusEvent::new(ConnectionStatus::Disconnected));
                        return;
                    }
                    SessionEnd::Lost(reason) => reason,
                }
            }
            Err(e) => {
                error!("[ws] connection failed: {e}");
                e.to_string()
            }
        };

        if attempt >= config.max_reconnect_attempts {
            error!("[ws] giving up after {attempt} reconnect attempt(s): {failure}");
            shared.set_status(StatusEvent::failed(
                ConnectionStatus::Disconnected,
                HubError::ReconnectExhausted { attempts: attempt },
            ));
            return;
        }

        attempt += 1;
        let delay = config.delay_for_attempt(attempt);
        shared.set_status(StatusEvent::failed(ConnectionStatus::Disconnected, HubError::WebSocket(failure)));
        warn!("[ws] disconnected, reconnect attempt {attempt}/{} in {delay:?}", config.max_reconnect_attempts);
        tokio::select! {
            _ = tokio::time::sleep(delay) => {},
            _ = shutdown_rx.changed() => {
                shared.set_status(StatusEvent::new(ConnectionStatus::Disconnected));
                return;
            }
        }
    }
}

type WsStream = tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// Drive one connected session until it fails or shutdown is requested.
async fn run_session(
    config: &WsConnConfig,
    shared: &Shared,
    ws_stream: WsStream,
    outbound_rx: &mut mpsc::Receiver<String>,
    shutdown_rx: &mut watch::Receiver<bool>,
) -> SessionEnd {
    let (mut ws_write, mut ws_read) = ws_stream.split();

    let replay = shared.go_live(outbound_rx);
    info!("[ws] connected");

    for directive in replay {
        debug!("[ws] replaying {} {:?}", directive.event(), directive.symbols());
        if let Err(e) = ws_write.send(Message::Text(directive.to_wire().into())).await {
            error!("[ws] replay send failed: {e}");
            return SessionEnd::Lost(e.to_string());
        }
    }

    let ping_interval = config.ping_interval;
    tokio::pin! {
        let ping_tick = async {
            if let Some(period) = ping_interval {
                let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
                loop {
                    interval.tick().await;
                }
            } else {
                std::future::pending::<()>().await
            }
        };
    }

    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => {
                info!("[ws] shutdown signal received");
                let _ = ws_write.close().await;
                return SessionEnd::Shutdown;
            }

            msg = ws_read.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        if let Some(handler) = shared.message_handler() {
                            handler(&text);
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        let _ = ws_write.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Close(frame))) => {
                        warn!("[ws] received close frame: {frame:?}");
                        return SessionEnd::Lost("closed by server".into());
                    }
                    Some(Err(e)) => {
                        error!("[ws] read error: {e}");
                        return SessionEnd::Lost(e.to_string());
                    }
                    None => {
                        warn!("[ws] stream ended");
                        return SessionEnd::Lost("stream ended".into());
                    }
                    _ => {} // Binary, Pong, Frame: ignored
                }
            }

            Some(msg) = outbound_rx.recv() => {
                if let Err(e) = ws_write.send(Message::Text(msg.into())).await {
                    error!("[ws] send error: {e}");
                    return SessionEnd::Lost(e.to_string());
                }
            }

            _ = &mut ping_tick => {
                if let Err(e) = ws_write.send(Message::Ping(Vec::new().into())).await {
                    error!("[ws] ping send error: {e}");
                    return SessionEnd::Lost(e.to_string());
                }
            }
        }
    }
}

/// Establish a (possibly TLS) WebSocket connection.
async fn connect_ws(config: &WsConnConfig) -> Result<WsStream, HubError> {
    use tokio_tungstenite::tungstenite::client::IntoClientRequest;
    use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};

    let mut request =
        config.url.as_str().into_client_request().map_err(|e| HubError::WebSocket(e.to_string()))?;

    for (key, value) in &config.extra_headers {
        let name = HeaderName::from_bytes(key.as_bytes())
            .map_err(|e| HubError::Config(format!("invalid header name '{key}': {e}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| HubError::Config(format!("invalid header value for '{key}': {e}")))?;
        request.headers_mut().insert(name, value);
    }

    let (stream, _response) =
        tokio_tungstenite::connect_async(request).await.map_err(|e| HubError::WebSocket(e.to_string()))?;
    Ok(stream)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::net::TcpListener;

    use crate::types::Symbol;

    fn test_config(url: String) -> WsConnConfig {
        WsConnConfig {
            url,
            extra_headers: HashMap::new(),
            ping_interval: None,
            max_reconnect_attempts: 2,
            reconnect_delay: Duration::from_millis(20),
            backoff: BackoffPolicy::Fixed,
            max_reconnect_delay: Duration::from_secs(1),
        }
    }

    async fn wait_for(rx: &mut watch::Receiver<ConnectionStatus>, want: ConnectionStatus) {
        tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|s| *s == want))
            .await
            .expect("timed out waiting for status")
            .expect("status channel closed");
    }

    #[test]
    fn fixed_backoff_is_constant() {
        let cfg = test_config("ws://127.0.0.1:1".into());
        assert_eq!(cfg.delay_for_attempt(1), Duration::from_millis(20));
        assert_eq!(cfg.delay_for_attempt(5), Duration::from_millis(20));
    }

    #[test]
    fn exponential_backoff_doubles_and_caps() {
        let mut cfg = test_config("ws://127.0.0.1:1".into());
        cfg.backoff = BackoffPolicy::Exponential;
        cfg.reconnect_delay = Duration::from_millis(100);
        cfg.max_reconnect_delay = Duration::from_millis(350);
        assert_eq!(cfg.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(cfg.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(cfg.delay_for_attempt(3), Duration::from_millis(350));
        assert_eq!(cfg.delay_for_attempt(40), Duration::from_millis(350));
    }

    #[test]
    fn send_before_connect_is_dropped() {
        let transport = WsTransport::new(test_config("ws://127.0.0.1:1".into()));
        transport.send(&Directive::Subscribe(vec![]));
        assert_eq!(transport.status(), ConnectionStatus::Disconnected);
    }

    #[tokio::test]
    async fn exhausts_attempts_against_closed_port() {
        // Bind then drop to get a port nothing listens on.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let transport = WsTransport::new(test_config(format!("ws://{addr}")));
        let events: Arc<Mutex<Vec<StatusEvent>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        transport.on_status_change(Arc::new(move |ev: &StatusEvent| sink.lock().unwrap().push(ev.clone())));

        transport.connect().unwrap();
        let task = transport.task.lock().unwrap().take().unwrap();
        tokio::time::timeout(Duration::from_secs(5), task).await.unwrap().unwrap();

        let events = events.lock().unwrap();
        let last = events.last().unwrap();
        assert_eq!(last.status, ConnectionStatus::Disconnected);
        assert_eq!(last.error, Some(HubError::ReconnectExhausted { attempts: 2 }));
        let connecting = events.iter().filter(|e| e.status == ConnectionStatus::Connecting).count();
        assert_eq!(connecting, 3); // initial attempt + 2 retries
    }

    #[tokio::test]
    async fn replays_and_forwards_messages() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
            let first = ws.next().await.unwrap().unwrap();
            ws.send(Message::Text(r#"{"prices":{"btc":{"usd":1}}}"#.into())).await.unwrap();
            let second = ws.next().await.unwrap().unwrap();
            (first.into_text().unwrap().as_str().to_owned(), second.into_text().unwrap().as_str().to_owned())
        });

        let transport = WsTransport::new(test_config(format!("ws://{addr}")));
        let received = Arc::new(AtomicUsize::new(0));
        let counter = received.clone();
        transport.on_message(Arc::new(move |_text: &str| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        transport.on_reconnect(Arc::new(|go_live: &mut dyn FnMut()| {
            go_live();
            vec![Directive::Subscribe(vec![Symbol::parse("btc").unwrap()])]
        }));

        let mut status = transport.watch_status();
        transport.connect().unwrap();
        transport.connect().unwrap(); // idempotent
        wait_for(&mut status, ConnectionStatus::Connected).await;

        transport.send(&Directive::Unsubscribe(vec![Symbol::parse("btc").unwrap()]));

        let (first, second) = tokio::time::timeout(Duration::from_secs(5), server).await.unwrap().unwrap();
        assert_eq!(first, r#"{"event":"subscribe","data":["BTC"]}"#);
        assert_eq!(second, r#"{"event":"unsubscribe","data":["BTC"]}"#);
        tokio::time::timeout(Duration::from_secs(5), async {
            while received.load(Ordering::SeqCst) == 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("price message never delivered");

        transport.shutdown().await;
        assert_eq!(transport.status(), ConnectionStatus::Disconnected);
    }

    #[tokio::test]
    async fn send_racing_the_replay_is_not_duplicated() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
            let first = ws.next().await.unwrap().unwrap();
            let extra = tokio::time::timeout(Duration::from_millis(200), ws.next()).await;
            (first.into_text().unwrap().as_str().to_owned(), extra.is_err())
        });

        let transport = Arc::new(WsTransport::new(test_config(format!("ws://{addr}"))));
        let weak = Arc::downgrade(&transport);
        transport.on_reconnect(Arc::new(move |go_live: &mut dyn FnMut()| {
            let btc = vec![Symbol::parse("btc").unwrap()];
            // A subscribe landing between handshake and snapshot. The transport
            // is not live yet, so the snapshot is the only copy that goes out.
            if let Some(t) = weak.upgrade() {
                t.send(&Directive::Subscribe(btc.clone()));
            }
            go_live();
            vec![Directive::Subscribe(btc)]
        }));

        transport.connect().unwrap();
        let (first, nothing_else) = tokio::time::timeout(Duration::from_secs(5), server).await.unwrap().unwrap();
        assert_eq!(first, r#"{"event":"subscribe","data":["BTC"]}"#);
        assert!(nothing_else, "subscribe was sent twice");

        transport.shutdown().await;
    }
}
