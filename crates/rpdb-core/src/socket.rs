// Live socket connection: real-time updates, keepalive and reconnect.
//
// One session exists at a time. The session task dials, splits the
// stream and reads frames until the connection drops; the write half
// sits behind a mutex shared with the outbound paths (ping, execution
// responses, close frames). Unclean closes schedule a reconnect with a
// tiered backoff.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex as StdMutex, RwLock as StdRwLock};
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use rpdb_api::model::time::{format_server, local_now};
use rpdb_api::model::{ExecutionResponse, SocketClientMessage, SocketMessage};
use rpdb_api::CLIENT_VERSION;
use secrecy::{ExposeSecret, SecretString};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{ClientRequestBuilder, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::bus::UpdateBus;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

/// Endpoint the socket connects to unless overridden.
pub const DEFAULT_SOCKET_URL: &str = "wss://rpdb.rpjosh.de/api/v1/socket";

/// Read deadline of the connection; the server pings within this
/// window (it uses 10 minutes itself).
pub const KEEPALIVE_TIMEOUT: Duration = Duration::from_secs(6 * 60);

/// Time budget for the handshake.
const DIAL_TIMEOUT: Duration = Duration::from_secs(5);

/// Callback receiving every decoded socket message.
pub type MessageHandler = Arc<dyn Fn(SocketMessage) + Send + Sync>;

/// Wait time before the next reconnect attempt. The tiers grow with
/// the number of contiguous failures; any successful inbound message
/// resets the counter.
pub fn reconnect_timeout(attempts: u32) -> Duration {
    const TIERS: &[(u32, Duration)] = &[
        (2, Duration::from_secs(5)),
        (6, Duration::from_secs(10)),
        (10, Duration::from_secs(120)),
        (15, Duration::from_secs(5 * 60)),
        (25, Duration::from_secs(10 * 60)),
        (50, Duration::from_secs(30 * 60)),
        (90, Duration::from_secs(60 * 60)),
    ];

    for (max, wait) in TIERS {
        if attempts < *max {
            return *wait;
        }
    }
    Duration::from_secs(90 * 60)
}

/// Connection options of the socket.
#[derive(Debug, Clone)]
pub struct SocketOptions {
    /// Whether a socket connection should be used at all.
    pub use_websocket: bool,

    /// URL the server listens on for socket connections.
    pub socket_url: String,

    /// Read deadline; also drives the ping cadence.
    pub keepalive_timeout: Duration,
}

impl Default for SocketOptions {
    fn default() -> Self {
        SocketOptions {
            use_websocket: false,
            socket_url: DEFAULT_SOCKET_URL.to_string(),
            keepalive_timeout: KEEPALIVE_TIMEOUT,
        }
    }
}

/// Reconnecting duplex message channel to the server.
pub struct Socket {
    options: SocketOptions,
    api_key: SecretString,
    bus: Arc<UpdateBus>,
    base_cancel: CancellationToken,

    on_message: StdRwLock<Option<MessageHandler>>,

    /// Write half of the live connection; all outbound frames are
    /// serialized through this mutex.
    writer: Mutex<Option<WsSink>>,

    /// Cancellation scope of the current session.
    session: StdMutex<Option<CancellationToken>>,

    /// Distinguishes a client-side close from a dropped connection, so
    /// the close path does not reconnect.
    intentionally_closed: AtomicBool,

    /// Contiguous failed connection attempts.
    attempts: AtomicU32,
}

impl Socket {
    pub fn new(
        options: SocketOptions,
        api_key: SecretString,
        bus: Arc<UpdateBus>,
        base_cancel: CancellationToken,
    ) -> Self {
        Socket {
            options,
            api_key,
            bus,
            base_cancel,
            on_message: StdRwLock::new(None),
            writer: Mutex::new(None),
            session: StdMutex::new(None),
            intentionally_closed: AtomicBool::new(false),
            attempts: AtomicU32::new(0),
        }
    }

    /// Install the handler for decoded inbound messages.
    pub fn set_on_message(&self, handler: MessageHandler) {
        *self
            .on_message
            .write()
            .unwrap_or_else(|p| p.into_inner()) = Some(handler);
    }

    /// Number of contiguous failed connection attempts.
    pub fn reconnect_attempts(&self) -> u32 {
        self.attempts.load(Ordering::Acquire)
    }

    /// Open a connection to the server. A no-op when the socket is
    /// disabled. Any previous session is closed first; the dial and the
    /// read loop run on a background task.
    pub fn start(self: &Arc<Self>) {
        if !self.options.use_websocket {
            return;
        }
        if self.base_cancel.is_cancelled() {
            debug!("not starting socket: client already shut down");
            return;
        }

        let socket = Arc::clone(self);
        tokio::spawn(async move {
            socket.close_with(1000, "Disconnect").await;

            socket.attempts.fetch_add(1, Ordering::AcqRel);
            socket.intentionally_closed.store(false, Ordering::Release);

            let token = {
                let mut session = socket.session.lock().unwrap_or_else(|p| p.into_inner());
                if let Some(previous) = session.take() {
                    previous.cancel();
                }
                let token = socket.base_cancel.child_token();
                *session = Some(token.clone());
                token
            };

            socket.run_session(token).await;
        });
    }

    /// Close the connection with the given status code and reason and
    /// stay disconnected.
    pub async fn close_with(self: &Arc<Self>, code: u16, reason: &str) {
        let mut writer = self.writer.lock().await;
        let Some(mut sink) = writer.take() else {
            trace!("not closing connection: socket is not connected");
            return;
        };

        // The close handler must not schedule a reconnect for this.
        self.intentionally_closed.store(true, Ordering::Release);

        let frame = CloseFrame {
            code: CloseCode::from(code),
            reason: reason.to_string().into(),
        };
        if let Err(e) = sink.send(Message::Close(Some(frame))).await {
            warn!(error = %e, "failed to close the socket");
        }
        drop(writer);

        let mut session = self.session.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(token) = session.take() {
            token.cancel();
        }
    }

    /// Send an execution response to the server. Failures are logged,
    /// not retried.
    pub async fn send_execution_response(&self, response: ExecutionResponse) {
        let payload = match serde_json::to_string(&SocketClientMessage {
            exec_response: response,
        }) {
            Ok(payload) => payload,
            Err(e) => {
                error!(error = %e, "failed to marshal execution response");
                return;
            }
        };

        let mut writer = self.writer.lock().await;
        match writer.as_mut() {
            Some(sink) => {
                if let Err(e) = sink.send(Message::Text(payload)).await {
                    error!(error = %e, "failed to send execution response to socket");
                }
            }
            None => error!("failed to send execution response: no active connection"),
        }
    }

    // ── Session lifecycle ────────────────────────────────────────────

    /// Handshake request carrying the resume version of the cache.
    fn handshake_request(&self) -> Result<ClientRequestBuilder, String> {
        let uri = self
            .options
            .socket_url
            .parse::<tokio_tungstenite::tungstenite::http::Uri>()
            .map_err(|e| format!("invalid socket url: {e}"))?;

        let (version, version_date) = self.bus.version_info();

        Ok(ClientRequestBuilder::new(uri)
            .with_header("X-Api-Key", self.api_key.expose_secret())
            .with_header("Client-Date", format_server(local_now()))
            .with_header("Client-Version", CLIENT_VERSION)
            .with_header("Version", version.to_string())
            .with_header("Version-Date", version_date.format()))
    }

    async fn run_session(self: Arc<Self>, cancel: CancellationToken) {
        let request = match self.handshake_request() {
            Ok(request) => request,
            Err(e) => {
                warn!(error = %e, "failed to build socket handshake");
                self.schedule_reconnect();
                return;
            }
        };

        debug!(url = %self.options.socket_url, "connecting to socket");
        let stream =
            match tokio::time::timeout(DIAL_TIMEOUT, tokio_tungstenite::connect_async(request))
                .await
            {
                Err(_) => {
                    warn!("failed to connect to socket: dial timed out");
                    self.schedule_reconnect();
                    return;
                }
                Ok(Err(e)) => {
                    warn!(error = %e, "failed to connect to socket");
                    self.schedule_reconnect();
                    return;
                }
                Ok(Ok((stream, _response))) => stream,
            };

        debug!("socket connected");
        let (sink, source) = stream.split();
        *self.writer.lock().await = Some(sink);

        self.read_loop(source, cancel).await;
    }

    async fn read_loop(self: &Arc<Self>, mut source: WsSource, cancel: CancellationToken) {
        let keepalive = self.options.keepalive_timeout;
        let mut ping = tokio::time::interval_at(
            Instant::now() + keepalive.saturating_sub(Duration::from_secs(2)),
            keepalive.saturating_sub(Duration::from_secs(2)),
        );
        let mut deadline = Instant::now() + keepalive;

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!("socket session canceled");
                    return;
                }
                _ = tokio::time::sleep_until(deadline) => {
                    debug!("keepalive deadline missed, closing socket");
                    self.writer.lock().await.take();
                    self.handle_close(1006, "keepalive timeout");
                    return;
                }
                _ = ping.tick() => {
                    if !self.send_ping().await {
                        self.handle_close(1006, "ping failed");
                        return;
                    }
                }
                frame = source.next() => {
                    match frame {
                        Some(Ok(Message::Text(text))) => {
                            // Inbound traffic proves the connection alive.
                            deadline = Instant::now() + keepalive;
                            self.attempts.store(0, Ordering::Release);
                            self.dispatch(&text);
                        }
                        Some(Ok(Message::Close(close))) => {
                            let (code, reason) = match close {
                                Some(frame) => (frame.code.into(), frame.reason.to_string()),
                                None => (1005, String::new()),
                            };
                            self.writer.lock().await.take();
                            self.handle_close(code, &reason);
                            return;
                        }
                        // Pings are answered by the protocol layer.
                        Some(Ok(_)) => {
                            deadline = Instant::now() + keepalive;
                            self.attempts.store(0, Ordering::Release);
                            trace!("socket control frame");
                        }
                        Some(Err(e)) => {
                            self.writer.lock().await.take();
                            self.handle_close(1006, &e.to_string());
                            return;
                        }
                        None => {
                            self.writer.lock().await.take();
                            self.handle_close(1006, "stream ended");
                            return;
                        }
                    }
                }
            }
        }
    }

    async fn send_ping(&self) -> bool {
        let mut writer = self.writer.lock().await;
        let Some(sink) = writer.as_mut() else {
            return false;
        };
        if let Err(e) = sink.send(Message::Ping(Vec::new())).await {
            debug!(error = %e, "keepalive ping failed");
            writer.take();
            return false;
        }
        trace!("keepalive ping sent");
        true
    }

    /// Decode an inbound text frame and hand it to the message handler.
    fn dispatch(&self, text: &str) {
        trace!(message = text, "received socket message");

        match serde_json::from_str::<SocketMessage>(text) {
            Err(e) => {
                debug!(message = text, "undecodable socket message");
                warn!(error = %e, "failed to decode socket message");
            }
            Ok(message) => {
                let handler = self
                    .on_message
                    .read()
                    .unwrap_or_else(|p| p.into_inner())
                    .clone();
                match handler {
                    Some(handler) => handler(message),
                    None => debug!("received socket message but no handler is registered"),
                }
            }
        }
    }

    /// A session ended without the client asking for it: log, cancel
    /// the session scope and schedule a reconnect.
    fn handle_close(self: &Arc<Self>, code: u16, reason: &str) {
        if self.intentionally_closed.load(Ordering::Acquire) {
            debug!("closed socket intentionally from client side");
            return;
        }

        if self.attempts.load(Ordering::Acquire) <= 1 {
            info!(code, reason, "socket closed");
        } else {
            debug!(code, reason, "socket closed");
        }

        let mut session = self.session.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(token) = session.take() {
            token.cancel();
        }
        drop(session);

        self.schedule_reconnect();
    }

    fn schedule_reconnect(self: &Arc<Self>) {
        let wait = reconnect_timeout(self.attempts.load(Ordering::Acquire));
        debug!(seconds = wait.as_secs(), "scheduled socket reconnect");

        let socket = Arc::clone(self);
        tokio::spawn(async move {
            tokio::select! {
                biased;
                _ = socket.base_cancel.cancelled() => {
                    debug!("not reconnecting: client shut down");
                }
                _ = tokio::time::sleep(wait) => {
                    if !socket.intentionally_closed.load(Ordering::Acquire) {
                        socket.start();
                    }
                }
            }
        });
    }
}

// ── Tests ────────────────────────────────────────────────────────────
