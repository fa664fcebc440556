//! Connection lifecycle.
//!
//! A [`Connection`] owns at most one transport at a time and moves through
//! these states:
//!
//! ```text
//!                connect()            001 welcome
//! Disconnected ───────────▶ Connecting ───────────▶ Connected
//!      ▲                        │  ▲                    │
//!      └── handshake failed ────┘  └── transport lost ──┤ (reconnect enabled)
//!                                                       │
//!                         close() / transport lost      ▼
//!                         (reconnect disabled) ───▶ Closing ───▶ Closed
//! ```
//!
//! [`Connection::connect`] returns a [`ConnectionGuard`]. Releasing the guard,
//! or dropping it inside a runtime, closes the connection exactly once no
//! matter how many other callers also close it.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::sync::{Mutex, mpsc, watch};
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};
use twirc_core::{
    MAX_LINE_LEN, Message, MessageKind, is_valid_name, normalize_channel, to_wire,
};

use crate::connector::{Connector, LineSink, LineStream, Transport};
use crate::error::{ConnectionError, ConnectionResult, TransportError, TransportResult};
use crate::privilege::PrivilegeTracker;

/// Capabilities requested during login unless configured otherwise.
pub const DEFAULT_CAPABILITIES: [&str; 3] = [
    "twitch.tv/commands",
    "twitch.tv/membership",
    "twitch.tv/tags",
];

/// Server notices that mean the login was rejected.
const AUTH_FAILURES: &[&str] = &[
    "Login authentication failed",
    "Improperly formatted auth",
    "Login unsuccessful",
];

// =============================================================================
// Configuration
// =============================================================================

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Closing,
    Closed,
}

impl ConnectionState {
    /// `Closing` or `Closed`: the connection will not carry traffic again.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Closing | Self::Closed)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Closing => "closing",
            ConnectionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Automatic reconnection after a mid-session transport failure.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    /// Whether to reconnect at all.
    pub enabled: bool,
    /// Maximum number of attempts (None = unbounded).
    pub max_retries: Option<u32>,
    /// Delay before the first attempt.
    pub initial_delay: Duration,
    /// Upper bound for the delay between attempts.
    pub max_delay: Duration,
    /// Backoff multiplier applied after each failed attempt.
    pub multiplier: f64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            max_retries: None,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            multiplier: 2.0,
        }
    }
}

impl ReconnectPolicy {
    /// A policy that closes the connection on the first transport failure.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Default::default()
        }
    }

    pub fn with_max_retries(mut self, max: u32) -> Self {
        self.max_retries = Some(max);
        self
    }

    pub fn with_delays(mut self, initial: Duration, max: Duration) -> Self {
        self.initial_delay = initial;
        self.max_delay = max;
        self
    }

    /// The delay following `current`, never above `max_delay`.
    pub fn next_delay(&self, current: Duration) -> Duration {
        Duration::try_from_secs_f64(current.as_secs_f64() * self.multiplier)
            .map_or(self.max_delay, |next| next.min(self.max_delay))
    }
}

/// Login and lifecycle settings.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub nickname: String,
    /// OAuth token; `oauth:` is prepended when missing. Anonymous logins
    /// omit `PASS`.
    pub token: Option<String>,
    pub capabilities: Vec<String>,
    /// Channels joined after every successful login.
    pub channels: Vec<String>,
    /// Bound on transport open plus login.
    pub connect_timeout: Duration,
    /// Bound on the farewell written during close.
    pub close_timeout: Duration,
    pub reconnect: ReconnectPolicy,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self::new("justinfan12345")
    }
}

impl ConnectionConfig {
    pub fn new(nickname: impl Into<String>) -> Self {
        Self {
            nickname: nickname.into(),
            token: None,
            capabilities: DEFAULT_CAPABILITIES.iter().map(|c| c.to_string()).collect(),
            channels: Vec::new(),
            connect_timeout: Duration::from_secs(10),
            close_timeout: Duration::from_secs(2),
            reconnect: ReconnectPolicy::default(),
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn with_channel(mut self, channel: impl Into<String>) -> Self {
        self.channels.push(channel.into());
        self
    }

    pub fn with_reconnect(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect = policy;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    fn pass_line(&self) -> Option<String> {
        self.token.as_deref().map(|token| {
            if token.starts_with("oauth:") {
                format!("PASS {token}\r\n")
            } else {
                format!("PASS oauth:{token}\r\n")
            }
        })
    }
}

// =============================================================================
// Connection
// =============================================================================

enum Flow {
    Continue,
    Reconnect(TransportError),
    Stop,
}

/// A chat server connection.
pub struct Connection {
    config: ConnectionConfig,
    connector: Arc<dyn Connector>,
    state: watch::Sender<ConnectionState>,
    writer: Mutex<Option<LineSink>>,
    reader: Mutex<Option<LineStream>>,
    channels: parking_lot::Mutex<BTreeSet<String>>,
    privileges: Arc<PrivilegeTracker>,
    released: AtomicBool,
    shutdown: CancellationToken,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("target", &self.connector.target())
            .field("nickname", &self.config.nickname)
            .field("state", &self.state())
            .finish()
    }
}

impl Connection {
    pub fn new(config: ConnectionConfig, connector: Arc<dyn Connector>) -> Arc<Self> {
        let channels = config
            .channels
            .iter()
            .map(|c| normalize_channel(c))
            .filter(|c| {
                let valid = is_valid_name(c);
                if !valid {
                    warn!(channel = ?c, "Ignoring invalid channel name");
                }
                valid
            })
            .collect();
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Arc::new(Self {
            config,
            connector,
            state,
            writer: Mutex::new(None),
            reader: Mutex::new(None),
            channels: parking_lot::Mutex::new(channels),
            privileges: Arc::new(PrivilegeTracker::new()),
            released: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
        })
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Watches state transitions.
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Channels currently joined (or to be joined on the next login).
    pub fn channels(&self) -> Vec<String> {
        self.channels.lock().iter().cloned().collect()
    }

    /// Privilege learned from the server in the current session. Cleared
    /// whenever the transport is lost.
    pub fn privileges(&self) -> &Arc<PrivilegeTracker> {
        &self.privileges
    }

    /// Cancelled once [`close`](Self::close) starts.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    // -------------------------------------------------------------------------
    // Connect
    // -------------------------------------------------------------------------

    /// Opens the transport, logs in and joins the configured channels.
    ///
    /// Failures are returned to the caller and never retried.
    pub async fn connect(self: &Arc<Self>) -> ConnectionResult<ConnectionGuard> {
        let mut prior = ConnectionState::Disconnected;
        let started = self.state.send_if_modified(|state| {
            prior = *state;
            if *state == ConnectionState::Disconnected {
                *state = ConnectionState::Connecting;
                true
            } else {
                false
            }
        });
        if !started {
            return Err(match prior {
                ConnectionState::Closing | ConnectionState::Closed => ConnectionError::Closed,
                _ => ConnectionError::AlreadyConnected,
            });
        }

        let target = self.connector.target();
        info!(target = %target, nickname = %self.config.nickname, "Connecting");

        let result = match timeout(self.config.connect_timeout, self.open()).await {
            Ok(result) => result,
            Err(_) => Err(ConnectionError::Timeout(self.config.connect_timeout)),
        };

        match result {
            Ok((reader, writer)) => {
                *self.reader.lock().await = Some(reader);
                *self.writer.lock().await = Some(writer);
                if !self.transition(&[ConnectionState::Connecting], ConnectionState::Connected) {
                    // Closed while the handshake was in flight.
                    self.reader.lock().await.take();
                    self.writer.lock().await.take();
                    return Err(ConnectionError::Closed);
                }
                info!(target = %target, "Connected");
                Ok(ConnectionGuard {
                    connection: Arc::clone(self),
                    armed: true,
                })
            }
            Err(e) => {
                warn!(target = %target, error = %e, "Connect failed");
                self.transition(&[ConnectionState::Connecting], ConnectionState::Disconnected);
                Err(e)
            }
        }
    }

    async fn open(&self) -> ConnectionResult<(LineStream, LineSink)> {
        let Transport {
            mut reader,
            mut writer,
        } = self.connector.connect().await?;
        self.login(&mut reader, &mut writer).await?;

        let channels = self.channels();
        for channel in &channels {
            writer.send(format!("JOIN #{channel}\r\n")).await?;
        }
        if !channels.is_empty() {
            debug!(channels = ?channels, "Joined channels");
        }
        Ok((reader, writer))
    }

    async fn login(&self, reader: &mut LineStream, writer: &mut LineSink) -> ConnectionResult<()> {
        if !self.config.capabilities.is_empty() {
            let caps = self.config.capabilities.join(" ");
            writer.send(format!("CAP REQ :{caps}\r\n")).await?;
        }
        if let Some(pass) = self.config.pass_line() {
            writer.send(pass).await?;
        }
        writer
            .send(format!("NICK {}\r\n", self.config.nickname))
            .await?;

        loop {
            let line = match reader.next().await {
                Some(line) => line?,
                None => return Err(TransportError::Closed.into()),
            };
            let message = match Message::parse(&line) {
                Ok(message) => message,
                Err(e) => {
                    warn!(error = %e, line = %line, "Dropping unparsable line during login");
                    continue;
                }
            };

            match message.kind() {
                MessageKind::Raw { command, .. } if command == "001" => return Ok(()),
                MessageKind::Ping { .. } => {
                    if let Some(pong) = message.pong_reply() {
                        writer.send(frame(&pong)?).await?;
                    }
                }
                MessageKind::Notice(_) | MessageKind::GlobalNotice(_) => {
                    let text = message.text().unwrap_or_default();
                    if AUTH_FAILURES.iter().any(|f| text.contains(f)) {
                        return Err(ConnectionError::AuthenticationFailed(text.to_string()));
                    }
                    debug!(notice = %text, "Notice during login");
                }
                _ => trace!(line = %line, "Login traffic"),
            }
        }
    }

    // -------------------------------------------------------------------------
    // Write
    // -------------------------------------------------------------------------

    /// Frames and writes one message.
    ///
    /// Waits while a reconnect is in progress. Writes are serialized, so lines
    /// never interleave on the wire. JOIN and PART update the channel set
    /// used for re-joining.
    pub async fn write(&self, message: &Message) -> TransportResult<()> {
        let line = frame(message)?;
        self.wait_connected().await?;
        self.write_line(line).await?;

        match message.kind() {
            MessageKind::Join { channel } => {
                self.channels.lock().insert(channel.clone());
            }
            MessageKind::Part { channel } => {
                self.channels.lock().remove(channel);
            }
            _ => {}
        }
        Ok(())
    }

    async fn wait_connected(&self) -> TransportResult<()> {
        let mut rx = self.state.subscribe();
        let state = *rx
            .wait_for(|s| {
                matches!(
                    s,
                    ConnectionState::Connected | ConnectionState::Closing | ConnectionState::Closed
                )
            })
            .await
            .map_err(|_| TransportError::Closed)?;
        if state == ConnectionState::Connected {
            Ok(())
        } else {
            Err(TransportError::Closed)
        }
    }

    /// A failed write marks the transport lost, which wakes the read loop
    /// into its reconnect-or-close path.
    async fn write_line(&self, line: String) -> TransportResult<()> {
        let mut writer = self.writer.lock().await;
        let sink = writer.as_mut().ok_or(TransportError::Closed)?;
        trace!(line = %line.trim_end(), "Writing line");
        let result = sink.send(line).await;
        if let Err(e) = &result {
            if self.transition(&[ConnectionState::Connected], ConnectionState::Connecting) {
                debug!(error = %e, "Write failed, transport marked lost");
            }
        }
        result
    }

    // -------------------------------------------------------------------------
    // Read loop
    // -------------------------------------------------------------------------

    /// Reads until the connection closes, forwarding every parsed message to
    /// `events`.
    ///
    /// PINGs are answered before they are forwarded. Unparsable lines are
    /// logged and skipped. A transport failure either reconnects (re-joining
    /// every channel) or closes the connection, depending on the
    /// [`ReconnectPolicy`]. Returns `Ok` when closed by
    /// [`close`](Self::close) or when `events` is dropped.
    pub async fn read_loop(&self, events: mpsc::Sender<Message>) -> ConnectionResult<()> {
        let mut reader = self.reader.lock().await;

        loop {
            let Some(stream) = reader.as_mut() else {
                return if self.shutdown.is_cancelled() {
                    Ok(())
                } else {
                    Err(ConnectionError::Closed)
                };
            };

            let mut state = self.state.subscribe();
            let next = tokio::select! {
                _ = self.shutdown.cancelled() => return Ok(()),
                _ = state.wait_for(|s| *s == ConnectionState::Connecting) => {
                    Some(Err(TransportError::Closed))
                }
                next = stream.next() => next,
            };

            let failure = match next {
                Some(Ok(line)) => match self.handle_line(&line, &events).await {
                    Flow::Continue => continue,
                    Flow::Stop => return Ok(()),
                    Flow::Reconnect(reason) => reason,
                },
                Some(Err(e)) => e,
                None => TransportError::Closed,
            };

            // Writers wait while Connecting, so none sees the sink missing.
            self.transition(&[ConnectionState::Connected], ConnectionState::Connecting);
            reader.take();
            self.writer.lock().await.take();
            if self.shutdown.is_cancelled() {
                return Ok(());
            }

            warn!(error = %failure, "Transport lost");
            self.privileges.clear();
            if !self.config.reconnect.enabled {
                drop(reader);
                self.close().await;
                return Err(ConnectionError::Transport(failure));
            }

            match self.reconnect().await {
                Ok((new_reader, new_writer)) => {
                    *reader = Some(new_reader);
                    *self.writer.lock().await = Some(new_writer);
                    self.transition(&[ConnectionState::Connecting], ConnectionState::Connected);
                }
                Err(ConnectionError::Closed) => return Ok(()),
                Err(e) => {
                    error!(error = %e, "Giving up on the connection");
                    drop(reader);
                    self.close().await;
                    return Err(e);
                }
            }
        }
    }

    async fn handle_line(&self, line: &str, events: &mpsc::Sender<Message>) -> Flow {
        let message = match Message::parse(line) {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, line = %line, "Dropping unparsable line");
                return Flow::Continue;
            }
        };
        trace!(message = %message, "Received");
        self.privileges.observe(&message);

        if let Some(pong) = message.pong_reply() {
            if let Err(e) = self.write(&pong).await {
                warn!(error = %e, "Failed to answer PING");
            }
        }

        let reconnect = matches!(
            message.kind(),
            MessageKind::Raw { command, .. } if command == "RECONNECT"
        );

        let delivered = tokio::select! {
            _ = self.shutdown.cancelled() => false,
            sent = events.send(message) => sent.is_ok(),
        };
        if !delivered {
            return Flow::Stop;
        }

        if reconnect {
            info!("Server requested a reconnect");
            Flow::Reconnect(TransportError::Closed)
        } else {
            Flow::Continue
        }
    }

    async fn reconnect(&self) -> ConnectionResult<(LineStream, LineSink)> {
        let policy = &self.config.reconnect;
        let mut attempts = 0u32;
        let mut delay = policy.initial_delay;

        loop {
            if let Some(max) = policy.max_retries {
                if attempts >= max {
                    return Err(ConnectionError::ReconnectExhausted { attempts });
                }
            }

            warn!(delay = ?delay, attempt = attempts + 1, "Reconnecting...");
            tokio::select! {
                _ = self.shutdown.cancelled() => return Err(ConnectionError::Closed),
                _ = sleep(delay) => {}
            }
            attempts += 1;

            let attempt = tokio::select! {
                _ = self.shutdown.cancelled() => return Err(ConnectionError::Closed),
                result = timeout(self.config.connect_timeout, self.open()) => result,
            };
            match attempt {
                Ok(Ok(pair)) => {
                    info!(attempts, "Reconnected successfully");
                    return Ok(pair);
                }
                Ok(Err(e)) => warn!(error = %e, "Reconnection failed"),
                Err(_) => warn!(timeout = ?self.config.connect_timeout, "Reconnection timed out"),
            }
            delay = policy.next_delay(delay);
        }
    }

    // -------------------------------------------------------------------------
    // Close
    // -------------------------------------------------------------------------

    /// Closes the connection.
    ///
    /// Idempotent and safe to call concurrently: the first caller writes a
    /// best-effort `QUIT` (bounded by the close timeout) and releases the
    /// transport, later callers wait until the connection is closed.
    pub async fn close(&self) {
        if self.released.swap(true, Ordering::SeqCst) {
            let mut rx = self.state.subscribe();
            let _ = rx.wait_for(|s| *s == ConnectionState::Closed).await;
            return;
        }

        self.state.send_replace(ConnectionState::Closing);
        debug!("Closing connection");
        self.shutdown.cancel();

        let farewell = async {
            let mut writer = self.writer.lock().await;
            if let Some(mut sink) = writer.take() {
                if let Err(e) = sink.send("QUIT\r\n".to_string()).await {
                    debug!(error = %e, "Failed to write QUIT");
                }
                if let Err(e) = sink.close().await {
                    debug!(error = %e, "Failed to close transport");
                }
            }
        };
        if timeout(self.config.close_timeout, farewell).await.is_err() {
            warn!(timeout = ?self.config.close_timeout, "Timed out closing transport");
        }

        self.reader.lock().await.take();
        self.state.send_replace(ConnectionState::Closed);
        info!(target = %self.connector.target(), "Connection closed");
    }

    fn transition(&self, from: &[ConnectionState], to: ConnectionState) -> bool {
        self.state.send_if_modified(|state| {
            if from.contains(state) {
                debug!(from = %state, to = %to, "Connection state changed");
                *state = to;
                true
            } else {
                false
            }
        })
    }

    /// Synchronous fallback used when no runtime is available to close.
    fn abandon(&self) {
        if self.released.swap(true, Ordering::SeqCst) {
            return;
        }
        self.shutdown.cancel();
        if let Ok(mut writer) = self.writer.try_lock() {
            writer.take();
        }
        if let Ok(mut reader) = self.reader.try_lock() {
            reader.take();
        }
        self.state.send_replace(ConnectionState::Closed);
    }
}

fn frame(message: &Message) -> TransportResult<String> {
    Ok(to_wire(message, MAX_LINE_LEN)?)
}

// =============================================================================
// Guard
// =============================================================================

/// Scope-bound ownership of an open connection.
///
/// Call [`release`](Self::release) during orderly shutdown. Dropping an
/// unreleased guard closes the connection in the background.
#[must_use = "dropping the guard closes the connection"]
pub struct ConnectionGuard {
    connection: Arc<Connection>,
    armed: bool,
}

impl ConnectionGuard {
    pub fn connection(&self) -> &Arc<Connection> {
        &self.connection
    }

    /// Closes the connection and disarms the guard.
    pub async fn release(mut self) {
        self.armed = false;
        self.connection.close().await;
    }
}

impl fmt::Debug for ConnectionGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionGuard")
            .field("armed", &self.armed)
            .finish()
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let connection = Arc::clone(&self.connection);
                handle.spawn(async move { connection.close().await });
            }
            Err(_) => self.connection.abandon(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connector::{MemoryConnector, MemoryServer, MemorySession};
    use crate::privilege::Privilege;

    fn config() -> ConnectionConfig {
        ConnectionConfig::new("bot")
            .with_channel("#Chan")
            .with_reconnect(
                ReconnectPolicy::default()
                    .with_delays(Duration::from_secs(1), Duration::from_secs(8)),
            )
    }

    async fn open(config: ConnectionConfig) -> (Arc<Connection>, ConnectionGuard, MemoryServer, MemorySession) {
        let (connector, mut server) = MemoryConnector::welcoming("bot");
        let connection = Connection::new(config, Arc::new(connector));
        let guard = connection.connect().await.unwrap();
        let session = server.accept().await.unwrap();
        (connection, guard, server, session)
    }

    #[tokio::test]
    async fn test_login_sequence() {
        let (connector, mut server) = MemoryConnector::pair();
        let connection = Connection::new(config().with_token("abc"), Arc::new(connector));

        let task = tokio::spawn({
            let connection = Arc::clone(&connection);
            async move { connection.connect().await }
        });

        let mut session = server.accept().await.unwrap();
        assert_eq!(
            session.recv().await.unwrap(),
            "CAP REQ :twitch.tv/commands twitch.tv/membership twitch.tv/tags"
        );
        assert_eq!(session.recv().await.unwrap(), "PASS oauth:abc");
        assert_eq!(session.recv().await.unwrap(), "NICK bot");

        session.send("PING :tmi.twitch.tv");
        assert_eq!(session.recv().await.unwrap(), "PONG :tmi.twitch.tv");
        session.send(":tmi.twitch.tv 001 bot :Welcome, GLHF!");

        let guard = task.await.unwrap().unwrap();
        assert_eq!(session.recv().await.unwrap(), "JOIN #chan");
        assert_eq!(connection.state(), ConnectionState::Connected);
        assert_eq!(connection.channels(), vec!["chan".to_string()]);
        guard.release().await;
    }

    #[tokio::test]
    async fn test_auth_failure() {
        let (connector, mut server) = MemoryConnector::pair();
        let connection = Connection::new(config().with_token("oauth:bad"), Arc::new(connector));
        let task = tokio::spawn({
            let connection = Arc::clone(&connection);
            async move { connection.connect().await }
        });

        let session = server.accept().await.unwrap();
        session.send(":tmi.twitch.tv NOTICE * :Login authentication failed");

        let err = task.await.unwrap().unwrap_err();
        assert!(matches!(err, ConnectionError::AuthenticationFailed(_)));
        assert_eq!(connection.state(), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_timeout() {
        let (connector, _server) = MemoryConnector::pair();
        let connection = Connection::new(
            config().with_connect_timeout(Duration::from_secs(5)),
            Arc::new(connector),
        );
        let err = connection.connect().await.unwrap_err();
        assert!(matches!(err, ConnectionError::Timeout(d) if d == Duration::from_secs(5)));
        assert_eq!(connection.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_connect_refused_then_retry_by_caller() {
        let (connector, server) = MemoryConnector::welcoming("bot");
        server.refuse_next(1);
        let connection = Connection::new(config(), Arc::new(connector));

        let err = connection.connect().await.unwrap_err();
        assert!(matches!(err, ConnectionError::Transport(TransportError::ConnectFailed { .. })));
        assert_eq!(server.connects(), 0);

        let guard = connection.connect().await.unwrap();
        assert!(matches!(
            connection.connect().await,
            Err(ConnectionError::AlreadyConnected)
        ));
        guard.release().await;
        assert!(matches!(connection.connect().await, Err(ConnectionError::Closed)));
    }

    #[tokio::test]
    async fn test_read_loop_answers_ping_and_skips_garbage() {
        let (connection, guard, _server, mut session) = open(config()).await;
        let (tx, mut rx) = mpsc::channel(16);
        let reader = tokio::spawn({
            let connection = Arc::clone(&connection);
            async move { connection.read_loop(tx).await }
        });

        session.send("PING :tmi.twitch.tv");
        session.send("PRIVMSG");
        session.send(":alice!alice@alice.tmi.twitch.tv PRIVMSG #chan :hello");

        assert_eq!(
            session.recv_starting_with("PONG").await.unwrap(),
            "PONG :tmi.twitch.tv"
        );
        assert!(rx.recv().await.unwrap().is_ping());
        let chat = rx.recv().await.unwrap();
        assert_eq!(chat.text(), Some("hello"));

        guard.release().await;
        assert!(reader.await.unwrap().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_after_transport_failure() {
        let (connection, _guard, mut server, first) = open(config()).await;
        let (tx, mut rx) = mpsc::channel(16);
        tokio::spawn({
            let connection = Arc::clone(&connection);
            async move { connection.read_loop(tx).await }
        });

        let mut states = connection.subscribe();
        first.fail();

        states
            .wait_for(|s| *s == ConnectionState::Connecting)
            .await
            .unwrap();
        let mut second = server.accept().await.unwrap();
        states
            .wait_for(|s| *s == ConnectionState::Connected)
            .await
            .unwrap();

        assert_eq!(second.recv_starting_with("JOIN").await.unwrap(), "JOIN #chan");
        second.send(":alice!alice@alice.tmi.twitch.tv PRIVMSG #chan :still here");
        let message = rx.recv().await.unwrap();
        assert_eq!(message.text(), Some("still here"));
        assert_eq!(server.connects(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_exhausted_closes() {
        let policy = ReconnectPolicy::default()
            .with_delays(Duration::from_millis(100), Duration::from_secs(1))
            .with_max_retries(2);
        let (connection, _guard, server, session) = open(config().with_reconnect(policy)).await;
        let (tx, _rx) = mpsc::channel(16);

        server.refuse_next(10);
        session.fail();
        let err = connection.read_loop(tx).await.unwrap_err();
        assert!(matches!(err, ConnectionError::ReconnectExhausted { attempts: 2 }));
        assert_eq!(connection.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn test_reconnect_disabled_closes() {
        let config = config().with_reconnect(ReconnectPolicy::disabled());
        let (connection, _guard, _server, session) = open(config).await;
        let (tx, _rx) = mpsc::channel(16);

        session.fail();
        let err = connection.read_loop(tx).await.unwrap_err();
        assert!(matches!(err, ConnectionError::Transport(TransportError::Io(_))));
        assert_eq!(connection.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn test_concurrent_close_releases_once() {
        let (connection, guard, server, mut session) = open(config()).await;

        tokio::join!(connection.close(), connection.close());
        guard.release().await;

        assert_eq!(server.closes(), 1);
        assert_eq!(connection.state(), ConnectionState::Closed);
        assert_eq!(session.recv_starting_with("QUIT").await.unwrap(), "QUIT");
        assert!(matches!(
            connection.write(&Message::join("other").unwrap()).await,
            Err(TransportError::Closed)
        ));
    }

    #[tokio::test]
    async fn test_close_before_connect() {
        let (connector, server) = MemoryConnector::pair();
        let connection = Connection::new(config(), Arc::new(connector));
        connection.close().await;
        connection.close().await;
        assert_eq!(connection.state(), ConnectionState::Closed);
        assert_eq!(server.closes(), 0);
    }

    #[tokio::test]
    async fn test_dropped_guard_closes() {
        let (connection, guard, server, _session) = open(config()).await;
        let mut states = connection.subscribe();
        drop(guard);
        states
            .wait_for(|s| *s == ConnectionState::Closed)
            .await
            .unwrap();
        assert_eq!(server.closes(), 1);
    }

    #[tokio::test]
    async fn test_join_part_tracked() {
        let (connection, guard, _server, mut session) = open(config()).await;
        assert_eq!(session.recv_starting_with("JOIN").await.unwrap(), "JOIN #chan");

        connection.write(&Message::join("#Other").unwrap()).await.unwrap();
        connection.write(&Message::part("chan").unwrap()).await.unwrap();
        assert_eq!(session.recv().await.unwrap(), "JOIN #other");
        assert_eq!(session.recv().await.unwrap(), "PART #chan");
        assert_eq!(connection.channels(), vec!["other".to_string()]);
        guard.release().await;
    }

    #[test]
    fn test_backoff_is_capped() {
        let policy = ReconnectPolicy::default();
        let mut delay = policy.initial_delay;
        for _ in 0..10 {
            delay = policy.next_delay(delay);
        }
        assert_eq!(delay, policy.max_delay);
        assert_eq!(policy.next_delay(Duration::from_secs(1)), Duration::from_secs(2));
    }

    #[test]
    fn test_backoff_saturates_on_huge_multiplier() {
        let policy = ReconnectPolicy {
            multiplier: f64::MAX,
            ..Default::default()
        };
        assert_eq!(policy.next_delay(Duration::from_secs(30)), policy.max_delay);

        let policy = ReconnectPolicy {
            multiplier: f64::INFINITY,
            ..Default::default()
        };
        assert_eq!(policy.next_delay(Duration::from_secs(1)), policy.max_delay);
    }

    #[tokio::test(start_paused = true)]
    async fn test_privilege_forgotten_after_reconnect() {
        let (connection, _guard, mut server, first) = open(config()).await;
        let (tx, mut rx) = mpsc::channel(16);
        tokio::spawn({
            let connection = Arc::clone(&connection);
            async move { connection.read_loop(tx).await }
        });

        first.send("@badges=moderator/1;mod=1 :tmi.twitch.tv USERSTATE #chan");
        assert_eq!(rx.recv().await.unwrap().kind().name(), "UserState");
        assert_eq!(connection.privileges().privilege("chan"), Privilege::Elevated);

        let mut states = connection.subscribe();
        first.fail();
        let _second = server.accept().await.unwrap();
        states
            .wait_for(|s| *s == ConnectionState::Connected)
            .await
            .unwrap();
        assert_eq!(connection.privileges().privilege("chan"), Privilege::Normal);
    }

    #[tokio::test]
    async fn test_invalid_configured_channels_are_ignored() {
        let config = ConnectionConfig::new("bot")
            .with_channel("good")
            .with_channel("bad\r\nPRIVMSG #x :y");
        let (connection, guard, _server, mut session) = open(config).await;
        assert_eq!(connection.channels(), vec!["good".to_string()]);
        assert_eq!(session.recv_starting_with("JOIN").await.unwrap(), "JOIN #good");
        guard.release().await;
        assert_eq!(session.recv_starting_with("JOIN").await, None);
    }
}
