//! In-process connector for tests and simulations.
//!
//! [`MemoryConnector::pair`] returns the connector together with a
//! [`MemoryServer`]. Every successful `connect` hands the server a
//! [`MemorySession`] through which it can push inbound lines, read what the
//! client wrote, or break the transport.

use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::task::{Context, Poll};

use async_trait::async_trait;
use futures::channel::mpsc as fmpsc;
use futures::{FutureExt, Sink, StreamExt};
use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::{Connector, Transport};
use crate::error::{TransportError, TransportResult};

#[derive(Debug)]
struct Shared {
    sessions: mpsc::UnboundedSender<MemorySession>,
    welcome: Option<String>,
    refuse: AtomicU32,
    connects: AtomicUsize,
    closes: Arc<AtomicUsize>,
    orphans: Mutex<Vec<MemorySession>>,
}

/// Connector whose transports are in-memory channels.
#[derive(Debug, Clone)]
pub struct MemoryConnector {
    shared: Arc<Shared>,
}

/// Server side of a [`MemoryConnector`].
#[derive(Debug)]
pub struct MemoryServer {
    sessions: mpsc::UnboundedReceiver<MemorySession>,
    shared: Arc<Shared>,
}

impl MemoryConnector {
    /// Creates a connector/server pair.
    pub fn pair() -> (Self, MemoryServer) {
        Self::build(None)
    }

    /// Like [`pair`](Self::pair), but every new transport starts with a
    /// `001` welcome for `nickname` already queued, so logins succeed
    /// without a scripted server.
    pub fn welcoming(nickname: impl Into<String>) -> (Self, MemoryServer) {
        Self::build(Some(nickname.into()))
    }

    fn build(welcome: Option<String>) -> (Self, MemoryServer) {
        let (tx, rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            sessions: tx,
            welcome,
            refuse: AtomicU32::new(0),
            connects: AtomicUsize::new(0),
            closes: Arc::new(AtomicUsize::new(0)),
            orphans: Mutex::new(Vec::new()),
        });
        (
            Self {
                shared: Arc::clone(&shared),
            },
            MemoryServer {
                sessions: rx,
                shared,
            },
        )
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self) -> TransportResult<Transport> {
        let refused = self
            .shared
            .refuse
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            return Err(TransportError::ConnectFailed {
                target: self.target(),
                reason: "connection refused".to_string(),
            });
        }

        let (to_client, client_rx) = fmpsc::unbounded();
        let (client_tx, from_client) = fmpsc::unbounded();
        if let Some(nick) = &self.shared.welcome {
            let _ = to_client.unbounded_send(Ok(format!(":tmi.twitch.tv 001 {nick} :Welcome, GLHF!")));
        }

        self.shared.connects.fetch_add(1, Ordering::SeqCst);
        let session = MemorySession {
            to_client,
            from_client,
        };
        if let Err(mpsc::error::SendError(session)) = self.shared.sessions.send(session) {
            // No server is listening; keep the transport open but unobserved.
            self.shared.orphans.lock().push(session);
        }

        let writer = MemorySink {
            tx: client_tx,
            closes: Arc::clone(&self.shared.closes),
        };
        Ok(Transport::new(Box::pin(client_rx), Box::pin(writer)))
    }

    fn target(&self) -> String {
        "memory".to_string()
    }
}

impl MemoryServer {
    /// Waits for the next client transport.
    pub async fn accept(&mut self) -> Option<MemorySession> {
        self.sessions.recv().await
    }

    /// Makes the next `count` connect attempts fail.
    pub fn refuse_next(&self, count: u32) {
        self.shared.refuse.store(count, Ordering::SeqCst);
    }

    /// Number of transports opened so far.
    pub fn connects(&self) -> usize {
        self.shared.connects.load(Ordering::SeqCst)
    }

    /// Number of times a client closed its writer.
    pub fn closes(&self) -> usize {
        self.shared.closes.load(Ordering::SeqCst)
    }
}

/// Server view of one transport.
#[derive(Debug)]
pub struct MemorySession {
    to_client: fmpsc::UnboundedSender<TransportResult<String>>,
    from_client: fmpsc::UnboundedReceiver<String>,
}

impl MemorySession {
    /// Delivers an inbound line to the client.
    pub fn send(&self, line: impl Into<String>) {
        let _ = self.to_client.unbounded_send(Ok(line.into()));
    }

    /// Breaks the transport with an I/O error.
    pub fn fail(&self) {
        let _ = self.to_client.unbounded_send(Err(TransportError::Io(io::Error::new(
            io::ErrorKind::ConnectionReset,
            "connection reset by peer",
        ))));
    }

    /// Receives the next line the client wrote, without its CRLF.
    pub async fn recv(&mut self) -> Option<String> {
        self.from_client
            .next()
            .await
            .map(|l| l.trim_end_matches(['\r', '\n']).to_string())
    }

    /// Skips client lines until one starts with `prefix`.
    pub async fn recv_starting_with(&mut self, prefix: &str) -> Option<String> {
        while let Some(line) = self.recv().await {
            if line.starts_with(prefix) {
                return Some(line);
            }
        }
        None
    }

    /// Returns a line the client already wrote, if any, without waiting.
    pub fn try_recv(&mut self) -> Option<String> {
        self.from_client
            .next()
            .now_or_never()
            .flatten()
            .map(|l| l.trim_end_matches(['\r', '\n']).to_string())
    }
}

/// Client writer that counts closes.
struct MemorySink {
    tx: fmpsc::UnboundedSender<String>,
    closes: Arc<AtomicUsize>,
}

impl Sink<String> for MemorySink {
    type Error = TransportError;

    fn poll_ready(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Pin::new(&mut self.tx)
            .poll_ready(cx)
            .map_err(|_| TransportError::Closed)
    }

    fn start_send(mut self: Pin<&mut Self>, item: String) -> Result<(), Self::Error> {
        Pin::new(&mut self.tx)
            .start_send(item)
            .map_err(|_| TransportError::Closed)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Pin::new(&mut self.tx)
            .poll_flush(cx)
            .map_err(|_| TransportError::Closed)
    }

    fn poll_close(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        let poll = Pin::new(&mut self.tx).poll_close(cx);
        if poll.is_ready() {
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
        poll.map_err(|_| TransportError::Closed)
    }
}
