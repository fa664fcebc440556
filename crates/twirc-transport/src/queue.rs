//! Rate-limited outbound queues.
//!
//! ```text
//!                      ┌──────────────────────┐
//!                 ┌───▶│ channel     (limit)  │──┐
//! Outbox::send    │    ├──────────────────────┤  │
//!  └─ classify ───┼───▶│ moderator   (limit)  │──┤
//!                 │    ├──────────────────────┤  ├──▶ Connection::write
//!                 ├───▶│ whisper     (limit)  │──┤    (serialized)
//!                 │    ├──────────────────────┤  │
//!                 └───▶│ control   (no limit) │──┘
//!                      └──────────────────────┘
//! ```
//!
//! Every lane is an unbounded FIFO drained by its own task. Backpressure is
//! only ever delay: a send over the limit waits for the window to roll, it is
//! never dropped. When the connection closes, messages still queued are
//! discarded and counted in the log.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use twirc_core::{MAX_LINE_LEN, Message, Outbox, SendError, SendResult, to_wire};

use crate::connection::Connection;
use crate::error::TransportError;
use crate::limiter::{RateLimit, WindowLimiter};
use crate::privilege::{PrivilegeTracker, QueueId, classify};

/// Per-queue rate limits. Control lines are never limited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimits {
    pub channel: RateLimit,
    pub moderator: RateLimit,
    pub whisper: RateLimit,
}

impl Default for RateLimits {
    fn default() -> Self {
        let cooldown = RateLimit::new(1, Duration::from_secs(3));
        Self {
            channel: cooldown,
            moderator: cooldown,
            whisper: cooldown,
        }
    }
}

impl RateLimits {
    /// The limit applied to `queue`, if any.
    pub fn for_queue(&self, queue: QueueId) -> Option<RateLimit> {
        match queue {
            QueueId::Channel => Some(self.channel),
            QueueId::ModeratorChannel => Some(self.moderator),
            QueueId::Whisper => Some(self.whisper),
            QueueId::Control => None,
        }
    }
}

struct Lane {
    id: QueueId,
    tx: mpsc::UnboundedSender<Message>,
    rx: Mutex<Option<mpsc::UnboundedReceiver<Message>>>,
    depth: Arc<AtomicUsize>,
}

/// The bot's outbound side: classification plus one rate-limited lane per
/// [`QueueId`].
pub struct OutboundQueues {
    lanes: Vec<Lane>,
    limits: RateLimits,
    privileges: Arc<PrivilegeTracker>,
}

impl std::fmt::Debug for OutboundQueues {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let depths: Vec<_> = self.lanes.iter().map(|l| (l.id, self.depth(l.id))).collect();
        f.debug_struct("OutboundQueues")
            .field("limits", &self.limits)
            .field("depths", &depths)
            .finish()
    }
}

impl OutboundQueues {
    pub fn new(limits: RateLimits, privileges: Arc<PrivilegeTracker>) -> Arc<Self> {
        let lanes = QueueId::ALL
            .iter()
            .map(|&id| {
                let (tx, rx) = mpsc::unbounded_channel();
                Lane {
                    id,
                    tx,
                    rx: Mutex::new(Some(rx)),
                    depth: Arc::new(AtomicUsize::new(0)),
                }
            })
            .collect();
        Arc::new(Self {
            lanes,
            limits,
            privileges,
        })
    }

    pub fn limits(&self) -> RateLimits {
        self.limits
    }

    pub fn privileges(&self) -> &Arc<PrivilegeTracker> {
        &self.privileges
    }

    /// Messages waiting in `queue`.
    pub fn depth(&self, queue: QueueId) -> usize {
        self.lane(queue).depth.load(Ordering::SeqCst)
    }

    /// Messages waiting across all queues.
    pub fn total_depth(&self) -> usize {
        self.lanes.iter().map(|l| l.depth.load(Ordering::SeqCst)).sum()
    }

    /// Spawns one drain task per queue, writing to `connection` until it
    /// closes.
    ///
    /// Messages sent before `start` are kept and delivered once draining
    /// begins. Calling `start` again spawns nothing.
    pub fn start(&self, connection: Arc<Connection>) -> Vec<JoinHandle<()>> {
        let shutdown = connection.shutdown_token();
        let mut handles = Vec::with_capacity(self.lanes.len());
        for lane in &self.lanes {
            let Some(rx) = lane.rx.lock().take() else {
                warn!(queue = %lane.id, "Queue is already draining");
                continue;
            };
            let limiter = self.limits.for_queue(lane.id).map(WindowLimiter::new);
            handles.push(tokio::spawn(drain(
                lane.id,
                rx,
                Arc::clone(&lane.depth),
                limiter,
                Arc::clone(&connection),
                shutdown.clone(),
            )));
        }
        handles
    }

    fn lane(&self, queue: QueueId) -> &Lane {
        let index = match queue {
            QueueId::Channel => 0,
            QueueId::ModeratorChannel => 1,
            QueueId::Whisper => 2,
            QueueId::Control => 3,
        };
        &self.lanes[index]
    }
}

impl Outbox for OutboundQueues {
    /// Classifies `message` against the current channel privilege and
    /// enqueues it. Messages that can never be written are rejected here.
    fn send(&self, message: Message) -> SendResult<()> {
        to_wire(&message, MAX_LINE_LEN)?;

        let privilege = message
            .channel()
            .map(|channel| self.privileges.privilege(channel))
            .unwrap_or_default();
        let queue = classify(&message, privilege);
        let lane = self.lane(queue);

        lane.depth.fetch_add(1, Ordering::SeqCst);
        if lane.tx.send(message).is_err() {
            lane.depth.fetch_sub(1, Ordering::SeqCst);
            return Err(SendError::Closed);
        }
        trace!(queue = %queue, "Queued outbound message");
        Ok(())
    }
}

async fn drain(
    queue: QueueId,
    mut rx: mpsc::UnboundedReceiver<Message>,
    depth: Arc<AtomicUsize>,
    mut limiter: Option<WindowLimiter>,
    connection: Arc<Connection>,
    shutdown: CancellationToken,
) {
    debug!(queue = %queue, limit = ?limiter.as_ref().map(WindowLimiter::limit), "Queue draining");
    let mut discarded = 0usize;

    'drain: loop {
        let message = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            message = rx.recv() => match message {
                Some(message) => message,
                None => return,
            },
        };

        if let Some(limiter) = limiter.as_mut() {
            let ready = tokio::select! {
                biased;
                _ = shutdown.cancelled() => false,
                _ = limiter.acquire() => true,
            };
            if !ready {
                depth.fetch_sub(1, Ordering::SeqCst);
                discarded += 1;
                break;
            }
        }
        depth.fetch_sub(1, Ordering::SeqCst);

        // A failed write is retried once the connection is back. Only close
        // discards.
        loop {
            let result = tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    discarded += 1;
                    break 'drain;
                }
                result = connection.write(&message) => result,
            };
            match result {
                Ok(()) => break,
                Err(TransportError::Encode(e)) => {
                    warn!(queue = %queue, error = %e, message = %message, "Dropping unsendable outbound message");
                    break;
                }
                Err(e) if connection.state().is_terminal() => {
                    debug!(queue = %queue, error = %e, "Connection closed while writing");
                    discarded += 1;
                    break 'drain;
                }
                Err(e) => {
                    debug!(queue = %queue, error = %e, "Write failed, retrying after reconnect");
                }
            }
        }
    }

    rx.close();
    while rx.try_recv().is_ok() {
        depth.fetch_sub(1, Ordering::SeqCst);
        discarded += 1;
    }
    if discarded > 0 {
        info!(queue = %queue, discarded, "Discarded queued messages on close");
    }
}
