//! # twirc Transport
//!
//! Everything between typed [`Message`](twirc_core::Message)s and the wire:
//!
//! - [`Connector`] implementations that open line-oriented transports (TCP,
//!   WebSocket behind `ws-client`, and an in-memory pair for tests)
//! - [`Connection`], the lifecycle state machine with login, reconnect and
//!   idempotent close
//! - [`OutboundQueues`], the rate-limited [`Outbox`](twirc_core::Outbox)
//!   that picks a queue per message with [`classify`]
//!
//! ```text
//!            ┌──────────── Connection ─────────────┐
//! Connector ─┤ reader ──▶ read_loop ──▶ events tx  │
//!            │ writer ◀── write() ◀── OutboundQueues ◀── Outbox::send
//!            └─────────────────────────────────────┘
//! ```

pub mod codec;
pub mod connection;
pub mod connector;
pub mod error;
pub mod limiter;
pub mod privilege;
pub mod queue;

pub use codec::{DEFAULT_MAX_INBOUND, LineCodec};
pub use connection::{
    Connection, ConnectionConfig, ConnectionGuard, ConnectionState, DEFAULT_CAPABILITIES,
    ReconnectPolicy,
};
#[cfg(feature = "ws-client")]
pub use connector::WsConnector;
pub use connector::{
    Connector, LineSink, LineStream, MemoryConnector, MemoryServer, MemorySession, TcpConnector,
    Transport,
};
pub use error::{ConnectionError, ConnectionResult, TransportError, TransportResult};
pub use limiter::{RateLimit, WindowLimiter};
pub use privilege::{Privilege, PrivilegeTracker, QueueId, classify};
pub use queue::{OutboundQueues, RateLimits};
