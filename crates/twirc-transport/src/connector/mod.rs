//! Transport connectors.
//!
//! A [`Connector`] knows how to open one line-oriented [`Transport`]. The
//! [`Connection`](crate::Connection) calls it for the initial connect and
//! again for every reconnect, so a connector holds only the dial target.
//!
//! | Connector | Transport |
//! |-----------|-----------|
//! | [`TcpConnector`] | plain TCP with [`LineCodec`](crate::LineCodec) framing |
//! | `WsConnector` (`ws-client`) | WebSocket text frames |
//! | [`MemoryConnector`] | in-process channels, scripted by a [`MemoryServer`] |

mod memory;
mod tcp;
#[cfg(feature = "ws-client")]
mod websocket;

use std::pin::Pin;

use async_trait::async_trait;
use futures::{Sink, Stream};

use crate::error::{TransportError, TransportResult};

pub use memory::{MemoryConnector, MemoryServer, MemorySession};
pub use tcp::TcpConnector;
#[cfg(feature = "ws-client")]
pub use websocket::WsConnector;

/// Inbound half of a transport: complete lines without delimiters.
pub type LineStream = Pin<Box<dyn Stream<Item = TransportResult<String>> + Send>>;

/// Outbound half of a transport: complete lines including CRLF.
pub type LineSink = Pin<Box<dyn Sink<String, Error = TransportError> + Send>>;

/// An open, line-oriented transport.
pub struct Transport {
    pub reader: LineStream,
    pub writer: LineSink,
}

impl Transport {
    pub fn new(reader: LineStream, writer: LineSink) -> Self {
        Self { reader, writer }
    }
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport").finish_non_exhaustive()
    }
}

/// Opens transports to a chat server.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Opens a fresh transport.
    async fn connect(&self) -> TransportResult<Transport>;

    /// Human readable dial target for logs.
    fn target(&self) -> String;
}
