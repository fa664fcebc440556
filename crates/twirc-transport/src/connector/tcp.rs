//! Plain TCP connector.

use async_trait::async_trait;
use futures::StreamExt;
use tokio::net::TcpStream;
use tokio_util::codec::Framed;
use tracing::debug;

use super::{Connector, Transport};
use crate::codec::LineCodec;
use crate::error::{TransportError, TransportResult};

/// Connects over TCP and frames lines with [`LineCodec`].
#[derive(Debug, Clone)]
pub struct TcpConnector {
    host: String,
    port: u16,
}

impl TcpConnector {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self) -> TransportResult<Transport> {
        let stream = TcpStream::connect((self.host.as_str(), self.port))
            .await
            .map_err(|e| TransportError::ConnectFailed {
                target: self.target(),
                reason: e.to_string(),
            })?;
        stream.set_nodelay(true)?;
        debug!(target = %self.target(), "TCP transport opened");

        let (writer, reader) = Framed::new(stream, LineCodec::new()).split();
        Ok(Transport::new(Box::pin(reader), Box::pin(writer)))
    }

    fn target(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
