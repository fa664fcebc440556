//! WebSocket connector.
//!
//! Each text frame may carry several CRLF separated lines; they are split
//! before reaching the connection.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt, future, stream};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::debug;

use super::{Connector, Transport};
use crate::error::{TransportError, TransportResult};

/// Connects to a `ws://` or `wss://` chat endpoint.
#[derive(Debug, Clone)]
pub struct WsConnector {
    url: String,
}

impl WsConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

fn frame_lines(frame: Result<WsMessage, tokio_tungstenite::tungstenite::Error>) -> Vec<TransportResult<String>> {
    match frame {
        Ok(WsMessage::Text(text)) => text
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(|l| Ok(l.to_string()))
            .collect(),
        Ok(WsMessage::Close(_)) => vec![Err(TransportError::Closed)],
        Ok(_) => Vec::new(),
        Err(e) => vec![Err(e.into())],
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self) -> TransportResult<Transport> {
        let (ws, _response) =
            connect_async(self.url.as_str())
                .await
                .map_err(|e| TransportError::ConnectFailed {
                    target: self.url.clone(),
                    reason: e.to_string(),
                })?;
        debug!(url = %self.url, "WebSocket transport opened");

        let (ws_tx, ws_rx) = ws.split();
        let reader = ws_rx.flat_map(|frame| stream::iter(frame_lines(frame)));
        let writer = ws_tx
            .sink_map_err(TransportError::from)
            .with(|line: String| {
                future::ready(Ok::<_, TransportError>(WsMessage::Text(
                    line.trim_end_matches(['\r', '\n']).to_string().into(),
                )))
            });
        Ok(Transport::new(Box::pin(reader), Box::pin(writer)))
    }

    fn target(&self) -> String {
        self.url.clone()
    }
}
