//! WebSocket transport backed by `tokio-tungstenite`.

use super::transport::{ChannelError, Connection, Connector};
use crate::protocol::{ChannelAddress, ServerEndpoint};
use async_trait::async_trait;
use futures::{future, SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::Message;

/// Connects channel addresses to the evaluator backend over WebSocket.
#[derive(Debug, Clone, Default)]
pub struct WebSocketConnector {
    endpoint: ServerEndpoint,
}

impl WebSocketConnector {
    pub fn new(endpoint: ServerEndpoint) -> Self {
        Self { endpoint }
    }

    pub fn endpoint(&self) -> &ServerEndpoint {
        &self.endpoint
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self, address: &ChannelAddress) -> Result<Connection, ChannelError> {
        let url = address.url(&self.endpoint);
        let (ws_stream, _response) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(|e| ChannelError::Connect {
                address: url.clone(),
                reason: e.to_string(),
            })?;
        tracing::debug!(url = %url, "websocket handshake complete");

        let (write, read) = ws_stream.split();

        let sink = write
            .sink_map_err(|e| ChannelError::Transport(e.to_string()))
            .with(|text: String| future::ready(Ok::<_, ChannelError>(Message::Text(text))));

        // Control frames are handled by tungstenite; only payload frames surface.
        let stream = read.filter_map(|message| {
            future::ready(match message {
                Ok(Message::Text(text)) => Some(Ok(text)),
                Ok(Message::Binary(bytes)) => {
                    Some(Ok(String::from_utf8_lossy(&bytes).into_owned()))
                }
                Ok(_) => None,
                Err(e) => Some(Err(ChannelError::Transport(e.to_string()))),
            })
        });

        Ok(Connection {
            sink: Box::pin(sink),
            stream: Box::pin(stream),
        })
    }
}
