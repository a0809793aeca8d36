use super::{RelayConnection, RelayConnector, RelayFrame};
use crate::error::ConnectError;
use async_trait::async_trait;
use futures::{future, SinkExt, StreamExt};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::debug;

/// Подключение к ретранслятору по WebSocket
#[derive(Debug, Default, Clone, Copy)]
pub struct WsConnector;

#[async_trait]
impl RelayConnector for WsConnector {
    async fn connect(&self, endpoint: &str) -> Result<RelayConnection, ConnectError> {
        let (ws, response) = connect_async(endpoint)
            .await
            .map_err(|e| ConnectError::Unreachable(e.to_string()))?;
        debug!("WebSocket handshake done, status {}", response.status());

        let (sink, stream) = ws.split();

        let sink = sink
            .sink_map_err(|e| ConnectError::Transport(e.to_string()))
            .with(|text: String| future::ok::<_, ConnectError>(Message::Text(text)));

        // Ping/Pong отвечает сама tungstenite, Close завершает поток
        let stream = stream.filter_map(|msg| {
            future::ready(match msg {
                Ok(Message::Text(text)) => Some(Ok(RelayFrame::Text(text))),
                Ok(Message::Binary(bytes)) => Some(Ok(RelayFrame::Binary(bytes))),
                Ok(_) => None,
                Err(e) => Some(Err(ConnectError::Transport(e.to_string()))),
            })
        });

        Ok(RelayConnection {
            sink: Box::pin(sink),
            stream: Box::pin(stream),
        })
    }
}
