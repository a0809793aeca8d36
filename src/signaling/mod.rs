//! Канал сигнализации через ретранслятор комнаты.
//!
//! Одно соединение на сессию. Входящие сообщения доставляются строго в порядке
//! прихода; битые сообщения логируются и отбрасываются, не доходя до
//! обработчика.

pub mod message;
pub mod websocket;

pub use message::ControlMessage;
pub use websocket::WsConnector;

use crate::error::{ConnectError, ParseError};
use crate::utils::relay_endpoint;
use async_trait::async_trait;
use futures::{Sink, SinkExt, Stream, StreamExt};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Кадр, пришедший от ретранслятора
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayFrame {
    Text(String),
    Binary(Vec<u8>),
}

pub type RelaySink = Pin<Box<dyn Sink<String, Error = ConnectError> + Send>>;
pub type RelayStream = Pin<Box<dyn Stream<Item = Result<RelayFrame, ConnectError>> + Send>>;

/// Установленное соединение с ретранслятором
pub struct RelayConnection {
    pub sink: RelaySink,
    pub stream: RelayStream,
}

/// Транспорт до ретранслятора
#[async_trait]
pub trait RelayConnector: Send + Sync {
    async fn connect(&self, endpoint: &str) -> Result<RelayConnection, ConnectError>;
}

/// Событие канала для сессии
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignalingEvent {
    Message(ControlMessage),
    /// Соединение закрыто не по инициативе пользователя
    Closed,
}

enum Outbound {
    Message(ControlMessage),
    Close,
}

pub struct SignalingChannel;

impl SignalingChannel {
    /// Подключается к ретранслятору и сразу отправляет `Join`.
    ///
    /// `on_event` регистрируется до чтения первого сообщения и вызывается
    /// один раз на каждое входящее сообщение в порядке прихода.
    pub async fn open<F>(
        connector: &dyn RelayConnector,
        relay_url: &str,
        room_id: &str,
        user_id: &str,
        on_event: F,
    ) -> Result<SignalingLink, ConnectError>
    where
        F: Fn(SignalingEvent) + Send + Sync + 'static,
    {
        let endpoint = relay_endpoint(relay_url, room_id, user_id)?;
        debug!("Connecting to relay {}", endpoint);
        let RelayConnection { sink, stream } = connector.connect(&endpoint).await?;
        info!(room = room_id, user = user_id, "Relay connection established");

        let closed = Arc::new(AtomicBool::new(false));
        let (outbound, outbound_rx) = mpsc::unbounded_channel();

        tokio::spawn(write_loop(sink, outbound_rx));
        let reader = tokio::spawn(read_loop(
            stream,
            closed.clone(),
            outbound.clone(),
            on_event,
        ));

        let link = SignalingLink {
            outbound,
            closed,
            reader,
        };
        link.send(ControlMessage::join(user_id));
        Ok(link)
    }
}

/// Открытое соединение с ретранслятором
pub struct SignalingLink {
    outbound: mpsc::UnboundedSender<Outbound>,
    closed: Arc<AtomicBool>,
    reader: JoinHandle<()>,
}

impl SignalingLink {
    /// Ставит сообщение в очередь отправки. Никогда не возвращает ошибку:
    /// на закрытом канале сообщение логируется и отбрасывается.
    pub fn send(&self, msg: ControlMessage) {
        if self.is_closed() {
            debug!("Signaling link closed, dropping outgoing {}", msg.kind());
            return;
        }
        let kind = msg.kind();
        if self.outbound.send(Outbound::Message(msg)).is_err() {
            warn!("Signaling writer stopped, dropping outgoing {}", kind);
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Закрывает соединение. Повторный вызов ничего не делает; после закрытия
    /// события больше не доставляются.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        debug!("Closing signaling link");
        self.reader.abort();
        // writer дописывает очередь и закрывает сокет сам
        let _ = self.outbound.send(Outbound::Close);
    }
}

impl Drop for SignalingLink {
    fn drop(&mut self) {
        self.close();
    }
}

async fn write_loop(mut sink: RelaySink, mut outbound: mpsc::UnboundedReceiver<Outbound>) {
    while let Some(item) = outbound.recv().await {
        match item {
            Outbound::Message(msg) => {
                let text = match msg.to_json() {
                    Ok(text) => text,
                    Err(e) => {
                        warn!("Failed to encode {}: {}", msg.kind(), e);
                        continue;
                    }
                };
                debug!("Sending {} to relay", msg.kind());
                if let Err(e) = sink.send(text).await {
                    warn!("Relay send failed: {}", e);
                    break;
                }
            }
            Outbound::Close => break,
        }
    }
    let _ = sink.close().await;
    debug!("Signaling writer finished");
}

async fn read_loop<F>(
    mut stream: RelayStream,
    closed: Arc<AtomicBool>,
    outbound: mpsc::UnboundedSender<Outbound>,
    on_event: F,
) where
    F: Fn(SignalingEvent) + Send + Sync + 'static,
{
    while let Some(frame) = stream.next().await {
        let parsed = match frame {
            Ok(RelayFrame::Text(text)) => ControlMessage::parse(&text),
            Ok(RelayFrame::Binary(bytes)) => String::from_utf8(bytes)
                .map_err(|_| ParseError::NotUtf8)
                .and_then(|text| ControlMessage::parse(&text)),
            Err(e) => {
                warn!("Relay receive failed: {}", e);
                break;
            }
        };

        match parsed {
            Ok(msg) => {
                debug!(sender = ?msg.sender(), "Received {} from relay", msg.kind());
                on_event(SignalingEvent::Message(msg));
            }
            Err(e) => warn!("Dropping malformed control message: {}", e),
        }
    }

    // закрытие по инициативе пользователя уже выставило флаг
    if !closed.swap(true, Ordering::AcqRel) {
        info!("Relay connection closed by remote side");
        let _ = outbound.send(Outbound::Close);
        on_event(SignalingEvent::Closed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peer::types::{IceCandidate, SessionDescription};
    use futures::channel::mpsc as fmpsc;
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::time::timeout;

    type ServerTx = fmpsc::UnboundedSender<Result<RelayFrame, ConnectError>>;

    struct TestConnector {
        conn: Mutex<Option<RelayConnection>>,
        endpoint: Mutex<Option<String>>,
    }

    #[async_trait]
    impl RelayConnector for TestConnector {
        async fn connect(&self, endpoint: &str) -> Result<RelayConnection, ConnectError> {
            *self.endpoint.lock().unwrap() = Some(endpoint.to_string());
            self.conn
                .lock()
                .unwrap()
                .take()
                .ok_or_else(|| ConnectError::Unreachable("connection refused".into()))
        }
    }

    fn loopback() -> (TestConnector, ServerTx, fmpsc::UnboundedReceiver<String>) {
        let (server_tx, client_rx) = fmpsc::unbounded();
        let (client_tx, server_rx) = fmpsc::unbounded::<String>();
        let conn = RelayConnection {
            sink: Box::pin(client_tx.sink_map_err(|e| ConnectError::Transport(e.to_string()))),
            stream: Box::pin(client_rx),
        };
        let connector = TestConnector {
            conn: Mutex::new(Some(conn)),
            endpoint: Mutex::new(None),
        };
        (connector, server_tx, server_rx)
    }

    async fn open(
        connector: &TestConnector,
    ) -> (SignalingLink, mpsc::UnboundedReceiver<SignalingEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let link = SignalingChannel::open(connector, "ws://relay/ws", "room", "alice", move |ev| {
            let _ = tx.send(ev);
        })
        .await
        .unwrap();
        (link, rx)
    }

    async fn next_sent(server_rx: &mut fmpsc::UnboundedReceiver<String>) -> ControlMessage {
        let text = timeout(Duration::from_secs(1), server_rx.next())
            .await
            .unwrap()
            .unwrap();
        ControlMessage::parse(&text).unwrap()
    }

    fn candidate(n: u32) -> IceCandidate {
        IceCandidate {
            candidate: format!("candidate:{n}"),
            sdp_mid: Some("0".into()),
            sdp_mline_index: Some(0),
            username_fragment: None,
        }
    }

    #[tokio::test]
    async fn open_sends_join_first() {
        let (connector, _server_tx, mut server_rx) = loopback();
        let (link, _events) = open(&connector).await;
        link.send(ControlMessage::offer("alice", SessionDescription::offer("v=0")));

        assert_eq!(next_sent(&mut server_rx).await, ControlMessage::join("alice"));
        assert_eq!(next_sent(&mut server_rx).await.kind(), "offer");
        assert_eq!(
            connector.endpoint.lock().unwrap().as_deref(),
            Some("ws://relay/ws?room=room&user=alice")
        );
    }

    #[tokio::test]
    async fn unreachable_relay_is_a_connect_error() {
        let (connector, _server_tx, _server_rx) = loopback();
        connector.conn.lock().unwrap().take();
        let result = SignalingChannel::open(&connector, "ws://relay/ws", "r", "u", |_| {}).await;
        assert!(matches!(result, Err(ConnectError::Unreachable(_))));
    }

    #[tokio::test]
    async fn delivers_in_order_and_drops_malformed() {
        let (connector, server_tx, _server_rx) = loopback();
        let (_link, mut events) = open(&connector).await;

        let frames = [
            RelayFrame::Text(ControlMessage::join("bob").to_json().unwrap()),
            RelayFrame::Text("{not json".into()),
            RelayFrame::Text(r#"{"type":"renegotiate","sender":"bob"}"#.into()),
            RelayFrame::Binary(vec![0xff, 0xfe]),
            RelayFrame::Binary(
                ControlMessage::candidate("bob", candidate(1))
                    .to_json()
                    .unwrap()
                    .into_bytes(),
            ),
            RelayFrame::Text(ControlMessage::candidate("bob", candidate(2)).to_json().unwrap()),
        ];
        for frame in frames {
            server_tx.unbounded_send(Ok(frame)).unwrap();
        }

        let mut received = Vec::new();
        for _ in 0..3 {
            received.push(
                timeout(Duration::from_secs(1), events.recv())
                    .await
                    .unwrap()
                    .unwrap(),
            );
        }
        assert_eq!(
            received,
            vec![
                SignalingEvent::Message(ControlMessage::join("bob")),
                SignalingEvent::Message(ControlMessage::candidate("bob", candidate(1))),
                SignalingEvent::Message(ControlMessage::candidate("bob", candidate(2))),
            ]
        );
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn remote_close_is_reported_once() {
        let (connector, server_tx, _server_rx) = loopback();
        let (link, mut events) = open(&connector).await;
        drop(server_tx);

        let event = timeout(Duration::from_secs(1), events.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event, SignalingEvent::Closed);
        assert!(link.is_closed());

        // отправка после закрытия не паникует
        link.send(ControlMessage::join("alice"));
        link.close();
        assert!(timeout(Duration::from_millis(50), events.recv())
            .await
            .map(|ev| ev.is_none())
            .unwrap_or(true));
    }

    #[tokio::test]
    async fn user_close_is_idempotent_and_flushes_queue() {
        let (connector, server_tx, mut server_rx) = loopback();
        let (link, mut events) = open(&connector).await;
        link.send(ControlMessage::candidate("alice", candidate(7)));
        link.close();
        link.close();

        assert_eq!(next_sent(&mut server_rx).await, ControlMessage::join("alice"));
        assert_eq!(
            next_sent(&mut server_rx).await,
            ControlMessage::candidate("alice", candidate(7))
        );
        // сокет закрыт писателем
        assert!(timeout(Duration::from_secs(1), server_rx.next())
            .await
            .unwrap()
            .is_none());

        // входящие после закрытия не доставляются
        let _ = server_tx.unbounded_send(Ok(RelayFrame::Text(
            ControlMessage::join("bob").to_json().unwrap(),
        )));
        assert!(timeout(Duration::from_millis(50), events.recv())
            .await
            .map(|ev| ev.is_none())
            .unwrap_or(true));
        assert!(link.is_closed());
    }
}
