//! Ретранслятор в памяти и loopback peer connection для сквозных тестов сессии.

#![allow(dead_code)]

use async_trait::async_trait;
use futures::channel::mpsc as fmpsc;
use futures::{SinkExt, StreamExt};
use peercall::error::{ConnectError, NegotiationError};
use peercall::media::LocalStream;
use peercall::peer::{
    IceCandidate, PeerConnectionState, PeerEvent, PeerEventSink, PeerFactory, PeerTransport,
    RemoteTrack, SdpKind, SessionDescription,
};
use peercall::signaling::{RelayConnection, RelayConnector, RelayFrame};
use peercall::{Config, SampleTrackSource, SessionController, SessionHandle, SessionSnapshot, TrackKind};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

type ClientTx = fmpsc::UnboundedSender<Result<RelayFrame, ConnectError>>;

struct Member {
    user: String,
    tx: ClientTx,
}

/// Ретранслятор комнат, ведущий себя как боевой сервер сигнализации: рассылает
/// `join` при подключении и `leave` при отключении, проставляет `sender` и
/// пересылает сообщения остальным участникам комнаты.
#[derive(Default)]
pub struct MemoryRelay {
    rooms: Mutex<HashMap<String, Vec<Member>>>,
    log: Mutex<Vec<(String, String)>>,
    connects: AtomicUsize,
    refuse: AtomicBool,
}

impl MemoryRelay {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn refuse_connections(&self) {
        self.refuse.store(true, Ordering::SeqCst);
    }

    /// (sender, type) всех сообщений, прошедших через ретранслятор
    pub fn sent(&self) -> Vec<(String, String)> {
        self.log.lock().unwrap().clone()
    }

    pub fn sent_of(&self, kind: &str) -> usize {
        self.sent().iter().filter(|(_, k)| k == kind).count()
    }

    pub fn members(&self, room: &str) -> usize {
        self.rooms.lock().unwrap().get(room).map_or(0, Vec::len)
    }

    /// Закрывает все соединения комнаты, как при падении сервера
    pub fn kill_room(&self, room: &str) {
        self.rooms.lock().unwrap().remove(room);
    }

    fn broadcast(&self, room: &str, from: &str, msg: &Value) {
        let text = msg.to_string();
        let rooms = self.rooms.lock().unwrap();
        if let Some(members) = rooms.get(room) {
            for member in members.iter().filter(|m| m.user != from) {
                let _ = member.tx.unbounded_send(Ok(RelayFrame::Text(text.clone())));
            }
        }
    }

    async fn serve(self: Arc<Self>, room: String, user: String, mut outgoing: fmpsc::UnboundedReceiver<String>) {
        while let Some(text) = outgoing.next().await {
            let Ok(mut msg) = serde_json::from_str::<Value>(&text) else {
                continue;
            };
            let kind = msg["type"].as_str().unwrap_or_default().to_string();
            self.log.lock().unwrap().push((user.clone(), kind));
            msg["sender"] = Value::String(user.clone());
            self.broadcast(&room, &user, &msg);
        }

        if let Some(members) = self.rooms.lock().unwrap().get_mut(&room) {
            members.retain(|m| m.user != user);
        }
        self.broadcast(
            &room,
            "",
            &serde_json::json!({ "type": "leave", "sender": user, "data": null }),
        );
    }
}

fn query_param(endpoint: &str, name: &str) -> Option<String> {
    let query = endpoint.split_once('?')?.1;
    query.split('&').find_map(|pair| {
        let (key, value) = pair.split_once('=')?;
        if key != name {
            return None;
        }
        urlencoding::decode(value).ok().map(|v| v.into_owned())
    })
}

pub struct RelayHandle(pub Arc<MemoryRelay>);

#[async_trait]
impl RelayConnector for RelayHandle {
    async fn connect(&self, endpoint: &str) -> Result<RelayConnection, ConnectError> {
        let relay = self.0.clone();
        relay.connects.fetch_add(1, Ordering::SeqCst);
        if relay.refuse.load(Ordering::SeqCst) {
            return Err(ConnectError::Unreachable("connection refused".into()));
        }
        let room = query_param(endpoint, "room")
            .ok_or_else(|| ConnectError::Transport("missing room".into()))?;
        let user = query_param(endpoint, "user")
            .ok_or_else(|| ConnectError::Transport("missing user".into()))?;

        let (client_tx, client_rx) = fmpsc::unbounded();
        let (out_tx, out_rx) = fmpsc::unbounded::<String>();
        relay
            .rooms
            .lock()
            .unwrap()
            .entry(room.clone())
            .or_default()
            .push(Member {
                user: user.clone(),
                tx: client_tx,
            });
        relay.broadcast(
            &room,
            &user,
            &serde_json::json!({ "type": "join", "sender": user, "data": null }),
        );
        tokio::spawn(relay.clone().serve(room, user, out_rx));

        Ok(RelayConnection {
            sink: Box::pin(out_tx.sink_map_err(|e| ConnectError::Transport(e.to_string()))),
            stream: Box::pin(client_rx),
        })
    }
}

#[derive(Default)]
struct LoopbackState {
    tracks: bool,
    local: bool,
    remote: bool,
    delivered: bool,
    applied_candidates: usize,
    early_candidates: usize,
    closed: bool,
}

/// Поддельный peer connection: один локальный кандидат на каждый local
/// description и удалённый видеотрек, когда оба description установлены.
pub struct LoopbackPeer {
    sink: PeerEventSink,
    state: Mutex<LoopbackState>,
}

impl LoopbackPeer {
    pub fn applied_candidates(&self) -> usize {
        self.state.lock().unwrap().applied_candidates
    }

    /// Кандидаты, пришедшие до remote description
    pub fn early_candidates(&self) -> usize {
        self.state.lock().unwrap().early_candidates
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().unwrap().closed
    }

    pub fn emit(&self, event: PeerEvent) {
        self.sink.emit(event);
    }

    fn maybe_connect(&self) {
        let mut state = self.state.lock().unwrap();
        if state.delivered || !(state.tracks && state.local && state.remote) {
            return;
        }
        state.delivered = true;
        drop(state);
        self.sink
            .emit(PeerEvent::ConnectionState(PeerConnectionState::Connected));
        self.sink.emit(PeerEvent::RemoteTrack(RemoteTrack {
            id: format!("remote-video-{}", self.sink.link_id()),
            stream_id: "remote".into(),
            kind: TrackKind::Video,
        }));
    }
}

#[async_trait]
impl PeerTransport for LoopbackPeer {
    async fn add_local_tracks(&self, stream: &LocalStream) -> Result<(), NegotiationError> {
        if stream.tracks().is_empty() {
            return Err(NegotiationError::Tracks("empty stream".into()));
        }
        self.state.lock().unwrap().tracks = true;
        Ok(())
    }

    async fn create_offer(&self) -> Result<SessionDescription, NegotiationError> {
        Ok(SessionDescription::offer(format!("fake-offer {}", self.sink.link_id())))
    }

    async fn create_answer(&self) -> Result<SessionDescription, NegotiationError> {
        if !self.state.lock().unwrap().remote {
            return Err(NegotiationError::Sdp("no remote offer".into()));
        }
        Ok(SessionDescription::answer(format!("fake-answer {}", self.sink.link_id())))
    }

    async fn set_local_description(&self, _desc: SessionDescription) -> Result<(), NegotiationError> {
        self.state.lock().unwrap().local = true;
        self.sink.emit(PeerEvent::LocalCandidate(IceCandidate {
            candidate: format!("candidate:{} 1 udp 1 127.0.0.1 9 typ host", self.sink.link_id()),
            sdp_mid: Some("0".into()),
            sdp_mline_index: Some(0),
            username_fragment: None,
        }));
        self.maybe_connect();
        Ok(())
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), NegotiationError> {
        let expected = match desc.kind {
            SdpKind::Offer => "fake-offer",
            SdpKind::Answer => "fake-answer",
        };
        if !desc.sdp.starts_with(expected) {
            return Err(NegotiationError::Sdp(format!("unexpected sdp {:?}", desc.sdp)));
        }
        self.state.lock().unwrap().remote = true;
        self.maybe_connect();
        Ok(())
    }

    async fn add_ice_candidate(&self, _candidate: IceCandidate) -> Result<(), NegotiationError> {
        let mut state = self.state.lock().unwrap();
        if !state.remote {
            state.early_candidates += 1;
            return Err(NegotiationError::Sdp("remote description not set".into()));
        }
        state.applied_candidates += 1;
        Ok(())
    }

    async fn close(&self) {
        self.state.lock().unwrap().closed = true;
    }
}

#[derive(Default)]
pub struct LoopbackFactory {
    peers: Mutex<Vec<Arc<LoopbackPeer>>>,
}

impl LoopbackFactory {
    pub fn peers(&self) -> Vec<Arc<LoopbackPeer>> {
        self.peers.lock().unwrap().clone()
    }
}

#[async_trait]
impl PeerFactory for LoopbackFactory {
    async fn create(&self, events: PeerEventSink) -> Result<Arc<dyn PeerTransport>, NegotiationError> {
        let peer = Arc::new(LoopbackPeer {
            sink: events,
            state: Mutex::new(LoopbackState::default()),
        });
        self.peers.lock().unwrap().push(peer.clone());
        Ok(peer)
    }
}

pub struct Client {
    pub handle: SessionHandle,
    pub peers: Arc<LoopbackFactory>,
}

impl Client {
    pub fn new(relay: &Arc<MemoryRelay>) -> Self {
        Self::with_media(relay, Arc::new(SampleTrackSource))
    }

    pub fn with_media(relay: &Arc<MemoryRelay>, media: Arc<dyn peercall::MediaSource>) -> Self {
        let peers = Arc::new(LoopbackFactory::default());
        let handle = SessionController::spawn(
            Config::default(),
            media,
            Arc::new(RelayHandle(relay.clone())),
            peers.clone(),
        );
        Self { handle, peers }
    }

    pub async fn until<F>(&self, predicate: F) -> SessionSnapshot
    where
        F: FnMut(&SessionSnapshot) -> bool,
    {
        tokio::time::timeout(Duration::from_secs(2), self.handle.wait_for(predicate))
            .await
            .expect("session did not reach expected state")
    }
}

pub async fn eventually<F: Fn() -> bool>(condition: F) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached");
}
