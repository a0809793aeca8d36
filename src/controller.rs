//! Контроллер сессии: один actor на процесс.
//!
//! Вся логика сессии выполняется в одной задаче, которая последовательно
//! разбирает очередь событий. Захват медиа и подключение к ретранслятору
//! выполняются в отдельных задачах и возвращают результат с номером попытки
//! (`epoch`); устаревшие результаты освобождаются, не затрагивая сессию.

use crate::config::Config;
use crate::error::{AcquisitionError, ConnectError, NegotiationError};
use crate::media::{LocalStream, MediaSource};
use crate::peer::engine::{EngineOutput, NegotiationEngine};
use crate::peer::transport::PeerFactory;
use crate::peer::types::PeerEvent;
use crate::session::{Session, SessionSnapshot, SessionStatus};
use crate::signaling::{
    ControlMessage, RelayConnector, SignalingChannel, SignalingEvent, SignalingLink,
};
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

pub const EMPTY_JOIN_FIELDS: &str = "Введите ID комнаты и пользователя";
pub const RELAY_LOST: &str = "Соединение с сервером потеряно";

/// Действия пользователя
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Join { room_id: String, user_id: String },
    Leave,
    ToggleCamera,
    ToggleMicrophone,
    Shutdown,
}

enum Event {
    Command(Command),
    MediaReady {
        epoch: u64,
        result: Result<LocalStream, AcquisitionError>,
    },
    RelayOpened {
        epoch: u64,
        result: Result<SignalingLink, ConnectError>,
    },
    Signal {
        epoch: u64,
        event: SignalingEvent,
    },
    Peer {
        link_id: u64,
        event: PeerEvent,
    },
    GraceExpired {
        link_id: u64,
    },
}

pub struct SessionController {
    config: Config,
    media: Arc<dyn MediaSource>,
    connector: Arc<dyn RelayConnector>,
    engine: NegotiationEngine,
    session: Session,
    link: Option<SignalingLink>,
    /// Номер текущей попытки join; растёт при каждом join/leave/сбое
    epoch: u64,
    events: mpsc::UnboundedSender<Event>,
    state: watch::Sender<SessionSnapshot>,
    grace: Option<JoinHandle<()>>,
}

impl SessionController {
    /// Запускает контроллер в фоновой задаче tokio
    pub fn spawn(
        config: Config,
        media: Arc<dyn MediaSource>,
        connector: Arc<dyn RelayConnector>,
        peers: Arc<dyn PeerFactory>,
    ) -> SessionHandle {
        let (events, rx) = mpsc::unbounded_channel();
        let (state, state_rx) = watch::channel(SessionSnapshot::default());

        let peer_events = events.clone();
        let engine = NegotiationEngine::new(
            peers,
            Arc::new(move |link_id, event| {
                let _ = peer_events.send(Event::Peer { link_id, event });
            }),
        );

        let controller = SessionController {
            config,
            media,
            connector,
            engine,
            session: Session::default(),
            link: None,
            epoch: 0,
            events: events.clone(),
            state,
            grace: None,
        };
        tokio::spawn(controller.run(rx));

        SessionHandle {
            events,
            state: state_rx,
        }
    }

    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Event>) {
        debug!("Session controller started");
        loop {
            tokio::select! {
                event = rx.recv() => match event {
                    Some(Event::Command(Command::Shutdown)) | None => break,
                    Some(event) => self.handle_event(event).await,
                },
                _ = self.state.closed() => {
                    debug!("All session handles dropped");
                    break;
                }
            }
        }

        self.session.error_message = None;
        self.release().await;
        self.publish();
        info!("Session controller stopped");
    }

    async fn handle_event(&mut self, event: Event) {
        match event {
            Event::Command(command) => self.on_command(command).await,
            Event::MediaReady { epoch, result } => self.on_media_ready(epoch, result).await,
            Event::RelayOpened { epoch, result } => self.on_relay_opened(epoch, result).await,
            Event::Signal { epoch, event } => {
                if epoch == self.epoch {
                    self.on_signal(event).await;
                } else {
                    debug!(epoch, current = self.epoch, "Dropping signal from stale relay link");
                }
            }
            Event::Peer { link_id, event } => self.on_peer_event(link_id, event).await,
            Event::GraceExpired { link_id } => self.on_grace_expired(link_id).await,
        }
        self.publish();
    }

    fn publish(&self) {
        let next = self.session.snapshot();
        self.state.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            debug!(status = ?next.status, "Session state changed");
            *current = next;
            true
        });
    }

    async fn on_command(&mut self, command: Command) {
        match command {
            Command::Join { room_id, user_id } => self.join(&room_id, &user_id),
            Command::Leave => self.leave().await,
            Command::ToggleCamera => {
                let toggles = &mut self.session.media_toggles;
                toggles.camera_enabled = !toggles.camera_enabled;
                if let Some(stream) = &self.session.local_stream {
                    stream.set_video_enabled(toggles.camera_enabled);
                }
                info!(enabled = toggles.camera_enabled, "Camera toggled");
            }
            Command::ToggleMicrophone => {
                let toggles = &mut self.session.media_toggles;
                toggles.microphone_enabled = !toggles.microphone_enabled;
                if let Some(stream) = &self.session.local_stream {
                    stream.set_audio_enabled(toggles.microphone_enabled);
                }
                info!(enabled = toggles.microphone_enabled, "Microphone toggled");
            }
            // обрабатывается в run
            Command::Shutdown => {}
        }
    }

    fn join(&mut self, room_id: &str, user_id: &str) {
        match self.session.status {
            SessionStatus::Idle => {}
            SessionStatus::Failed => self.session.clear(),
            status => {
                warn!(?status, "Join requested while already in a room, ignoring");
                return;
            }
        }

        let (room_id, user_id) = (room_id.trim(), user_id.trim());
        if room_id.is_empty() || user_id.is_empty() {
            self.session.error_message = Some(EMPTY_JOIN_FIELDS.to_string());
            return;
        }

        self.epoch += 1;
        let epoch = self.epoch;
        self.session.error_message = None;
        self.session.room_id = room_id.to_string();
        self.session.user_id = user_id.to_string();
        self.session.status = SessionStatus::AwaitingMedia;
        self.engine.set_local_user(user_id);
        info!(room = room_id, user = user_id, epoch, "Joining room");

        let media = self.media.clone();
        let constraints = self.config.media;
        let events = self.events.clone();
        tokio::spawn(async move {
            let result = media.acquire(&constraints).await;
            let _ = events.send(Event::MediaReady { epoch, result });
        });
    }

    async fn on_media_ready(&mut self, epoch: u64, result: Result<LocalStream, AcquisitionError>) {
        if epoch != self.epoch {
            if let Ok(stream) = result {
                debug!(epoch, "Releasing local stream of abandoned join");
                stream.stop();
            }
            return;
        }

        let stream = match result {
            Ok(stream) => stream,
            Err(e) => {
                warn!("Local media acquisition failed: {}", e);
                self.abort_join(e.user_message()).await;
                return;
            }
        };

        let constraints = stream.constraints();
        info!(
            width = constraints.width,
            height = constraints.height,
            tracks = stream.tracks().len(),
            "Local media acquired"
        );
        let toggles = self.session.media_toggles;
        stream.set_video_enabled(toggles.camera_enabled);
        stream.set_audio_enabled(toggles.microphone_enabled);
        self.engine.attach_local_stream(stream.clone());
        self.session.local_stream = Some(stream);
        self.open_relay(epoch);
    }

    fn open_relay(&self, epoch: u64) {
        let connector = self.connector.clone();
        let relay_url = self.config.relay_url.clone();
        let room_id = self.session.room_id.clone();
        let user_id = self.session.user_id.clone();
        let events = self.events.clone();

        tokio::spawn(async move {
            // сообщения ретранслятора идут в очередь только после RelayOpened
            let (signal_tx, mut signal_rx) = mpsc::unbounded_channel();
            let result = SignalingChannel::open(
                connector.as_ref(),
                &relay_url,
                &room_id,
                &user_id,
                move |event| {
                    let _ = signal_tx.send(event);
                },
            )
            .await;

            let opened = result.is_ok();
            if events.send(Event::RelayOpened { epoch, result }).is_err() || !opened {
                return;
            }
            while let Some(event) = signal_rx.recv().await {
                if events.send(Event::Signal { epoch, event }).is_err() {
                    break;
                }
            }
        });
    }

    async fn on_relay_opened(&mut self, epoch: u64, result: Result<SignalingLink, ConnectError>) {
        if epoch != self.epoch {
            if let Ok(link) = result {
                debug!(epoch, "Closing relay link of abandoned join");
                link.close();
            }
            return;
        }

        match result {
            Ok(link) => {
                self.link = Some(link);
                self.session.status = SessionStatus::Connecting;
                self.session.joined_at = Some(Utc::now());
                info!(
                    room = %self.session.room_id,
                    user = %self.session.user_id,
                    "Joined room, waiting for peer"
                );
                if self.engine.take_deferred_offer() {
                    if let Err(e) = self.send_offer().await {
                        self.fail(e).await;
                    }
                }
            }
            Err(e) => {
                warn!("Relay connection failed: {}", e);
                self.abort_join(e.user_message()).await;
            }
        }
    }

    async fn on_signal(&mut self, event: SignalingEvent) {
        match event {
            SignalingEvent::Message(msg) => self.on_message(msg).await,
            SignalingEvent::Closed => {
                self.link = None;
                if matches!(
                    self.session.status,
                    SessionStatus::Connecting | SessionStatus::Connected
                ) {
                    error!("Relay connection lost");
                    self.fail_with(RELAY_LOST.to_string()).await;
                }
            }
        }
    }

    async fn on_message(&mut self, msg: ControlMessage) {
        if self.link.is_none() {
            debug!("No active relay link, ignoring {}", msg.kind());
            return;
        }
        if msg.sender() == Some(self.session.user_id.as_str()) {
            debug!("Ignoring own {} echoed by relay", msg.kind());
            return;
        }

        let result = match msg {
            ControlMessage::Join { sender } => {
                info!(peer = %sender, "Peer joined the room");
                self.send_offer().await
            }
            ControlMessage::Offer { sender, data } => {
                match self.engine.accept_offer(sender.as_deref(), data).await {
                    Ok(Some(answer)) => {
                        self.send(ControlMessage::answer(&self.session.user_id, answer));
                        Ok(())
                    }
                    Ok(None) => Ok(()),
                    Err(e) => Err(e),
                }
            }
            ControlMessage::Answer { data, .. } => self.engine.accept_answer(data).await,
            ControlMessage::Candidate { data, .. } => {
                self.engine.add_candidate(data).await;
                Ok(())
            }
            ControlMessage::Leave { sender } => {
                self.on_peer_left(&sender).await;
                Ok(())
            }
        };

        if let Err(e) = result {
            self.fail(e).await;
        }
    }

    async fn send_offer(&mut self) -> Result<(), NegotiationError> {
        if let Some(offer) = self.engine.create_offer().await? {
            self.send(ControlMessage::offer(&self.session.user_id, offer));
        }
        Ok(())
    }

    fn send(&self, msg: ControlMessage) {
        match &self.link {
            Some(link) => link.send(msg),
            None => debug!("No relay link, dropping outgoing {}", msg.kind()),
        }
    }

    /// Собеседник покинул комнату: ждём следующего
    async fn on_peer_left(&mut self, peer: &str) {
        info!(peer, "Peer left the room");
        self.cancel_grace();
        self.engine.reset().await;
        self.session.remote_stream = None;
        self.session.status = SessionStatus::Connecting;
    }

    async fn on_peer_event(&mut self, link_id: u64, event: PeerEvent) {
        match self.engine.on_peer_event(link_id, event) {
            EngineOutput::Nothing => {}
            EngineOutput::LocalCandidate(candidate) => {
                self.send(ControlMessage::candidate(&self.session.user_id, candidate));
            }
            EngineOutput::RemoteStream(stream) => {
                if !matches!(
                    self.session.status,
                    SessionStatus::Connecting | SessionStatus::Connected
                ) {
                    return;
                }
                if self.session.status != SessionStatus::Connected {
                    info!(link_id, "Call connected");
                }
                self.session.status = SessionStatus::Connected;
                self.session.remote_stream = Some(stream);
            }
            EngineOutput::Disconnected => {
                let grace = self.config.disconnect_grace();
                warn!(link_id, "Peer connection interrupted, waiting {:?}", grace);
                self.cancel_grace();
                let events = self.events.clone();
                self.grace = Some(tokio::spawn(async move {
                    tokio::time::sleep(grace).await;
                    let _ = events.send(Event::GraceExpired { link_id });
                }));
            }
            EngineOutput::Reconnected => {
                info!(link_id, "Peer connection restored");
                self.cancel_grace();
            }
            EngineOutput::Failed(e) => self.fail(e).await,
        }
    }

    async fn on_grace_expired(&mut self, link_id: u64) {
        self.grace = None;
        if self.engine.is_disconnected(link_id) {
            warn!(link_id, "Peer did not reconnect within grace period");
            self.fail(NegotiationError::Disconnected).await;
        }
    }

    fn cancel_grace(&mut self) {
        if let Some(task) = self.grace.take() {
            task.abort();
        }
    }

    async fn leave(&mut self) {
        if self.session.status != SessionStatus::Idle {
            info!(room = %self.session.room_id, "Leaving room");
        }
        self.session.error_message = None;
        self.release().await;
    }

    /// Прерывает попытку join до входа в комнату
    async fn abort_join(&mut self, message: String) {
        self.release().await;
        self.session.error_message = Some(message);
    }

    async fn fail(&mut self, e: NegotiationError) {
        error!("Negotiation failed: {}", e);
        self.fail_with(e.user_message()).await;
    }

    /// Освобождает ресурсы и оставляет сессию в `Failed` до leave/join
    async fn fail_with(&mut self, message: String) {
        self.epoch += 1;
        self.cancel_grace();
        if let Some(link) = self.link.take() {
            link.close();
        }
        self.engine.shutdown().await;
        if let Some(stream) = self.session.local_stream.take() {
            stream.stop();
        }
        self.session.remote_stream = None;
        self.session.error_message = Some(message);
        self.session.status = SessionStatus::Failed;
    }

    async fn release(&mut self) {
        self.epoch += 1;
        self.cancel_grace();
        if let Some(link) = self.link.take() {
            link.close();
        }
        self.engine.shutdown().await;
        self.session.clear();
    }
}

/// Ручка управления сессией. Клонируется; контроллер останавливается, когда
/// все ручки удалены или вызван [`SessionHandle::shutdown`].
#[derive(Clone)]
pub struct SessionHandle {
    events: mpsc::UnboundedSender<Event>,
    state: watch::Receiver<SessionSnapshot>,
}

impl SessionHandle {
    pub fn join(&self, room_id: impl Into<String>, user_id: impl Into<String>) {
        self.command(Command::Join {
            room_id: room_id.into(),
            user_id: user_id.into(),
        });
    }

    pub fn leave(&self) {
        self.command(Command::Leave);
    }

    pub fn toggle_camera(&self) {
        self.command(Command::ToggleCamera);
    }

    pub fn toggle_microphone(&self) {
        self.command(Command::ToggleMicrophone);
    }

    pub fn shutdown(&self) {
        self.command(Command::Shutdown);
    }

    pub fn command(&self, command: Command) {
        if self.events.send(Event::Command(command)).is_err() {
            warn!("Session controller is not running");
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.state.clone()
    }

    /// Ждёт снимок, удовлетворяющий условию. Если контроллер остановлен,
    /// возвращает последний снимок.
    pub async fn wait_for<F>(&self, predicate: F) -> SessionSnapshot
    where
        F: FnMut(&SessionSnapshot) -> bool,
    {
        let mut rx = self.state.clone();
        let result = rx.wait_for(predicate).await.map(|snapshot| snapshot.clone());
        result.unwrap_or_else(|_| rx.borrow().clone())
    }
}
