//! Движок согласования: единственный PeerLink сессии, обмен SDP offer/answer
//! и ретрансляция ICE кандидатов.
//!
//! Любая сторона может первой увидеть собеседника (через `Join`) и стать
//! offerer; вторая отвечает. Повторные `Join` не пересоздают соединение,
//! кандидаты до SDP буферизуются и применяются после установки remote
//! description в порядке прихода.

use crate::error::NegotiationError;
use crate::logger::dump_candidate;
use crate::media::LocalStream;
use crate::peer::ice::{apply_pending_candidates, CandidateQueue};
use crate::peer::state::{NegotiationState, PeerLink, Role};
use crate::peer::transport::PeerFactory;
use crate::peer::types::{
    IceCandidate, PeerConnectionState, PeerEvent, PeerEventHandler, PeerEventSink, RemoteStream,
    SdpKind, SessionDescription,
};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Что контроллер сессии должен сделать после события peer connection
#[derive(Debug, Clone, PartialEq)]
pub enum EngineOutput {
    Nothing,
    /// Отправить кандидат собеседнику
    LocalCandidate(IceCandidate),
    /// Получен удалённый трек; соединение функционально установлено
    RemoteStream(RemoteStream),
    /// ICE потерял связь, начинаем период ожидания
    Disconnected,
    /// ICE восстановился
    Reconnected,
    Failed(NegotiationError),
}

pub struct NegotiationEngine {
    local_user: String,
    factory: Arc<dyn PeerFactory>,
    handler: PeerEventHandler,
    link: Option<PeerLink>,
    /// Кандидаты, пришедшие раньше, чем появился PeerLink
    early_candidates: CandidateQueue,
    local_stream: Option<LocalStream>,
    deferred_offer: bool,
    next_link_id: u64,
}

impl NegotiationEngine {
    pub fn new(factory: Arc<dyn PeerFactory>, handler: PeerEventHandler) -> Self {
        Self {
            local_user: String::new(),
            factory,
            handler,
            link: None,
            early_candidates: CandidateQueue::default(),
            local_stream: None,
            deferred_offer: false,
            next_link_id: 0,
        }
    }

    /// Идентификатор локального участника; используется для разрешения glare
    pub fn set_local_user(&mut self, user_id: &str) {
        self.local_user = user_id.to_string();
    }

    pub fn state(&self) -> NegotiationState {
        self.link
            .as_ref()
            .map_or(NegotiationState::Uncreated, |link| link.state)
    }

    pub fn role(&self) -> Option<Role> {
        self.link.as_ref().and_then(|link| link.role)
    }

    pub fn link_id(&self) -> Option<u64> {
        self.link.as_ref().map(|link| link.id)
    }

    pub fn pending_candidates(&self) -> usize {
        self.early_candidates.len() + self.link.as_ref().map_or(0, |link| link.pending.len())
    }

    /// ICE этого соединения сейчас в Disconnected
    pub fn is_disconnected(&self, link_id: u64) -> bool {
        self.link
            .as_ref()
            .is_some_and(|link| link.id == link_id && link.ice_disconnected)
    }

    pub fn attach_local_stream(&mut self, stream: LocalStream) {
        debug!("Local stream {} attached to negotiation engine", stream.id());
        self.local_stream = Some(stream);
    }

    /// Было ли предложение отложено до появления локальных медиа.
    /// Флаг сбрасывается.
    pub fn take_deferred_offer(&mut self) -> bool {
        self.local_stream.is_some() && std::mem::take(&mut self.deferred_offer)
    }

    /// Создаёт и применяет локальный offer.
    ///
    /// `Ok(None)`, если offer отложен (нет локальных медиа) или роль уже
    /// определена (повторный `Join`).
    pub async fn create_offer(&mut self) -> Result<Option<SessionDescription>, NegotiationError> {
        if let Some(link) = &self.link {
            if link.role.is_some() {
                debug!(
                    link_id = link.id,
                    state = ?link.state,
                    "Peer link already negotiating, ignoring offer request"
                );
                return Ok(None);
            }
        }

        let Some(stream) = self.local_stream.clone() else {
            info!("Local media not ready, deferring offer");
            self.deferred_offer = true;
            return Ok(None);
        };
        self.deferred_offer = false;

        let link = self.ensure_link().await?;
        link.role = Some(Role::Offerer);

        let result = async {
            attach_tracks(link, &stream).await?;
            let offer = link.transport.create_offer().await?;
            link.transport.set_local_description(offer.clone()).await?;
            Ok::<_, NegotiationError>(offer)
        }
        .await;

        match result {
            Ok(offer) => {
                link.state = NegotiationState::HaveLocalOffer;
                link.local_offer = Some(offer.sdp.clone());
                info!(link_id = link.id, "Local offer created");
                Ok(Some(offer))
            }
            Err(e) => {
                warn!(link_id = link.id, "Offer creation failed: {}", e);
                link.state = NegotiationState::Failed;
                Err(e)
            }
        }
    }

    /// Применяет удалённый offer и возвращает answer для отправки.
    ///
    /// При glare (у нас уже висит свой offer) сохраняет роль offerer сторона с
    /// лексикографически меньшим id; проигравшая сбрасывает своё соединение
    /// и отвечает. Если sender не указан, сравниваются сами SDP: обе стороны
    /// видят одну и ту же пару offer и приходят к одному результату.
    /// `Ok(None)` означает, что offer проигнорирован.
    pub async fn accept_offer(
        &mut self,
        remote_user: Option<&str>,
        offer: SessionDescription,
    ) -> Result<Option<SessionDescription>, NegotiationError> {
        if offer.kind != SdpKind::Offer {
            return Err(NegotiationError::Sdp(format!(
                "expected an offer, got {:?}",
                offer.kind
            )));
        }

        let current = self
            .link
            .as_ref()
            .map(|link| (link.id, link.state, link.local_offer.clone()));
        if let Some((link_id, state, local_offer)) = current {
            match state {
                NegotiationState::Created => {}
                NegotiationState::HaveLocalOffer => {
                    let local_offer = local_offer.unwrap_or_default();
                    if self.wins_glare(remote_user, &local_offer, &offer.sdp)? {
                        info!(
                            link_id,
                            remote = ?remote_user,
                            "Glare: keeping local offer, ignoring remote offer"
                        );
                        return Ok(None);
                    }
                    info!(link_id, remote = ?remote_user, "Glare: yielding to remote offer");
                    self.reset().await;
                }
                state => {
                    warn!(
                        link_id,
                        ?state,
                        "Remote offer already handled, ignoring duplicate offer"
                    );
                    return Ok(None);
                }
            }
        }

        let Some(stream) = self.local_stream.clone() else {
            return Err(NegotiationError::Tracks(
                "local media is not available".to_string(),
            ));
        };
        self.deferred_offer = false;

        let link = self.ensure_link().await?;
        link.role = Some(Role::Answerer);

        let result = async {
            attach_tracks(link, &stream).await?;
            link.transport.set_remote_description(offer).await?;
            link.remote_description_set = true;
            link.state = NegotiationState::HaveRemoteOffer;
            apply_pending_candidates(link.transport.as_ref(), &mut link.pending).await;

            let answer = link.transport.create_answer().await?;
            link.transport.set_local_description(answer.clone()).await?;
            Ok::<_, NegotiationError>(answer)
        }
        .await;

        match result {
            Ok(answer) => {
                link.state = NegotiationState::HaveLocalAnswer;
                info!(link_id = link.id, "Remote offer accepted, answer created");
                Ok(Some(answer))
            }
            Err(e) => {
                warn!(link_id = link.id, "Answering remote offer failed: {}", e);
                link.state = NegotiationState::Failed;
                Err(e)
            }
        }
    }

    /// Применяет answer собеседника. Без висящего локального offer answer
    /// игнорируется.
    pub async fn accept_answer(&mut self, answer: SessionDescription) -> Result<(), NegotiationError> {
        if answer.kind != SdpKind::Answer {
            return Err(NegotiationError::Sdp(format!(
                "expected an answer, got {:?}",
                answer.kind
            )));
        }

        let Some(link) = self.link.as_mut() else {
            warn!("Answer received without a peer link, ignoring");
            return Ok(());
        };
        if link.state != NegotiationState::HaveLocalOffer {
            warn!(
                link_id = link.id,
                state = ?link.state,
                "Answer received without a pending local offer, ignoring"
            );
            return Ok(());
        }

        match link.transport.set_remote_description(answer).await {
            Ok(()) => {
                link.remote_description_set = true;
                link.state = NegotiationState::HaveRemoteAnswer;
                info!(link_id = link.id, "Remote answer applied");
                apply_pending_candidates(link.transport.as_ref(), &mut link.pending).await;
                Ok(())
            }
            Err(e) => {
                warn!(link_id = link.id, "Applying remote answer failed: {}", e);
                link.state = NegotiationState::Failed;
                Err(e)
            }
        }
    }

    /// Применяет удалённый кандидат или откладывает его до remote description
    pub async fn add_candidate(&mut self, candidate: IceCandidate) {
        dump_candidate("REMOTE", &candidate);
        match self.link.as_mut() {
            Some(link) if link.remote_description_set => {
                if let Err(e) = link.transport.add_ice_candidate(candidate).await {
                    warn!(link_id = link.id, "Failed to add ICE candidate: {}", e);
                }
            }
            Some(link) => {
                debug!(link_id = link.id, "Remote description not set yet, queuing candidate");
                link.pending.push(candidate);
            }
            None => {
                debug!("No peer link yet, queuing candidate");
                self.early_candidates.push(candidate);
            }
        }
    }

    /// Обрабатывает событие peer connection. События уже закрытых
    /// соединений отбрасываются.
    pub fn on_peer_event(&mut self, link_id: u64, event: PeerEvent) -> EngineOutput {
        let Some(link) = self.link.as_mut().filter(|link| link.id == link_id) else {
            debug!(link_id, "Dropping event from stale peer link: {:?}", event);
            return EngineOutput::Nothing;
        };

        match event {
            PeerEvent::LocalCandidate(candidate) => {
                dump_candidate("LOCAL", &candidate);
                EngineOutput::LocalCandidate(candidate)
            }
            PeerEvent::RemoteTrack(track) => {
                if link.state == NegotiationState::Failed {
                    return EngineOutput::Nothing;
                }
                let stream = link
                    .remote_stream
                    .get_or_insert_with(|| RemoteStream::new(track.stream_id.clone()));
                info!(link_id, kind = ?track.kind, "Remote track received: {}", track.id);
                stream.add_track(track);
                let stream = stream.clone();

                if !link.tracks_attached {
                    warn!(link_id, "Remote track before local media was attached");
                    return EngineOutput::Nothing;
                }
                link.state = NegotiationState::Connected;
                EngineOutput::RemoteStream(stream)
            }
            PeerEvent::ConnectionState(state) => {
                debug!(link_id, ?state, "Peer connection state changed");
                match state {
                    PeerConnectionState::Failed => {
                        link.state = NegotiationState::Failed;
                        EngineOutput::Failed(NegotiationError::IceFailed)
                    }
                    PeerConnectionState::Disconnected => {
                        if link.ice_disconnected {
                            return EngineOutput::Nothing;
                        }
                        link.ice_disconnected = true;
                        EngineOutput::Disconnected
                    }
                    PeerConnectionState::Connected => {
                        if !link.ice_disconnected {
                            return EngineOutput::Nothing;
                        }
                        link.ice_disconnected = false;
                        EngineOutput::Reconnected
                    }
                    _ => EngineOutput::Nothing,
                }
            }
        }
    }

    /// Закрывает peer connection и очищает все буферы. Локальный поток
    /// остаётся: он нужен для следующего соединения.
    pub async fn reset(&mut self) {
        if let Some(link) = self.link.take() {
            info!(link_id = link.id, state = ?link.state, "Closing peer link");
            link.transport.close().await;
        }
        self.early_candidates.clear();
        self.deferred_offer = false;
    }

    /// Полная остановка при выходе из комнаты
    pub async fn shutdown(&mut self) {
        self.reset().await;
        self.local_stream = None;
        self.local_user.clear();
    }

    fn wins_glare(
        &self,
        remote_user: Option<&str>,
        local_sdp: &str,
        remote_sdp: &str,
    ) -> Result<bool, NegotiationError> {
        if let Some(remote) = remote_user.filter(|remote| *remote != self.local_user) {
            return Ok(self.local_user.as_str() < remote);
        }
        if local_sdp == remote_sdp {
            return Err(NegotiationError::Sdp(
                "glare with identical offers, cannot pick an offerer".to_string(),
            ));
        }
        Ok(local_sdp < remote_sdp)
    }

    async fn ensure_link(&mut self) -> Result<&mut PeerLink, NegotiationError> {
        let link = match self.link.take() {
            Some(link) => link,
            None => {
                self.next_link_id += 1;
                let id = self.next_link_id;
                let sink = PeerEventSink::new(id, self.handler.clone());
                let transport = self.factory.create(sink).await?;
                let mut link = PeerLink::new(id, transport);
                link.pending.append(&mut self.early_candidates);
                info!(link_id = id, pending = link.pending.len(), "Peer link created");
                link
            }
        };
        Ok(self.link.insert(link))
    }
}

async fn attach_tracks(link: &mut PeerLink, stream: &LocalStream) -> Result<(), NegotiationError> {
    if link.tracks_attached {
        return Ok(());
    }
    link.transport.add_local_tracks(stream).await?;
    link.tracks_attached = true;
    debug!(link_id = link.id, tracks = stream.tracks().len(), "Local tracks attached");
    Ok(())
}
