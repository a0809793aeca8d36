use crate::peer::ice::CandidateQueue;
use crate::peer::transport::PeerTransport;
use crate::peer::types::RemoteStream;
use std::sync::Arc;
use std::time::Duration;

/// Период ожидания восстановления ICE перед разрывом сессии
pub const GRACE_PERIOD: Duration = Duration::from_secs(10);

/// Состояние согласования одного PeerLink
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationState {
    Uncreated,
    Created,
    HaveLocalOffer,
    HaveRemoteAnswer,
    HaveRemoteOffer,
    HaveLocalAnswer,
    /// Получен первый удалённый трек
    Connected,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Offerer,
    Answerer,
}

/// Единственный peer connection сессии вместе с его состоянием согласования
pub struct PeerLink {
    pub id: u64,
    pub transport: Arc<dyn PeerTransport>,
    pub role: Option<Role>,
    pub state: NegotiationState,
    /// SDP нашего висящего offer; нужен для разрешения glare без sender
    pub local_offer: Option<String>,
    /// Кандидаты, полученные до установки remote description
    pub pending: CandidateQueue,
    pub tracks_attached: bool,
    pub remote_description_set: bool,
    /// ICE сообщил Disconnected и ещё не восстановился
    pub ice_disconnected: bool,
    pub remote_stream: Option<RemoteStream>,
}

impl PeerLink {
    pub fn new(id: u64, transport: Arc<dyn PeerTransport>) -> Self {
        Self {
            id,
            transport,
            role: None,
            state: NegotiationState::Created,
            local_offer: None,
            pending: CandidateQueue::default(),
            tracks_attached: false,
            remote_description_set: false,
            ice_disconnected: false,
            remote_stream: None,
        }
    }
}
