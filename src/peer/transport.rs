use crate::error::NegotiationError;
use crate::media::LocalStream;
use crate::peer::types::{IceCandidate, PeerEventSink, SessionDescription};
use async_trait::async_trait;
use std::sync::Arc;

/// Peer connection, которым владеет движок согласования.
///
/// Вся мутация идёт через `NegotiationEngine`; снаружи к транспорту не обращаются.
#[async_trait]
pub trait PeerTransport: Send + Sync {
    async fn add_local_tracks(&self, stream: &LocalStream) -> Result<(), NegotiationError>;

    async fn create_offer(&self) -> Result<SessionDescription, NegotiationError>;

    async fn create_answer(&self) -> Result<SessionDescription, NegotiationError>;

    async fn set_local_description(&self, desc: SessionDescription)
        -> Result<(), NegotiationError>;

    async fn set_remote_description(
        &self,
        desc: SessionDescription,
    ) -> Result<(), NegotiationError>;

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), NegotiationError>;

    /// Закрывает соединение; повторный вызов безопасен
    async fn close(&self);
}

/// Создаёт peer connection; события нового соединения идут в `events`
#[async_trait]
pub trait PeerFactory: Send + Sync {
    async fn create(&self, events: PeerEventSink)
        -> Result<Arc<dyn PeerTransport>, NegotiationError>;
}
