//! Тестовый peer connection: записывает вызовы и ничего не передаёт по сети.

use crate::error::NegotiationError;
use crate::media::{LocalStream, MediaConstraints, SampleTrackSource};
use crate::peer::transport::{PeerFactory, PeerTransport};
use crate::peer::types::{IceCandidate, PeerEventSink, SdpKind, SessionDescription};
use crate::utils::random_id;
use async_trait::async_trait;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    AddTracks,
    CreateOffer,
    CreateAnswer,
    SetLocal(SdpKind),
    SetRemote(SdpKind),
    Candidate(String),
    Close,
}

pub struct FakeTransport {
    pub link_id: u64,
    calls: Mutex<Vec<Call>>,
}

impl FakeTransport {
    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl PeerTransport for FakeTransport {
    async fn add_local_tracks(&self, _stream: &LocalStream) -> Result<(), NegotiationError> {
        self.record(Call::AddTracks);
        Ok(())
    }

    async fn create_offer(&self) -> Result<SessionDescription, NegotiationError> {
        self.record(Call::CreateOffer);
        // как у настоящего SDP, у каждого offer свой session id
        Ok(SessionDescription::offer(format!("offer-{}-{}", self.link_id, random_id())))
    }

    async fn create_answer(&self) -> Result<SessionDescription, NegotiationError> {
        self.record(Call::CreateAnswer);
        Ok(SessionDescription::answer(format!("answer-{}", self.link_id)))
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), NegotiationError> {
        self.record(Call::SetLocal(desc.kind));
        Ok(())
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), NegotiationError> {
        if desc.sdp == "garbage" {
            return Err(NegotiationError::Sdp("malformed SDP".into()));
        }
        self.record(Call::SetRemote(desc.kind));
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), NegotiationError> {
        self.record(Call::Candidate(candidate.candidate));
        Ok(())
    }

    async fn close(&self) {
        self.record(Call::Close);
    }
}

/// Фабрика, запоминающая созданные соединения и их каналы событий
#[derive(Default)]
pub struct FakeFactory {
    created: Mutex<Vec<(Arc<FakeTransport>, PeerEventSink)>>,
}

impl FakeFactory {
    pub fn created(&self) -> usize {
        self.created.lock().unwrap().len()
    }

    pub fn transport(&self, index: usize) -> Arc<FakeTransport> {
        self.created.lock().unwrap()[index].0.clone()
    }

    pub fn sink(&self, index: usize) -> PeerEventSink {
        self.created.lock().unwrap()[index].1.clone()
    }
}

#[async_trait]
impl PeerFactory for FakeFactory {
    async fn create(&self, events: PeerEventSink) -> Result<Arc<dyn PeerTransport>, NegotiationError> {
        let transport = Arc::new(FakeTransport {
            link_id: events.link_id(),
            calls: Mutex::new(Vec::new()),
        });
        self.created
            .lock()
            .unwrap()
            .push((transport.clone(), events));
        Ok(transport)
    }
}

pub fn candidate(name: &str) -> IceCandidate {
    IceCandidate {
        candidate: name.to_string(),
        sdp_mid: Some("0".into()),
        sdp_mline_index: Some(0),
        username_fragment: None,
    }
}

pub fn local_stream() -> LocalStream {
    LocalStream::new(
        "local",
        MediaConstraints::default(),
        vec![
            SampleTrackSource::video_track("local"),
            SampleTrackSource::audio_track("local"),
        ],
    )
}
