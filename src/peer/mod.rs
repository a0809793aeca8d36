pub mod connection;
pub mod engine;
#[cfg(test)]
pub(crate) mod fake;
pub mod ice;
pub mod state;
pub mod transport;
pub mod types;

pub use connection::RtcPeerFactory;
pub use engine::{EngineOutput, NegotiationEngine};
pub use state::{NegotiationState, Role, GRACE_PERIOD};
pub use transport::{PeerFactory, PeerTransport};
pub use types::{
    IceCandidate, PeerConnectionState, PeerEvent, PeerEventSink, RemoteStream, RemoteTrack,
    SdpKind, ServerConfig, SessionDescription,
};
