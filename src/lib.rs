pub mod config;
pub mod controller;
pub mod error;
pub mod logger;
pub mod media;
pub mod peer;
pub mod session;
pub mod signaling;
pub mod utils;

pub use config::Config;
pub use controller::{Command, SessionController, SessionHandle};
pub use error::{AcquisitionError, ConfigError, ConnectError, NegotiationError};
pub use media::{LocalStream, LocalTrack, MediaConstraints, MediaSource, SampleTrackSource, TrackKind};
pub use session::{MediaToggles, SessionSnapshot, SessionStatus};
