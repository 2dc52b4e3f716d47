pub mod connection;
pub mod data_channel;
pub mod ice;
pub mod state;
pub mod transport;
pub mod types;

pub use connection::RtcPeerFactory;
pub use state::{MediaCodec, MediaKind, Role, SessionState, TransportState, AUDIO_CODEC};
pub use transport::{
    DataChannel, LocalTrack, PeerEvent, PeerEvents, PeerSession, PeerSessionFactory, RemoteTrack,
};
pub use types::{
    CandidateSignal, ConnectionMode, SdpType, ServerConfig, SessionDescription,
    SessionDescriptionSignal, SignalAction,
};
