//! Capability interface to the peer-to-peer transport.
//!
//! A [`PeerSession`] is created per remote party by a [`PeerSessionFactory`]. The
//! transport never calls back into the session directly: everything it discovers
//! (local candidates, connection-state changes, data channels, remote tracks,
//! channel messages) is pushed as a [`PeerEvent`] onto the channel handed to the
//! factory, and the owning session consumes that channel from a single task.

use crate::error::Result;
use crate::media::EncodedUnit;
use crate::peer::state::{MediaCodec, TransportState};
use crate::peer::types::SessionDescription;
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

pub type PeerEvents = mpsc::UnboundedSender<PeerEvent>;

pub enum PeerEvent {
    LocalCandidate(String),
    ConnectionState(TransportState),
    /// Channel opened by the remote side
    DataChannel(Arc<dyn DataChannel>),
    DataChannelOpen,
    DataChannelMessage(String),
    DataChannelClosed,
    Track(Arc<dyn RemoteTrack>),
}

impl std::fmt::Debug for PeerEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PeerEvent::LocalCandidate(c) => f.debug_tuple("LocalCandidate").field(c).finish(),
            PeerEvent::ConnectionState(s) => f.debug_tuple("ConnectionState").field(s).finish(),
            PeerEvent::DataChannel(dc) => f.debug_tuple("DataChannel").field(&dc.label()).finish(),
            PeerEvent::DataChannelOpen => f.write_str("DataChannelOpen"),
            PeerEvent::DataChannelMessage(m) => {
                f.debug_tuple("DataChannelMessage").field(m).finish()
            }
            PeerEvent::DataChannelClosed => f.write_str("DataChannelClosed"),
            PeerEvent::Track(t) => f.debug_tuple("Track").field(&t.ssrc()).finish(),
        }
    }
}

#[async_trait]
pub trait PeerSessionFactory: Send + Sync {
    async fn create(&self, events: PeerEvents) -> Result<Arc<dyn PeerSession>>;
}

#[async_trait]
pub trait PeerSession: Send + Sync {
    async fn create_offer(&self) -> Result<SessionDescription>;
    async fn create_answer(&self) -> Result<SessionDescription>;
    async fn set_local_description(&self, desc: SessionDescription) -> Result<()>;
    async fn set_remote_description(&self, desc: SessionDescription) -> Result<()>;
    async fn add_remote_candidate(&self, candidate: &str) -> Result<()>;

    /// Channel events are delivered on the session's event stream.
    async fn create_data_channel(&self, label: &str) -> Result<Arc<dyn DataChannel>>;

    async fn add_local_track(&self, codec: &MediaCodec, stream_id: &str)
        -> Result<Arc<dyn LocalTrack>>;

    /// Prepares to receive `codec`; the track itself arrives as [`PeerEvent::Track`].
    async fn add_remote_receiver(&self, codec: &MediaCodec) -> Result<()>;

    async fn request_keyframe(&self, ssrc: u32) -> Result<()>;
    async fn close(&self) -> Result<()>;
}

#[async_trait]
pub trait DataChannel: Send + Sync {
    fn label(&self) -> String;
    async fn send_text(&self, text: &str) -> Result<()>;
    async fn close(&self) -> Result<()>;
}

/// Outbound media track fed with encoded samples.
#[async_trait]
pub trait LocalTrack: Send + Sync {
    async fn write_sample(&self, data: Bytes, duration: Duration) -> Result<()>;
}

/// Inbound media track.
#[async_trait]
pub trait RemoteTrack: Send + Sync {
    fn ssrc(&self) -> u32;
    fn mime_type(&self) -> String;
    async fn read_unit(&self) -> Result<EncodedUnit>;
}
