use std::fmt;
use std::time::Duration;

/// ========== SESSION STATE ==========

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Standby,
    Ringing,
    Answering,
    Active,
    Closed,
}

impl SessionState {
    pub fn is_closed(self) -> bool {
        self == SessionState::Closed
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionState::Standby => "standby",
            SessionState::Ringing => "ringing",
            SessionState::Answering => "answering",
            SessionState::Active => "in call",
            SessionState::Closed => "closed",
        };
        f.pad(s)
    }
}

/// Which side started the session. Never changes after creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Initiator,
    Responder,
}

/// Connection state reported by the peer-session transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

/// ========== MEDIA CAPABILITIES ==========

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Audio,
    Video,
}

/// Codec capability handed to the media boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaCodec {
    pub kind: MediaKind,
    pub mime_type: &'static str,
    pub clock_rate: u32,
    pub channels: u16,
}

pub const AUDIO_CODEC: MediaCodec = MediaCodec {
    kind: MediaKind::Audio,
    mime_type: "audio/opus",
    clock_rate: 48_000,
    channels: 2,
};

/// ========== CONSTANTS ==========

/// One Ogg page of Opus audio per tick
pub const OGG_PAGE_DURATION: Duration = Duration::from_millis(20);

/// Picture-loss indications are sent upstream this often while receiving
pub const KEYFRAME_INTERVAL: Duration = Duration::from_secs(3);

/// Label of the data channel created by the initiator
pub const DATA_CHANNEL_LABEL: &str = "data";
