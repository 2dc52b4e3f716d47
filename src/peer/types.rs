use serde::{Deserialize, Serialize};

/// Kind of session negotiated by an offer.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionMode {
    TextOnly,
    VoiceOneWay,
    VoiceTwoWay,
    VideoOneWay,
}

/// What a session-description signal asks the remote to do.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalAction {
    Offer,
    Answer,
    Refuse,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Pranswer,
    Answer,
    Rollback,
    #[default]
    #[serde(other)]
    Unspecified,
}

/// Session description as it travels over the wire (same JSON shape as
/// `RTCSessionDescription`).
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self { sdp_type: SdpType::Offer, sdp: sdp.into() }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self { sdp_type: SdpType::Answer, sdp: sdp.into() }
    }
}

/// Body of `POST /sdp`
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct SessionDescriptionSignal {
    #[serde(rename = "SDP", default)]
    pub description: SessionDescription,
    #[serde(rename = "Action")]
    pub action: SignalAction,
    #[serde(rename = "Mode", default = "default_mode")]
    pub mode: ConnectionMode,
    #[serde(rename = "Origin")]
    pub origin: String,
}

fn default_mode() -> ConnectionMode {
    ConnectionMode::TextOnly
}

impl SessionDescriptionSignal {
    pub fn offer(description: SessionDescription, mode: ConnectionMode, origin: &str) -> Self {
        Self { description, action: SignalAction::Offer, mode, origin: origin.to_owned() }
    }

    pub fn answer(description: SessionDescription, mode: ConnectionMode, origin: &str) -> Self {
        Self { description, action: SignalAction::Answer, mode, origin: origin.to_owned() }
    }

    /// Refusals carry no description.
    pub fn refuse(mode: ConnectionMode, origin: &str) -> Self {
        Self {
            description: SessionDescription::default(),
            action: SignalAction::Refuse,
            mode,
            origin: origin.to_owned(),
        }
    }
}

/// Body of `POST /candidate`
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct CandidateSignal {
    #[serde(rename = "Candidate")]
    pub candidate: String,
    #[serde(rename = "Origin")]
    pub origin: String,
}

/// ICE server entry as given on the command line
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub r#type: String, // 'stun' or 'turn'
    pub url: String,
    pub username: Option<String>,
    pub credential: Option<String>,
}
