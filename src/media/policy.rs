use crate::peer::state::Role;
use crate::peer::types::ConnectionMode;

/// Point in the call where media may be attached or started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaTrigger {
    Dial,
    OfferReceived,
    AnswerReceived,
    Connected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MediaPlan {
    pub attach_sender: bool,
    pub attach_receiver: bool,
    pub start_streaming: bool,
}

/// Decides what media to attach for `mode` and `role` at `trigger`.
///
/// Senders have to exist before the local description is created so their
/// track is negotiated; a two-way responder therefore adds its sender on the
/// offer and only starts streaming once connected.
pub fn plan(mode: ConnectionMode, role: Role, trigger: MediaTrigger) -> MediaPlan {
    use MediaTrigger::*;

    match mode {
        ConnectionMode::VoiceOneWay => match (role, trigger) {
            (Role::Initiator, Dial) => MediaPlan {
                attach_sender: true,
                ..Default::default()
            },
            (_, OfferReceived) => MediaPlan {
                attach_receiver: true,
                ..Default::default()
            },
            (Role::Initiator, Connected) => MediaPlan {
                start_streaming: true,
                ..Default::default()
            },
            _ => MediaPlan::default(),
        },
        ConnectionMode::VoiceTwoWay => match (role, trigger) {
            (Role::Initiator, Dial) => MediaPlan {
                attach_sender: true,
                ..Default::default()
            },
            (_, OfferReceived) => MediaPlan {
                attach_sender: true,
                attach_receiver: true,
                ..Default::default()
            },
            (_, AnswerReceived) => MediaPlan {
                attach_receiver: true,
                ..Default::default()
            },
            (_, Connected) => MediaPlan {
                start_streaming: true,
                ..Default::default()
            },
            _ => MediaPlan::default(),
        },
        // No video pipeline; one-way video negotiates the data channel only
        ConnectionMode::TextOnly | ConnectionMode::VideoOneWay => MediaPlan::default(),
    }
}
