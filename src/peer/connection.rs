use crate::error::{CallError, Result};
use crate::media::EncodedUnit;
use crate::peer::data_channel::{attach_dc, RtcDataChannel};
use crate::peer::ice::rtc_ice_servers;
use crate::peer::state::{MediaCodec, MediaKind, TransportState};
use crate::peer::transport::{
    DataChannel, LocalTrack, PeerEvent, PeerEvents, PeerSession, PeerSessionFactory, RemoteTrack,
};
use crate::peer::types::{SdpType, ServerConfig, SessionDescription};
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::interceptor::registry::Registry;
use webrtc::media::Sample;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtcp::payload_feedbacks::picture_loss_indication::PictureLossIndication;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTPCodecType};
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::rtp_transceiver_direction::RTCRtpTransceiverDirection;
use webrtc::rtp_transceiver::{RTCRtpTransceiver, RTCRtpTransceiverInit};
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;
use webrtc::util::Marshal;

/// Builds webrtc peer connections with the configured ICE servers.
pub struct RtcPeerFactory {
    ice_servers: Vec<ServerConfig>,
}

impl RtcPeerFactory {
    pub fn new(ice_servers: Vec<ServerConfig>) -> Self {
        Self { ice_servers }
    }
}

#[async_trait]
impl PeerSessionFactory for RtcPeerFactory {
    async fn create(&self, events: PeerEvents) -> Result<Arc<dyn PeerSession>> {
        let pc = new_peer(&self.ice_servers, events.clone()).await?;
        Ok(Arc::new(RtcPeerSession { pc, events }))
    }
}

/// Creates the peer connection and forwards all of its callbacks onto `events`.
pub async fn new_peer(
    ice_servers: &[ServerConfig],
    events: PeerEvents,
) -> Result<Arc<RTCPeerConnection>> {
    let mut media_engine = MediaEngine::default();
    media_engine.register_default_codecs()?;
    let mut registry = Registry::new();
    registry = register_default_interceptors(registry, &mut media_engine)?;

    let api = APIBuilder::new()
        .with_media_engine(media_engine)
        .with_interceptor_registry(registry)
        .build();

    let pc = Arc::new(api.new_peer_connection(rtc_config(ice_servers)).await?);

    let tx = events.clone();
    pc.on_ice_candidate(Box::new(move |cand: Option<RTCIceCandidate>| {
        let tx = tx.clone();
        Box::pin(async move {
            let Some(c) = cand else {
                // None marks the end of gathering
                debug!("ICE candidate gathering completed");
                return;
            };
            match c.to_json() {
                Ok(init) => {
                    let _ = tx.send(PeerEvent::LocalCandidate(init.candidate));
                }
                Err(e) => warn!("couldn't serialize local candidate: {}", e),
            }
        })
    }));

    pc.on_ice_gathering_state_change(Box::new(move |state| {
        debug!("ICE gathering state changed to: {:?}", state);
        Box::pin(async {})
    }));

    let tx = events.clone();
    pc.on_peer_connection_state_change(Box::new(move |st: RTCPeerConnectionState| {
        let _ = tx.send(PeerEvent::ConnectionState(transport_state(st)));
        Box::pin(async {})
    }));

    let tx = events.clone();
    pc.on_data_channel(Box::new(move |dc: Arc<RTCDataChannel>| {
        let _ = tx.send(PeerEvent::DataChannel(Arc::new(RtcDataChannel::new(dc.clone()))));
        attach_dc(&dc, tx.clone());
        Box::pin(async {})
    }));

    let tx = events;
    pc.on_track(Box::new(
        move |track: Arc<TrackRemote>,
              _receiver: Arc<RTCRtpReceiver>,
              _transceiver: Arc<RTCRtpTransceiver>| {
            info!(
                ssrc = track.ssrc(),
                codec = %track.codec().capability.mime_type,
                "remote track received"
            );
            let _ = tx.send(PeerEvent::Track(Arc::new(RtcRemoteTrack { track })));
            Box::pin(async {})
        },
    ));

    Ok(pc)
}

fn rtc_config(ice_servers: &[ServerConfig]) -> RTCConfiguration {
    RTCConfiguration {
        ice_servers: rtc_ice_servers(ice_servers),
        ..Default::default()
    }
}

fn transport_state(st: RTCPeerConnectionState) -> TransportState {
    match st {
        RTCPeerConnectionState::Connecting => TransportState::Connecting,
        RTCPeerConnectionState::Connected => TransportState::Connected,
        RTCPeerConnectionState::Disconnected => TransportState::Disconnected,
        RTCPeerConnectionState::Failed => TransportState::Failed,
        RTCPeerConnectionState::Closed => TransportState::Closed,
        _ => TransportState::New,
    }
}

fn codec_type(kind: MediaKind) -> RTPCodecType {
    match kind {
        MediaKind::Audio => RTPCodecType::Audio,
        MediaKind::Video => RTPCodecType::Video,
    }
}

fn to_rtc(desc: SessionDescription) -> Result<RTCSessionDescription> {
    let rtc = match desc.sdp_type {
        SdpType::Offer => RTCSessionDescription::offer(desc.sdp)?,
        SdpType::Answer => RTCSessionDescription::answer(desc.sdp)?,
        SdpType::Pranswer => RTCSessionDescription::pranswer(desc.sdp)?,
        other => {
            return Err(CallError::Peer(format!(
                "unsupported session description type {:?}",
                other
            )))
        }
    };
    Ok(rtc)
}

fn from_rtc(desc: RTCSessionDescription) -> SessionDescription {
    let sdp_type = match desc.sdp_type {
        RTCSdpType::Offer => SdpType::Offer,
        RTCSdpType::Pranswer => SdpType::Pranswer,
        RTCSdpType::Answer => SdpType::Answer,
        RTCSdpType::Rollback => SdpType::Rollback,
        _ => SdpType::Unspecified,
    };
    SessionDescription { sdp_type, sdp: desc.sdp }
}

pub struct RtcPeerSession {
    pc: Arc<RTCPeerConnection>,
    events: PeerEvents,
}

#[async_trait]
impl PeerSession for RtcPeerSession {
    async fn create_offer(&self) -> Result<SessionDescription> {
        Ok(from_rtc(self.pc.create_offer(None).await?))
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        Ok(from_rtc(self.pc.create_answer(None).await?))
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<()> {
        self.pc.set_local_description(to_rtc(desc)?).await?;
        Ok(())
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<()> {
        self.pc.set_remote_description(to_rtc(desc)?).await?;
        Ok(())
    }

    async fn add_remote_candidate(&self, candidate: &str) -> Result<()> {
        let init = RTCIceCandidateInit {
            candidate: candidate.to_owned(),
            ..Default::default()
        };
        self.pc.add_ice_candidate(init).await?;
        Ok(())
    }

    async fn create_data_channel(&self, label: &str) -> Result<Arc<dyn DataChannel>> {
        let dc = self.pc.create_data_channel(label, None).await?;
        attach_dc(&dc, self.events.clone());
        Ok(Arc::new(RtcDataChannel::new(dc)))
    }

    async fn add_local_track(
        &self,
        codec: &MediaCodec,
        stream_id: &str,
    ) -> Result<Arc<dyn LocalTrack>> {
        let track_id = match codec.kind {
            MediaKind::Audio => "audio",
            MediaKind::Video => "video",
        };
        let track = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: codec.mime_type.to_owned(),
                clock_rate: codec.clock_rate,
                channels: codec.channels,
                ..Default::default()
            },
            track_id.to_owned(),
            stream_id.to_owned(),
        ));

        let rtp_sender = self
            .pc
            .add_track(Arc::clone(&track) as Arc<dyn TrackLocal + Send + Sync>)
            .await?;

        // Interceptors only work if incoming RTCP is read
        tokio::spawn(async move {
            let mut rtcp_buf = vec![0u8; 1500];
            while let Ok((_, _)) = rtp_sender.read(&mut rtcp_buf).await {}
        });

        Ok(Arc::new(RtcLocalTrack { track }))
    }

    async fn add_remote_receiver(&self, codec: &MediaCodec) -> Result<()> {
        let kind = codec_type(codec.kind);
        // A sendrecv transceiver added with our own track already receives
        let existing = self.pc.get_transceivers().await;
        if existing.iter().any(|t| t.kind() == kind) {
            return Ok(());
        }
        self.pc
            .add_transceiver_from_kind(
                kind,
                Some(RTCRtpTransceiverInit {
                    direction: RTCRtpTransceiverDirection::Recvonly,
                    send_encodings: vec![],
                }),
            )
            .await?;
        Ok(())
    }

    async fn request_keyframe(&self, ssrc: u32) -> Result<()> {
        self.pc
            .write_rtcp(&[Box::new(PictureLossIndication {
                sender_ssrc: 0,
                media_ssrc: ssrc,
            })])
            .await?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.pc.close().await?;
        Ok(())
    }
}

struct RtcLocalTrack {
    track: Arc<TrackLocalStaticSample>,
}

#[async_trait]
impl LocalTrack for RtcLocalTrack {
    async fn write_sample(&self, data: Bytes, duration: Duration) -> Result<()> {
        self.track
            .write_sample(&Sample {
                data,
                duration,
                ..Default::default()
            })
            .await?;
        Ok(())
    }
}

struct RtcRemoteTrack {
    track: Arc<TrackRemote>,
}

#[async_trait]
impl RemoteTrack for RtcRemoteTrack {
    fn ssrc(&self) -> u32 {
        self.track.ssrc()
    }

    fn mime_type(&self) -> String {
        self.track.codec().capability.mime_type
    }

    /// Whole RTP packet, time position is the RTP timestamp
    async fn read_unit(&self) -> Result<EncodedUnit> {
        let (packet, _) = self.track.read_rtp().await?;
        let data = packet
            .marshal()
            .map_err(|e| CallError::StreamFault(e.to_string()))?;
        Ok(EncodedUnit {
            data,
            time_position: u64::from(packet.header.timestamp),
        })
    }
}
