//! webrtc-rs peer connection engine
//!
//! Creates `RTCPeerConnection`s with explicit VP8/H264 registration and
//! the configured ICE servers, and adapts them to `PeerHandle`.

use super::engine::{
    ConnectionState, MetadataChannel, NegotiationState, PeerEngine, PeerEvent, PeerHandle, TrackEvent, TrackKind,
    VideoOutput,
};
use super::signaling::{SdpType, SessionDescription};
use super::{IceCandidate, WebRTCError};
use crate::config::{VideoCodec, WebRTCConfig};
use crate::media::FrameSource;
use async_trait::async_trait;
use log::{debug, info, warn};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MediaEngine, MIME_TYPE_H264, MIME_TYPE_VP8};
use webrtc::api::APIBuilder;
use webrtc::data_channel::data_channel_state::RTCDataChannelState;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::signaling_state::RTCSignalingState;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTCRtpCodecParameters, RTPCodecType};
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::RTCRtpTransceiver;
use webrtc::track::track_local::track_local_static_rtp::TrackLocalStaticRTP;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

const H264_FMTP: &str = "level-asymmetry-allowed=1;packetization-mode=1;profile-level-id=42e01f";
const H264_PAYLOAD_TYPE: u8 = 96;
const VP8_PAYLOAD_TYPE: u8 = 97;

fn payload_type(codec: VideoCodec) -> u8 {
    match codec {
        VideoCodec::H264 => H264_PAYLOAD_TYPE,
        VideoCodec::VP8 => VP8_PAYLOAD_TYPE,
    }
}

fn codec_capability(codec: VideoCodec) -> RTCRtpCodecCapability {
    let (mime_type, fmtp) = match codec {
        VideoCodec::H264 => (MIME_TYPE_H264, H264_FMTP),
        VideoCodec::VP8 => (MIME_TYPE_VP8, ""),
    };
    RTCRtpCodecCapability {
        mime_type: mime_type.to_string(),
        clock_rate: 90000,
        channels: 0,
        sdp_fmtp_line: fmtp.to_string(),
        rtcp_feedback: vec![],
    }
}

/// Engine backed by webrtc-rs
pub struct RtcEngine {
    config: WebRTCConfig,
}

impl RtcEngine {
    pub fn new(config: WebRTCConfig) -> Self {
        Self { config }
    }

    /// Create a new PeerConnection with the configured settings
    async fn create_peer_connection(&self) -> Result<Arc<RTCPeerConnection>, WebRTCError> {
        let mut media_engine = MediaEngine::default();
        Self::register_video_codecs(&mut media_engine)?;

        // Create interceptor registry for RTCP feedback
        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine)
            .map_err(|e| WebRTCError::ConnectionFailed(format!("Failed to register interceptors: {}", e)))?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let rtc_config = RTCConfiguration {
            ice_servers: self.ice_servers(),
            ..Default::default()
        };

        let peer_connection = api
            .new_peer_connection(rtc_config)
            .await
            .map_err(|e| WebRTCError::ConnectionFailed(format!("Failed to create peer connection: {}", e)))?;

        Ok(Arc::new(peer_connection))
    }

    fn ice_servers(&self) -> Vec<RTCIceServer> {
        self.config
            .ice_servers
            .iter()
            .map(|server| RTCIceServer {
                urls: server.urls.clone(),
                username: server.username.clone(),
                credential: server.credential.clone(),
                ..Default::default()
            })
            .collect()
    }

    /// Register video codecs in the media engine
    fn register_video_codecs(media_engine: &mut MediaEngine) -> Result<(), WebRTCError> {
        for codec in [VideoCodec::H264, VideoCodec::VP8] {
            media_engine
                .register_codec(
                    RTCRtpCodecParameters {
                        capability: codec_capability(codec),
                        payload_type: payload_type(codec),
                        ..Default::default()
                    },
                    RTPCodecType::Video,
                )
                .map_err(|e| {
                    WebRTCError::ConnectionFailed(format!("Failed to register {}: {}", codec.as_str(), e))
                })?;
        }
        Ok(())
    }

    fn install_callbacks(pc: &Arc<RTCPeerConnection>, key: &str, events: &mpsc::UnboundedSender<PeerEvent>) {
        let tx = events.clone();
        let track_key = key.to_string();
        pc.on_track(Box::new(
            move |track: Arc<TrackRemote>, _receiver: Arc<RTCRtpReceiver>, _transceiver: Arc<RTCRtpTransceiver>| {
                let tx = tx.clone();
                let key = track_key.clone();
                Box::pin(async move {
                    let kind = match track.kind() {
                        RTPCodecType::Video => TrackKind::Video,
                        _ => TrackKind::Audio,
                    };
                    info!("Session {} remote {:?} track {} ({})", key, kind, track.id(), track.codec().capability.mime_type);
                    let source = match kind {
                        TrackKind::Video => decode_track(&key, track.clone()),
                        TrackKind::Audio => None,
                    };
                    let _ = tx.send(PeerEvent::Track(TrackEvent {
                        id: track.id(),
                        kind,
                        source,
                    }));
                })
            },
        ));

        let tx = events.clone();
        pc.on_data_channel(Box::new(move |dc: Arc<RTCDataChannel>| {
            let tx = tx.clone();
            Box::pin(async move {
                debug!("Remote data channel '{}' opened", dc.label());
                let _ = tx.send(PeerEvent::DataChannel(Arc::new(RtcMetadataChannel { dc })));
            })
        }));

        let tx = events.clone();
        let state_key = key.to_string();
        pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
            let tx = tx.clone();
            let key = state_key.clone();
            Box::pin(async move {
                debug!("Session {} peer connection state: {}", key, state);
                if let Some(state) = connection_state(state) {
                    let _ = tx.send(PeerEvent::ConnectionState(state));
                }
            })
        }));
    }
}

#[async_trait]
impl PeerEngine for RtcEngine {
    async fn create_handle(&self, session_key: &str) -> Result<Arc<dyn PeerHandle>, WebRTCError> {
        let pc = self.create_peer_connection().await?;
        let (tx, rx) = mpsc::unbounded_channel();
        Self::install_callbacks(&pc, session_key, &tx);

        Ok(Arc::new(RtcPeer {
            key: session_key.to_string(),
            pc,
            codec: self.config.video_codec,
            events: Mutex::new(Some(rx)),
            output_track: Mutex::new(None),
            closed: AtomicBool::new(false),
        }))
    }
}

#[cfg(feature = "gstreamer")]
fn decode_track(key: &str, track: Arc<TrackRemote>) -> Option<Box<dyn FrameSource>> {
    match crate::gstreamer::TrackFrameSource::start(track) {
        Ok(source) => Some(Box::new(source)),
        Err(e) => {
            warn!("Session {} track not decodable: {}", key, e);
            None
        }
    }
}

#[cfg(not(feature = "gstreamer"))]
fn decode_track(key: &str, _track: Arc<TrackRemote>) -> Option<Box<dyn FrameSource>> {
    warn!("Session {} video track ignored: gstreamer feature is not enabled", key);
    None
}

fn connection_state(state: RTCPeerConnectionState) -> Option<ConnectionState> {
    match state {
        RTCPeerConnectionState::New => Some(ConnectionState::New),
        RTCPeerConnectionState::Connecting => Some(ConnectionState::Connecting),
        RTCPeerConnectionState::Connected => Some(ConnectionState::Connected),
        RTCPeerConnectionState::Disconnected => Some(ConnectionState::Disconnected),
        RTCPeerConnectionState::Failed => Some(ConnectionState::Failed),
        RTCPeerConnectionState::Closed => Some(ConnectionState::Closed),
        RTCPeerConnectionState::Unspecified => None,
    }
}

fn negotiation_state(state: RTCSignalingState) -> NegotiationState {
    match state {
        RTCSignalingState::HaveLocalOffer | RTCSignalingState::HaveLocalPranswer => NegotiationState::HaveLocalOffer,
        RTCSignalingState::HaveRemoteOffer | RTCSignalingState::HaveRemotePranswer => {
            NegotiationState::HaveRemoteOffer
        }
        RTCSignalingState::Stable => NegotiationState::Stable,
        RTCSignalingState::Closed => NegotiationState::Closed,
        RTCSignalingState::Unspecified => NegotiationState::New,
    }
}

fn to_rtc(desc: SessionDescription) -> Result<RTCSessionDescription, WebRTCError> {
    let parsed = match desc.sdp_type {
        SdpType::Offer => RTCSessionDescription::offer(desc.sdp),
        SdpType::Answer => RTCSessionDescription::answer(desc.sdp),
        SdpType::Pranswer => RTCSessionDescription::pranswer(desc.sdp),
        SdpType::Rollback => return Err(WebRTCError::SdpError("rollback is not supported".to_string())),
    };
    parsed.map_err(|e| WebRTCError::SdpError(format!("Invalid SDP: {}", e)))
}

fn from_rtc(desc: RTCSessionDescription) -> SessionDescription {
    match desc.sdp_type {
        RTCSdpType::Offer => SessionDescription::offer(desc.sdp),
        _ => SessionDescription::answer(desc.sdp),
    }
}

/// One webrtc-rs peer connection
pub struct RtcPeer {
    key: String,
    pc: Arc<RTCPeerConnection>,
    codec: VideoCodec,
    events: Mutex<Option<mpsc::UnboundedReceiver<PeerEvent>>>,
    output_track: Mutex<Option<Arc<TrackLocalStaticRTP>>>,
    closed: AtomicBool,
}

impl RtcPeer {
    fn ensure_open(&self) -> Result<(), WebRTCError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(WebRTCError::ConnectionFailed(format!("peer connection {} is closed", self.key)));
        }
        Ok(())
    }

    /// Add the outgoing video track so the answer offers it back
    async fn add_output_track(&self) -> Result<(), WebRTCError> {
        if self.output_track.lock().is_some() {
            return Ok(());
        }
        let track = Arc::new(TrackLocalStaticRTP::new(
            codec_capability(self.codec),
            format!("video-{}", uuid::Uuid::new_v4()),
            format!("relay-{}", self.key),
        ));
        let sender = self
            .pc
            .add_track(Arc::clone(&track) as Arc<dyn TrackLocal + Send + Sync>)
            .await
            .map_err(|e| WebRTCError::MediaError(format!("Failed to add video track: {}", e)))?;

        // Drain RTCP so interceptors keep running
        tokio::spawn(async move {
            let mut buf = vec![0u8; 1500];
            while sender.read(&mut buf).await.is_ok() {}
        });

        *self.output_track.lock() = Some(track);
        Ok(())
    }
}

#[async_trait]
impl PeerHandle for RtcPeer {
    fn negotiation_state(&self) -> NegotiationState {
        if self.closed.load(Ordering::SeqCst) {
            return NegotiationState::Closed;
        }
        negotiation_state(self.pc.signaling_state())
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), WebRTCError> {
        self.ensure_open()?;
        let wants_video = desc.sdp_type == SdpType::Offer && desc.sdp.contains("m=video");
        self.pc
            .set_remote_description(to_rtc(desc)?)
            .await
            .map_err(|e| WebRTCError::SdpError(format!("Failed to set remote description: {}", e)))?;
        if wants_video {
            self.add_output_track().await?;
        }
        Ok(())
    }

    fn take_events(&self) -> Option<mpsc::UnboundedReceiver<PeerEvent>> {
        self.events.lock().take()
    }

    async fn create_answer(&self) -> Result<SessionDescription, WebRTCError> {
        self.ensure_open()?;
        let answer = self
            .pc
            .create_answer(None)
            .await
            .map_err(|e| WebRTCError::SdpError(format!("Failed to create answer: {}", e)))?;
        Ok(from_rtc(answer))
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), WebRTCError> {
        self.ensure_open()?;
        self.pc
            .set_local_description(to_rtc(desc)?)
            .await
            .map_err(|e| WebRTCError::SdpError(format!("Failed to set local description: {}", e)))
    }

    async fn local_description(&self) -> Option<SessionDescription> {
        self.pc.local_description().await.map(from_rtc)
    }

    async fn add_ice_candidate(&self, candidate: &IceCandidate) -> Result<(), WebRTCError> {
        self.ensure_open()?;
        let init = RTCIceCandidateInit {
            candidate: candidate.to_attribute(),
            sdp_mid: candidate.sdp_mid.clone(),
            sdp_mline_index: candidate.sdp_mline_index,
            username_fragment: None,
        };
        self.pc
            .add_ice_candidate(init)
            .await
            .map_err(|e| WebRTCError::IceError(format!("Failed to add ICE candidate: {}", e)))
    }

    #[cfg(feature = "gstreamer")]
    async fn add_video_output(&self) -> Result<Arc<dyn VideoOutput>, WebRTCError> {
        self.ensure_open()?;
        let track = self.output_track.lock().clone();
        match track {
            Some(track) => Ok(Arc::new(crate::gstreamer::TrackVideoOutput::new(
                track,
                self.codec,
                payload_type(self.codec),
            ))),
            None => Err(WebRTCError::MediaError(format!("session {} negotiated no video", self.key))),
        }
    }

    #[cfg(not(feature = "gstreamer"))]
    async fn add_video_output(&self) -> Result<Arc<dyn VideoOutput>, WebRTCError> {
        Err(WebRTCError::FeatureDisabled("gstreamer"))
    }

    async fn close(&self) -> Result<(), WebRTCError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.events.lock().take();
        self.pc
            .close()
            .await
            .map_err(|e| WebRTCError::ConnectionFailed(format!("Failed to close connection: {}", e)))
    }
}

/// Remote-opened data channel
pub struct RtcMetadataChannel {
    dc: Arc<RTCDataChannel>,
}

#[async_trait]
impl MetadataChannel for RtcMetadataChannel {
    fn label(&self) -> String {
        self.dc.label().to_string()
    }

    fn is_open(&self) -> bool {
        self.dc.ready_state() == RTCDataChannelState::Open
    }

    async fn send_text(&self, text: String) -> Result<(), WebRTCError> {
        self.dc
            .send_text(text)
            .await
            .map(|_| ())
            .map_err(|e| WebRTCError::ChannelNotReady(format!("{}: {}", self.dc.label(), e)))
    }
}
