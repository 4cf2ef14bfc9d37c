//! Signaling event protocol
//!
//! Every WebSocket text frame carries one event:
//!
//! ```json
//! {"event": "sdp", "data": {"sdp": "v=0...", "type": "offer"}}
//! ```
//!
//! `connect` and `disconnect` never travel on the wire; the transport raises
//! them when a connection opens or closes.

use super::WebRTCError;
use crate::detect::Detection;
use serde::{Deserialize, Serialize, Serializer};

/// SDP description type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Answer,
    Pranswer,
    Rollback,
}

impl SdpType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SdpType::Offer => "offer",
            SdpType::Answer => "answer",
            SdpType::Pranswer => "pranswer",
            SdpType::Rollback => "rollback",
        }
    }
}

/// Session description exchanged during offer/answer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    pub sdp: String,
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self { sdp: sdp.into(), sdp_type: SdpType::Offer }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self { sdp: sdp.into(), sdp_type: SdpType::Answer }
    }
}

/// Trickled ICE candidate as sent by the browser
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidatePayload {
    /// Empty string marks end-of-candidates
    #[serde(default)]
    pub candidate: String,
    #[serde(rename = "sdpMid", default)]
    pub sdp_mid: Option<String>,
    #[serde(rename = "sdpMLineIndex", default)]
    pub sdp_mline_index: Option<u16>,
}

/// Detection metadata for one processed frame
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectionPayload {
    /// Serialized as the integer `0` when nothing was detected
    #[serde(serialize_with = "serialize_detections")]
    pub detections: Vec<Detection>,
    pub original_width: u32,
    pub original_height: u32,
}

fn serialize_detections<S: Serializer>(detections: &[Detection], serializer: S) -> Result<S::Ok, S::Error> {
    if detections.is_empty() {
        serializer.serialize_u8(0)
    } else {
        serializer.collect_seq(detections)
    }
}

/// Inbound signaling event, addressed by session key at dispatch time
#[derive(Debug, Clone, PartialEq)]
pub enum SignalingEvent {
    Connect,
    Disconnect,
    Sdp(SessionDescription),
    IceCandidate(CandidatePayload),
}

/// Wire shape of inbound events
#[derive(Debug, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
enum WireEvent {
    Sdp(SessionDescription),
    IceCandidate(CandidatePayload),
}

impl SignalingEvent {
    /// Event name as used on the wire and in logs
    pub fn name(&self) -> &'static str {
        match self {
            SignalingEvent::Connect => "connect",
            SignalingEvent::Disconnect => "disconnect",
            SignalingEvent::Sdp(_) => "sdp",
            SignalingEvent::IceCandidate(_) => "ice_candidate",
        }
    }

    /// Parse an inbound WebSocket text frame
    pub fn from_json(text: &str) -> Result<Self, WebRTCError> {
        let wire: WireEvent = serde_json::from_str(text.trim())
            .map_err(|e| WebRTCError::SignalingError(format!("Invalid signaling message: {}", e)))?;
        Ok(match wire {
            WireEvent::Sdp(desc) => SignalingEvent::Sdp(desc),
            WireEvent::IceCandidate(payload) => SignalingEvent::IceCandidate(payload),
        })
    }
}

/// Outbound signaling event
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum OutboundEvent {
    SdpAnswer(SessionDescription),
    Detections(DetectionPayload),
}

impl OutboundEvent {
    pub fn name(&self) -> &'static str {
        match self {
            OutboundEvent::SdpAnswer(_) => "sdp_answer",
            OutboundEvent::Detections(_) => "detections",
        }
    }

    /// Serialize to JSON
    pub fn to_json(&self) -> Result<String, WebRTCError> {
        serde_json::to_string(self)
            .map_err(|e| WebRTCError::SignalingError(format!("Failed to serialize {}: {}", self.name(), e)))
    }
}

/// Delivers outbound events to the connection that owns a session key.
///
/// Never broadcasts; an event for a key without a live connection is an
/// error the caller logs and drops.
pub trait EventEmitter: Send + Sync {
    fn emit(&self, session_key: &str, event: OutboundEvent) -> Result<(), WebRTCError>;
}
