//! WebRTC signaling and session lifecycle
//!
//! This module provides:
//! - ICE candidate parsing
//! - The signaling event protocol (offer/answer, trickled ICE, detections)
//! - Per-session peer connection state and the session registry
//! - The signaling router that drives offer/answer and media hand-off
//! - The metadata sink used to ship detections back to the browser

pub mod candidate;
pub mod signaling;
pub mod engine;
pub mod session;
pub mod router;
pub mod data_channel;
#[cfg(feature = "webrtc-streaming")]
pub mod peer_connection;
#[cfg(test)]
pub(crate) mod testing;

pub use candidate::IceCandidate;
pub use engine::{ConnectionState, MetadataChannel, NegotiationState, PeerEngine, PeerEvent, PeerHandle, TrackKind, VideoOutput};
pub use router::{RouterSettings, SignalingRouter};
pub use session::{Session, SessionRegistry};
pub use signaling::{EventEmitter, OutboundEvent, SessionDescription, SignalingEvent};

use std::error::Error;
use std::fmt;

/// WebRTC-related errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebRTCError {
    /// Candidate string does not follow the ICE attribute grammar
    MalformedCandidate(String),
    /// Event addressed to a session key with no live session
    NoActiveSession(String),
    /// Offer arrived while the peer connection was already closed
    StaleNegotiation(String),
    /// Frame processor produced no usable frame
    InvalidFrame(String),
    /// Metadata data channel is not open
    ChannelNotReady(String),
    /// Peer connection creation or teardown failed
    ConnectionFailed(String),
    /// SDP processing failed
    SdpError(String),
    /// ICE candidate installation failed
    IceError(String),
    /// Media track error
    MediaError(String),
    /// Signaling message could not be parsed or delivered
    SignalingError(String),
    /// A cargo feature needed for the operation is not enabled
    FeatureDisabled(&'static str),
}

impl WebRTCError {
    /// Errors that are part of normal operation (races with teardown,
    /// bad client input) rather than server faults.
    pub fn is_expected(&self) -> bool {
        matches!(
            self,
            WebRTCError::MalformedCandidate(_)
                | WebRTCError::NoActiveSession(_)
                | WebRTCError::StaleNegotiation(_)
                | WebRTCError::ChannelNotReady(_)
        )
    }
}

impl fmt::Display for WebRTCError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WebRTCError::MalformedCandidate(msg) => write!(f, "Malformed candidate: {}", msg),
            WebRTCError::NoActiveSession(id) => write!(f, "No active session: {}", id),
            WebRTCError::StaleNegotiation(id) => write!(f, "Stale negotiation for session: {}", id),
            WebRTCError::InvalidFrame(msg) => write!(f, "Invalid frame: {}", msg),
            WebRTCError::ChannelNotReady(msg) => write!(f, "Channel not ready: {}", msg),
            WebRTCError::ConnectionFailed(msg) => write!(f, "Connection failed: {}", msg),
            WebRTCError::SdpError(msg) => write!(f, "SDP error: {}", msg),
            WebRTCError::IceError(msg) => write!(f, "ICE error: {}", msg),
            WebRTCError::MediaError(msg) => write!(f, "Media error: {}", msg),
            WebRTCError::SignalingError(msg) => write!(f, "Signaling error: {}", msg),
            WebRTCError::FeatureDisabled(feature) => write!(f, "{} feature is not enabled", feature),
        }
    }
}

impl Error for WebRTCError {}
