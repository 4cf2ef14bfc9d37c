//! Peer connection engine seam
//!
//! The registry and router only talk to the WebRTC engine through these
//! traits. `peer_connection::RtcEngine` is the webrtc-rs implementation.

use super::{IceCandidate, WebRTCError};
use super::signaling::SessionDescription;
use crate::media::{FrameSource, VideoFrame};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Signaling state of a peer connection handle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationState {
    New,
    HaveLocalOffer,
    HaveRemoteOffer,
    Stable,
    Closed,
}

impl NegotiationState {
    pub fn is_closed(&self) -> bool {
        *self == NegotiationState::Closed
    }
}

/// Kind of a remote media track
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    Video,
    Audio,
}

/// Transport-level connection state, as surfaced by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

/// A remote track surfaced by the engine
pub struct TrackEvent {
    pub id: String,
    pub kind: TrackKind,
    /// Decoded frames of the track; `None` when the engine cannot decode it
    pub source: Option<Box<dyn FrameSource>>,
}

/// Asynchronous engine events for one peer connection
pub enum PeerEvent {
    Track(TrackEvent),
    DataChannel(Arc<dyn MetadataChannel>),
    ConnectionState(ConnectionState),
}

/// Factory for peer connection handles
#[async_trait]
pub trait PeerEngine: Send + Sync {
    /// Create a handle configured with the process STUN/TURN servers
    async fn create_handle(&self, session_key: &str) -> Result<Arc<dyn PeerHandle>, WebRTCError>;
}

/// One peer connection
#[async_trait]
pub trait PeerHandle: Send + Sync {
    fn negotiation_state(&self) -> NegotiationState;

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), WebRTCError>;

    /// Take the event stream of this handle.
    ///
    /// Returns `None` once taken. Events raised before the stream is taken
    /// are buffered.
    fn take_events(&self) -> Option<mpsc::UnboundedReceiver<PeerEvent>>;

    async fn create_answer(&self) -> Result<SessionDescription, WebRTCError>;

    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), WebRTCError>;

    async fn local_description(&self) -> Option<SessionDescription>;

    async fn add_ice_candidate(&self, candidate: &IceCandidate) -> Result<(), WebRTCError>;

    /// Outgoing video track carrying processed frames
    async fn add_video_output(&self) -> Result<Arc<dyn VideoOutput>, WebRTCError>;

    /// Close the connection. Calling it more than once is a no-op.
    async fn close(&self) -> Result<(), WebRTCError>;
}

/// Out-of-band text channel to the remote peer
#[async_trait]
pub trait MetadataChannel: Send + Sync {
    fn label(&self) -> String;

    fn is_open(&self) -> bool;

    async fn send_text(&self, text: String) -> Result<(), WebRTCError>;
}

/// Sink for outgoing video frames
#[async_trait]
pub trait VideoOutput: Send + Sync {
    async fn send(&self, frame: VideoFrame) -> Result<(), WebRTCError>;
}
