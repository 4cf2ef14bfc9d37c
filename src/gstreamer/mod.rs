//! GStreamer integration for the media codec bridge
//!
//! Inbound RTP is depayloaded and decoded into BGR frames through an
//! appsrc/appsink pipeline; processed BGR frames are encoded and payloaded
//! back into RTP for the outgoing WebRTC track.

pub mod codec;
pub mod decoder;
pub mod encoder;

pub use decoder::{RtpDecodePipeline, TrackFrameSource};
pub use encoder::{FrameEncodePipeline, TrackVideoOutput};

use crate::webrtc::WebRTCError;
use std::error::Error;
use std::fmt;

/// GStreamer-related errors
#[derive(Debug)]
pub enum GstError {
    /// GStreamer initialization failed
    InitFailed(String),
    /// Pipeline creation failed
    PipelineFailed(String),
    /// No element available for the codec
    CodecNotFound(String),
    /// Element linking failed
    LinkFailed(String),
    /// State change failed
    StateChangeFailed(String),
}

impl fmt::Display for GstError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GstError::InitFailed(msg) => write!(f, "GStreamer init failed: {}", msg),
            GstError::PipelineFailed(msg) => write!(f, "Pipeline creation failed: {}", msg),
            GstError::CodecNotFound(msg) => write!(f, "Codec not found: {}", msg),
            GstError::LinkFailed(msg) => write!(f, "Element linking failed: {}", msg),
            GstError::StateChangeFailed(msg) => write!(f, "State change failed: {}", msg),
        }
    }
}

impl Error for GstError {}

impl From<GstError> for WebRTCError {
    fn from(e: GstError) -> Self {
        WebRTCError::MediaError(e.to_string())
    }
}

/// Initialize GStreamer subsystem
pub fn init() -> Result<(), GstError> {
    ::gstreamer::init().map_err(|e| GstError::InitFailed(e.to_string()))
}
