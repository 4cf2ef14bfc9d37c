//! detection-relay - WebRTC signaling and frame annotation core
//!
//! Negotiates one peer connection per browser session, fans the inbound
//! video track out to a frame processor (object detection), and returns the
//! annotated stream together with out-of-band detection metadata.

pub mod config;
pub mod logging;
pub mod detect;
pub mod media;
pub mod transport;
pub mod web;
pub mod webrtc;
#[cfg(feature = "gstreamer")]
pub mod gstreamer;

// Re-exports
pub use config::{Config, DetectionConfig, PipelineVariant, WebRTCConfig};
pub use detect::{Detection, FrameProcessor};
pub use media::{MediaRelay, VideoFrame};
pub use webrtc::{SessionRegistry, SignalingEvent, SignalingRouter, WebRTCError};
