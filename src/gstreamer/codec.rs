//! Codec element selection
//!
//! Picks the best available encoder/decoder element for a codec and builds
//! the matching RTP (de)payloaders.

use super::GstError;
use crate::config::VideoCodec;
use ::gstreamer as gst;
use log::{debug, warn};

/// Element availability information
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementInfo {
    pub name: &'static str,
    pub codec: VideoCodec,
    pub priority: u8, // Higher = preferred
}

const ENCODERS: &[ElementInfo] = &[
    ElementInfo { name: "vaapih264enc", codec: VideoCodec::H264, priority: 90 },
    ElementInfo { name: "nvh264enc", codec: VideoCodec::H264, priority: 95 },
    ElementInfo { name: "x264enc", codec: VideoCodec::H264, priority: 50 },
    ElementInfo { name: "openh264enc", codec: VideoCodec::H264, priority: 40 },
    ElementInfo { name: "vaapivp8enc", codec: VideoCodec::VP8, priority: 90 },
    ElementInfo { name: "vp8enc", codec: VideoCodec::VP8, priority: 50 },
];

const DECODERS: &[ElementInfo] = &[
    ElementInfo { name: "vaapih264dec", codec: VideoCodec::H264, priority: 90 },
    ElementInfo { name: "avdec_h264", codec: VideoCodec::H264, priority: 50 },
    ElementInfo { name: "openh264dec", codec: VideoCodec::H264, priority: 40 },
    ElementInfo { name: "vp8dec", codec: VideoCodec::VP8, priority: 50 },
];

/// Map a WebRTC mime type (`video/VP8`) to a codec
pub fn codec_from_mime(mime: &str) -> Option<VideoCodec> {
    match mime.to_ascii_lowercase().as_str() {
        "video/vp8" => Some(VideoCodec::VP8),
        "video/h264" => Some(VideoCodec::H264),
        _ => None,
    }
}

/// RTP `encoding-name` for a codec
pub fn encoding_name(codec: VideoCodec) -> &'static str {
    match codec {
        VideoCodec::VP8 => "VP8",
        VideoCodec::H264 => "H264",
    }
}

/// Check if a GStreamer element is available
fn element_available(name: &str) -> bool {
    gst::ElementFactory::find(name).is_some()
}

/// Candidates for `codec` from `table`, best first
pub fn candidates(table: &[ElementInfo], codec: VideoCodec) -> Vec<ElementInfo> {
    let mut found: Vec<ElementInfo> = table.iter().filter(|e| e.codec == codec).cloned().collect();
    found.sort_by(|a, b| b.priority.cmp(&a.priority));
    found
}

fn select(table: &[ElementInfo], codec: VideoCodec, role: &str) -> Result<&'static str, GstError> {
    let found = candidates(table, codec);
    match found.iter().find(|e| element_available(e.name)) {
        Some(info) => {
            debug!("Selected {} {} for {:?}", role, info.name, codec);
            Ok(info.name)
        }
        None => {
            warn!("No {} available for {:?}", role, codec);
            Err(GstError::CodecNotFound(format!("{} for {}", role, codec.as_str())))
        }
    }
}

/// Build the encoder element with low-latency settings
pub fn create_encoder(codec: VideoCodec) -> Result<(gst::Element, &'static str), GstError> {
    let name = select(ENCODERS, codec, "encoder")?;
    let mut builder = gst::ElementFactory::make(name).name("encoder");
    builder = match name {
        "x264enc" => builder
            .property_from_str("tune", "zerolatency")
            .property_from_str("speed-preset", "ultrafast")
            .property("key-int-max", 60u32),
        "vp8enc" => builder
            .property("deadline", 1i64) // Realtime
            .property("cpu-used", 8i32)
            .property("keyframe-max-dist", 60i32),
        _ => builder,
    };
    let element = builder
        .build()
        .map_err(|e| GstError::PipelineFailed(format!("Failed to create {}: {}", name, e)))?;
    Ok((element, name))
}

pub fn create_decoder(codec: VideoCodec) -> Result<gst::Element, GstError> {
    let name = select(DECODERS, codec, "decoder")?;
    gst::ElementFactory::make(name)
        .build()
        .map_err(|e| GstError::PipelineFailed(format!("Failed to create {}: {}", name, e)))
}

/// Create RTP payloader for the specified codec
pub fn create_payloader(codec: VideoCodec, pt: u8) -> Result<gst::Element, GstError> {
    let element_name = match codec {
        VideoCodec::H264 => "rtph264pay",
        VideoCodec::VP8 => "rtpvp8pay",
    };

    let mut builder = gst::ElementFactory::make(element_name).property("pt", pt as u32);

    // For H264, ensure SPS/PPS are sent regularly for browser decoders.
    if matches!(codec, VideoCodec::H264) {
        builder = builder.property("config-interval", -1i32);
    }

    builder
        .build()
        .map_err(|e| GstError::PipelineFailed(format!("Failed to create {}: {}", element_name, e)))
}

pub fn create_depayloader(codec: VideoCodec) -> Result<gst::Element, GstError> {
    let element_name = match codec {
        VideoCodec::H264 => "rtph264depay",
        VideoCodec::VP8 => "rtpvp8depay",
    };
    gst::ElementFactory::make(element_name)
        .build()
        .map_err(|e| GstError::PipelineFailed(format!("Failed to create {}: {}", element_name, e)))
}
