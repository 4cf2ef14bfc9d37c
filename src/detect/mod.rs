//! Frame processing and object detection
//!
//! Every processor returns the same shape: the rendered frame plus a
//! (possibly empty) list of detections.

pub mod labels;
pub mod grayscale;
pub mod annotate;
pub mod processor;
#[cfg(feature = "onnx")]
pub mod yolo;

pub use grayscale::Grayscale;
pub use processor::{DetectionProcessor, ObjectDetector, RawDetection};

use crate::config::DetectionConfig;
use crate::media::VideoFrame;
use log::{info, warn};
use serde::Serialize;
use std::error::Error;
use std::fmt;
use std::sync::Arc;

/// Axis-aligned box in source-frame pixels
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BoundingBox {
    /// Build a box, ordering the corners so that `x1 <= x2` and `y1 <= y2`
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self {
            x1: x1.min(x2),
            y1: y1.min(y2),
            x2: x1.max(x2),
            y2: y1.max(y2),
        }
    }

    pub fn area(&self) -> f32 {
        (self.x2 - self.x1).max(0.0) * (self.y2 - self.y1).max(0.0)
    }

    /// Intersection over union
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let ix1 = self.x1.max(other.x1);
        let iy1 = self.y1.max(other.y1);
        let ix2 = self.x2.min(other.x2);
        let iy2 = self.y2.min(other.y2);
        let inter = (ix2 - ix1).max(0.0) * (iy2 - iy1).max(0.0);
        let union = self.area() + other.area() - inter;
        if union <= 0.0 {
            0.0
        } else {
            inter / union
        }
    }

    /// Clamp to a `width` x `height` frame
    pub fn clamp(&self, width: u32, height: u32) -> Self {
        let w = width as f32;
        let h = height as f32;
        Self {
            x1: self.x1.clamp(0.0, w),
            y1: self.y1.clamp(0.0, h),
            x2: self.x2.clamp(0.0, w),
            y2: self.y2.clamp(0.0, h),
        }
    }
}

/// One detected object
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Detection {
    pub class_id: usize,
    pub class_name: String,
    pub confidence: f32,
    pub bbox: BoundingBox,
    /// Owning session key, attached before emission
    pub sid: Option<String>,
}

impl Detection {
    pub fn new(class_id: usize, confidence: f32, bbox: BoundingBox) -> Self {
        Self {
            class_id,
            class_name: labels::label(class_id).to_string(),
            confidence: confidence.clamp(0.0, 1.0),
            bbox,
            sid: None,
        }
    }

    pub fn attach_session(&mut self, session_key: &str) {
        self.sid = Some(session_key.to_string());
    }
}

/// Output of a frame processor
#[derive(Debug, Clone)]
pub struct Annotated {
    pub frame: VideoFrame,
    pub detections: Vec<Detection>,
}

impl Annotated {
    pub fn frame_only(frame: VideoFrame) -> Self {
        Self { frame, detections: Vec::new() }
    }
}

/// Turns a BGR frame into a rendered frame plus detections
pub trait FrameProcessor: Send + Sync {
    fn process(&self, frame: &VideoFrame) -> Result<Annotated, DetectError>;

    /// Whether this processor produces detection metadata at all.
    ///
    /// Processors that never detect (grayscale) never cause a
    /// `detections` event.
    fn reports_detections(&self) -> bool {
        true
    }

    fn name(&self) -> &str;
}

/// Detection errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DetectError {
    /// Model file missing or unloadable
    ModelLoad(String),
    /// Inference failed
    Inference(String),
    /// Frame could not be fed to the model
    UnsupportedFrame(String),
    /// Backend not compiled in
    BackendUnavailable(String),
}

impl fmt::Display for DetectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DetectError::ModelLoad(msg) => write!(f, "Model load error: {}", msg),
            DetectError::Inference(msg) => write!(f, "Inference error: {}", msg),
            DetectError::UnsupportedFrame(msg) => write!(f, "Unsupported frame: {}", msg),
            DetectError::BackendUnavailable(msg) => write!(f, "Detector backend unavailable: {}", msg),
        }
    }
}

impl Error for DetectError {}

/// Build the processor selected by configuration
pub fn build_processor(config: &DetectionConfig) -> Result<Arc<dyn FrameProcessor>, DetectError> {
    if !config.enabled {
        info!("Detection disabled, frames are converted to grayscale");
        return Ok(Arc::new(Grayscale));
    }

    build_detector(config)
}

#[cfg(feature = "onnx")]
fn build_detector(config: &DetectionConfig) -> Result<Arc<dyn FrameProcessor>, DetectError> {
    let detector = yolo::YoloDetector::load(&config.model_path, config.input_size, config.use_cuda)?;
    info!(
        "YOLO detector loaded from {} (confidence {}, iou {})",
        config.model_path, config.confidence, config.iou
    );
    Ok(Arc::new(DetectionProcessor::new(detector, config.confidence, config.iou)))
}

#[cfg(not(feature = "onnx"))]
fn build_detector(config: &DetectionConfig) -> Result<Arc<dyn FrameProcessor>, DetectError> {
    warn!("Detection enabled but built without the onnx feature (model {})", config.model_path);
    Err(DetectError::BackendUnavailable(
        "rebuild with --features onnx or set detection.enabled = false".to_string(),
    ))
}
