//! Detection post-processing
//!
//! Wraps a raw detector backend with confidence filtering, class-aware
//! non-maximum suppression, label lookup and box drawing.

use super::annotate::draw_detections;
use super::{Annotated, BoundingBox, DetectError, Detection, FrameProcessor};
use crate::media::{PixelFormat, VideoFrame};
use std::cmp::Ordering;

/// Candidate box straight out of a detector backend
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawDetection {
    pub class_id: usize,
    pub confidence: f32,
    /// In source-frame pixels
    pub bbox: BoundingBox,
}

/// Detector backend
pub trait ObjectDetector: Send + Sync {
    fn detect(&self, frame: &VideoFrame) -> Result<Vec<RawDetection>, DetectError>;

    fn name(&self) -> &str;
}

/// Frame processor backed by an [`ObjectDetector`]
pub struct DetectionProcessor<D> {
    detector: D,
    confidence: f32,
    iou: f32,
}

impl<D: ObjectDetector> DetectionProcessor<D> {
    pub fn new(detector: D, confidence: f32, iou: f32) -> Self {
        Self { detector, confidence, iou }
    }

    /// Filter and suppress raw candidates, highest confidence first
    pub fn select(&self, mut raw: Vec<RawDetection>) -> Vec<Detection> {
        raw.retain(|d| d.confidence >= self.confidence);
        raw.sort_by(|a, b| b.confidence.partial_cmp(&a.confidence).unwrap_or(Ordering::Equal));

        let mut kept: Vec<RawDetection> = Vec::with_capacity(raw.len());
        for candidate in raw {
            let suppressed = kept
                .iter()
                .any(|k| k.class_id == candidate.class_id && k.bbox.iou(&candidate.bbox) > self.iou);
            if !suppressed {
                kept.push(candidate);
            }
        }

        kept.into_iter()
            .map(|d| Detection::new(d.class_id, d.confidence, d.bbox))
            .collect()
    }
}

impl<D: ObjectDetector> FrameProcessor for DetectionProcessor<D> {
    fn process(&self, frame: &VideoFrame) -> Result<Annotated, DetectError> {
        if frame.format != PixelFormat::Bgr24 {
            return Err(DetectError::UnsupportedFrame(frame.to_string()));
        }

        let detections = self.select(self.detector.detect(frame)?);
        let frame = draw_detections(frame, &detections)
            .ok_or_else(|| DetectError::UnsupportedFrame(frame.to_string()))?;

        Ok(Annotated { frame, detections })
    }

    fn name(&self) -> &str {
        self.detector.name()
    }
}
