//! Grayscale processor used when detection is disabled

use super::{Annotated, DetectError, FrameProcessor};
use crate::media::{PixelFormat, VideoFrame};

/// Converts BGR frames to gray and back to three channels
pub struct Grayscale;

impl FrameProcessor for Grayscale {
    fn process(&self, frame: &VideoFrame) -> Result<Annotated, DetectError> {
        if frame.format != PixelFormat::Bgr24 || !frame.is_well_formed() {
            return Err(DetectError::UnsupportedFrame(frame.to_string()));
        }

        let mut out = Vec::with_capacity(frame.data.len());
        for px in frame.data.chunks_exact(3) {
            // BT.601 luma
            let y = 0.114 * px[0] as f32 + 0.587 * px[1] as f32 + 0.299 * px[2] as f32;
            let y = y.round().clamp(0.0, 255.0) as u8;
            out.extend_from_slice(&[y, y, y]);
        }

        Ok(Annotated::frame_only(
            VideoFrame::new(frame.width, frame.height, PixelFormat::Bgr24, out).with_timing_of(frame),
        ))
    }

    fn reports_detections(&self) -> bool {
        false
    }

    fn name(&self) -> &str {
        "grayscale"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::TimeBase;

    #[test]
    fn test_grayscale_keeps_shape_and_timing() {
        let frame = VideoFrame::new(2, 1, PixelFormat::Bgr24, vec![255u8, 0, 0, 0, 0, 255])
            .with_timing(Some(42), TimeBase::RTP_VIDEO);
        let out = Grayscale.process(&frame).unwrap();
        assert!(out.detections.is_empty());
        assert!(out.frame.same_shape(&frame));
        assert_eq!(out.frame.pts, Some(42));
        // pure blue and pure red
        assert_eq!(&out.frame.data[..], &[29, 29, 29, 76, 76, 76]);
    }

    #[test]
    fn test_grayscale_rejects_non_bgr() {
        let frame = VideoFrame::new(1, 1, PixelFormat::Rgba, vec![0u8; 4]);
        assert!(Grayscale.process(&frame).is_err());
    }
}
