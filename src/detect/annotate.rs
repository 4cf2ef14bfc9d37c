//! Box drawing on BGR frames

use super::{BoundingBox, Detection};
use crate::media::{PixelFormat, VideoFrame};
use image::{ImageBuffer, Rgb};

const LINE_WIDTH: u32 = 2;
const TAG_HEIGHT: u32 = 6;

/// Per-class outline colour, in BGR order
pub fn class_color(class_id: usize) -> [u8; 3] {
    const PALETTE: [[u8; 3]; 10] = [
        [56, 56, 255],
        [151, 157, 255],
        [31, 112, 255],
        [29, 178, 255],
        [49, 210, 207],
        [10, 249, 72],
        [23, 204, 146],
        [134, 219, 61],
        [211, 188, 0],
        [255, 115, 100],
    ];
    PALETTE[class_id % PALETTE.len()]
}

/// Draw every detection's box onto a copy of `frame`.
///
/// Returns `None` when `frame` is not well-formed BGR.
pub fn draw_detections(frame: &VideoFrame, detections: &[Detection]) -> Option<VideoFrame> {
    if frame.format != PixelFormat::Bgr24 {
        return None;
    }
    // channel order is BGR throughout; Rgb is only the 3-byte container
    let mut canvas: ImageBuffer<Rgb<u8>, Vec<u8>> =
        ImageBuffer::from_raw(frame.width, frame.height, frame.data.to_vec())?;

    for detection in detections {
        let color = Rgb(class_color(detection.class_id));
        let bbox = detection.bbox.clamp(frame.width, frame.height);
        draw_outline(&mut canvas, &bbox, color);
        draw_tag(&mut canvas, &bbox, color, detection.confidence);
    }

    Some(
        VideoFrame::new(frame.width, frame.height, PixelFormat::Bgr24, canvas.into_raw())
            .with_timing_of(frame),
    )
}

fn draw_outline(canvas: &mut ImageBuffer<Rgb<u8>, Vec<u8>>, bbox: &BoundingBox, color: Rgb<u8>) {
    let (w, h) = canvas.dimensions();
    if w == 0 || h == 0 {
        return;
    }
    let x1 = (bbox.x1 as u32).min(w - 1);
    let y1 = (bbox.y1 as u32).min(h - 1);
    let x2 = (bbox.x2 as u32).min(w - 1);
    let y2 = (bbox.y2 as u32).min(h - 1);

    for t in 0..LINE_WIDTH {
        for x in x1..=x2 {
            canvas.put_pixel(x, (y1 + t).min(y2), color);
            canvas.put_pixel(x, y2.saturating_sub(t).max(y1), color);
        }
        for y in y1..=y2 {
            canvas.put_pixel((x1 + t).min(x2), y, color);
            canvas.put_pixel(x2.saturating_sub(t).max(x1), y, color);
        }
    }
}

/// Solid bar above the box, its length proportional to confidence
fn draw_tag(canvas: &mut ImageBuffer<Rgb<u8>, Vec<u8>>, bbox: &BoundingBox, color: Rgb<u8>, confidence: f32) {
    let (w, _) = canvas.dimensions();
    let x1 = bbox.x1 as u32;
    let width = ((bbox.x2 - bbox.x1) * confidence.clamp(0.0, 1.0)) as u32;
    let top = (bbox.y1 as u32).saturating_sub(TAG_HEIGHT);

    for y in top..bbox.y1 as u32 {
        for x in x1..(x1 + width).min(w) {
            canvas.put_pixel(x, y, color);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn black(width: u32, height: u32) -> VideoFrame {
        VideoFrame::new(width, height, PixelFormat::Bgr24, vec![0u8; (width * height * 3) as usize])
            .with_timing(Some(7), Default::default())
    }

    fn pixel(frame: &VideoFrame, x: u32, y: u32) -> [u8; 3] {
        let i = ((y * frame.width + x) * 3) as usize;
        [frame.data[i], frame.data[i + 1], frame.data[i + 2]]
    }

    #[test]
    fn test_draws_outline_only() {
        let frame = black(20, 20);
        let d = Detection::new(0, 0.9, BoundingBox::new(2.0, 8.0, 17.0, 17.0));
        let out = draw_detections(&frame, &[d]).unwrap();

        assert_eq!(out.pts, Some(7));
        assert_eq!(pixel(&out, 2, 10), class_color(0));
        assert_eq!(pixel(&out, 17, 17), class_color(0));
        assert_eq!(pixel(&out, 10, 12), [0, 0, 0]);
        // tag above the box
        assert_eq!(pixel(&out, 3, 5), class_color(0));
    }

    #[test]
    fn test_box_outside_frame_is_clamped() {
        let frame = black(10, 10);
        let d = Detection::new(3, 1.0, BoundingBox::new(-5.0, -5.0, 50.0, 50.0));
        let out = draw_detections(&frame, &[d]).unwrap();
        assert_eq!(pixel(&out, 0, 0), class_color(3));
        assert_eq!(pixel(&out, 9, 9), class_color(3));
    }

    #[test]
    fn test_rejects_wrong_buffer() {
        let frame = VideoFrame::new(4, 4, PixelFormat::Bgr24, vec![0u8; 5]);
        assert!(draw_detections(&frame, &[]).is_none());
    }
}
