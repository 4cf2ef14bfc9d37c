//! Raw video frame data structure
//!
//! Represents one decoded video frame with its source timing.

use bytes::Bytes;
use std::fmt;

/// Pixel layout of a raw frame buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    Bgr24,
    Rgb24,
    Bgra,
    Rgba,
    Gray8,
}

impl PixelFormat {
    pub fn bytes_per_pixel(&self) -> usize {
        match self {
            PixelFormat::Bgr24 | PixelFormat::Rgb24 => 3,
            PixelFormat::Bgra | PixelFormat::Rgba => 4,
            PixelFormat::Gray8 => 1,
        }
    }
}

/// Rational time base of `pts`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeBase {
    pub num: u32,
    pub den: u32,
}

impl TimeBase {
    /// 90 kHz RTP video clock
    pub const RTP_VIDEO: TimeBase = TimeBase { num: 1, den: 90_000 };
}

impl Default for TimeBase {
    fn default() -> Self {
        TimeBase::RTP_VIDEO
    }
}

/// A decoded video frame
#[derive(Debug, Clone, PartialEq)]
pub struct VideoFrame {
    /// Frame width in pixels
    pub width: u32,

    /// Frame height in pixels
    pub height: u32,

    /// Pixel layout of `data`
    pub format: PixelFormat,

    /// Packed pixel rows, no padding
    pub data: Bytes,

    /// Presentation timestamp in `time_base` units
    pub pts: Option<i64>,

    pub time_base: TimeBase,
}

impl VideoFrame {
    pub fn new(width: u32, height: u32, format: PixelFormat, data: impl Into<Bytes>) -> Self {
        Self {
            width,
            height,
            format,
            data: data.into(),
            pts: None,
            time_base: TimeBase::default(),
        }
    }

    pub fn with_timing(mut self, pts: Option<i64>, time_base: TimeBase) -> Self {
        self.pts = pts;
        self.time_base = time_base;
        self
    }

    /// Copy the timestamp fields of `source` onto this frame
    pub fn with_timing_of(self, source: &VideoFrame) -> Self {
        self.with_timing(source.pts, source.time_base)
    }

    /// Buffer size implied by dimensions and format
    pub fn expected_len(&self) -> usize {
        self.width as usize * self.height as usize * self.format.bytes_per_pixel()
    }

    pub fn is_well_formed(&self) -> bool {
        self.width > 0 && self.height > 0 && self.data.len() == self.expected_len()
    }

    pub fn same_shape(&self, other: &VideoFrame) -> bool {
        self.width == other.width && self.height == other.height && self.format == other.format
    }

    /// Convert to packed BGR, keeping timing.
    ///
    /// Returns `None` for frames whose buffer does not match their shape.
    pub fn to_bgr24(&self) -> Option<VideoFrame> {
        if !self.is_well_formed() {
            return None;
        }
        if self.format == PixelFormat::Bgr24 {
            return Some(self.clone());
        }

        let bpp = self.format.bytes_per_pixel();
        let mut out = Vec::with_capacity(self.width as usize * self.height as usize * 3);
        for px in self.data.chunks_exact(bpp) {
            match self.format {
                PixelFormat::Rgb24 | PixelFormat::Rgba => out.extend_from_slice(&[px[2], px[1], px[0]]),
                PixelFormat::Bgra => out.extend_from_slice(&px[..3]),
                PixelFormat::Gray8 => out.extend_from_slice(&[px[0], px[0], px[0]]),
                PixelFormat::Bgr24 => unreachable!(),
            }
        }

        Some(
            VideoFrame::new(self.width, self.height, PixelFormat::Bgr24, out).with_timing_of(self),
        )
    }
}

impl fmt::Display for VideoFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "VideoFrame({}x{} {:?}, {} bytes, pts={:?})",
            self.width,
            self.height,
            self.format,
            self.data.len(),
            self.pts
        )
    }
}

/// Per-producer frame statistics
#[derive(Debug, Default, Clone)]
pub struct FrameStats {
    /// Frames pulled from the source
    pub total_frames: u64,

    /// Detections reported across all frames
    pub total_detections: u64,

    /// Total processing time in microseconds
    pub total_process_time_us: u64,

    /// Last processing time in microseconds
    pub last_process_time_us: u64,
}

impl FrameStats {
    /// Record one processed frame
    pub fn record(&mut self, detections: usize, time_us: u64) {
        self.total_frames += 1;
        self.total_detections += detections as u64;
        self.last_process_time_us = time_us;
        self.total_process_time_us += time_us;
    }

    pub fn average_process_time_us(&self) -> u64 {
        if self.total_frames == 0 {
            0
        } else {
            self.total_process_time_us / self.total_frames
        }
    }
}
