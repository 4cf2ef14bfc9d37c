//! YOLOv8 detector on ONNX Runtime
//!
//! Expects an exported `yolov8*.onnx` with input `images` `[1, 3, S, S]` and
//! output `output0` `[1, 4 + classes, anchors]`.

use super::processor::{ObjectDetector, RawDetection};
use super::{BoundingBox, DetectError};
use crate::media::{PixelFormat, VideoFrame};
use image::imageops::{self, FilterType};
use image::{ImageBuffer, Rgb};
use log::{info, warn};
use ort::execution_providers::{CPUExecutionProvider, CUDAExecutionProvider};
use ort::session::Session;
use ort::value::Tensor;
use parking_lot::Mutex;
use std::path::Path;

const PAD_VALUE: u8 = 114;
/// Candidates below this never reach the threshold stage
const MIN_SCORE: f32 = 0.01;

/// Letterbox geometry used to map model coordinates back to the frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Letterbox {
    pub scale: f32,
    pub pad_x: f32,
    pub pad_y: f32,
}

impl Letterbox {
    pub fn fit(width: u32, height: u32, size: u32) -> Self {
        let scale = (size as f32 / width as f32).min(size as f32 / height as f32);
        let new_w = (width as f32 * scale).round();
        let new_h = (height as f32 * scale).round();
        Self {
            scale,
            pad_x: ((size as f32 - new_w) / 2.0).floor(),
            pad_y: ((size as f32 - new_h) / 2.0).floor(),
        }
    }

    /// Model-space centre box to frame-space corners
    pub fn unmap(&self, cx: f32, cy: f32, w: f32, h: f32) -> BoundingBox {
        let x1 = (cx - w / 2.0 - self.pad_x) / self.scale;
        let y1 = (cy - h / 2.0 - self.pad_y) / self.scale;
        let x2 = (cx + w / 2.0 - self.pad_x) / self.scale;
        let y2 = (cy + h / 2.0 - self.pad_y) / self.scale;
        BoundingBox::new(x1, y1, x2, y2)
    }
}

/// YOLOv8 backend
pub struct YoloDetector {
    session: Mutex<Session>,
    input_size: u32,
}

impl YoloDetector {
    pub fn load(model_path: &str, input_size: u32, use_cuda: bool) -> Result<Self, DetectError> {
        if !Path::new(model_path).exists() {
            return Err(DetectError::ModelLoad(format!("model file not found: {}", model_path)));
        }

        let builder = Session::builder().map_err(|e| DetectError::ModelLoad(e.to_string()))?;
        let builder = if use_cuda {
            info!("Requesting CUDA execution provider");
            builder.with_execution_providers([
                CUDAExecutionProvider::default().build(),
                CPUExecutionProvider::default().build(),
            ])
        } else {
            builder.with_execution_providers([CPUExecutionProvider::default().build()])
        }
        .map_err(|e| DetectError::ModelLoad(e.to_string()))?;

        let session = builder
            .commit_from_file(model_path)
            .map_err(|e| DetectError::ModelLoad(format!("{}: {}", model_path, e)))?;

        Ok(Self { session: Mutex::new(session), input_size })
    }

    /// Letterboxed, normalised RGB planes in CHW order
    fn preprocess(&self, frame: &VideoFrame) -> Result<(Vec<f32>, Letterbox), DetectError> {
        let size = self.input_size;
        let bgr: ImageBuffer<Rgb<u8>, Vec<u8>> = ImageBuffer::from_raw(frame.width, frame.height, frame.data.to_vec())
            .ok_or_else(|| DetectError::UnsupportedFrame(frame.to_string()))?;

        let letterbox = Letterbox::fit(frame.width, frame.height, size);
        let new_w = ((frame.width as f32 * letterbox.scale).round() as u32).clamp(1, size);
        let new_h = ((frame.height as f32 * letterbox.scale).round() as u32).clamp(1, size);
        let resized = imageops::resize(&bgr, new_w, new_h, FilterType::Triangle);

        let mut canvas = ImageBuffer::from_pixel(size, size, Rgb([PAD_VALUE; 3]));
        imageops::overlay(&mut canvas, &resized, letterbox.pad_x as i64, letterbox.pad_y as i64);

        let plane = (size * size) as usize;
        let mut chw = vec![0f32; 3 * plane];
        for (i, px) in canvas.pixels().enumerate() {
            // BGR in, RGB planes out
            chw[i] = px[2] as f32 / 255.0;
            chw[plane + i] = px[1] as f32 / 255.0;
            chw[2 * plane + i] = px[0] as f32 / 255.0;
        }

        Ok((chw, letterbox))
    }
}

/// Decode a `[4 + classes, anchors]` output, best class per anchor
pub fn decode_output(data: &[f32], rows: usize, anchors: usize, letterbox: &Letterbox) -> Vec<RawDetection> {
    let mut out = Vec::new();
    if rows <= 4 || data.len() < rows * anchors {
        return out;
    }

    for a in 0..anchors {
        let at = |row: usize| data[row * anchors + a];
        let (class_id, confidence) = (4..rows)
            .map(|row| (row - 4, at(row)))
            .fold((0, f32::MIN), |best, cur| if cur.1 > best.1 { cur } else { best });

        if confidence < MIN_SCORE {
            continue;
        }

        out.push(RawDetection {
            class_id,
            confidence,
            bbox: letterbox.unmap(at(0), at(1), at(2), at(3)),
        });
    }

    out
}

impl ObjectDetector for YoloDetector {
    fn detect(&self, frame: &VideoFrame) -> Result<Vec<RawDetection>, DetectError> {
        if frame.format != PixelFormat::Bgr24 {
            return Err(DetectError::UnsupportedFrame(frame.to_string()));
        }

        let (input, letterbox) = self.preprocess(frame)?;
        let size = self.input_size as usize;
        let tensor = Tensor::from_array(([1, 3, size, size], input))
            .map_err(|e| DetectError::Inference(e.to_string()))?;

        let mut session = self.session.lock();
        let outputs = session
            .run(ort::inputs!["images" => tensor])
            .map_err(|e| DetectError::Inference(e.to_string()))?;
        let (shape, data) = outputs["output0"]
            .try_extract_tensor::<f32>()
            .map_err(|e| DetectError::Inference(e.to_string()))?;

        if shape.len() != 3 {
            warn!("Unexpected YOLO output rank {}", shape.len());
            return Err(DetectError::Inference(format!("unexpected output shape {:?}", shape)));
        }

        let detections = decode_output(data, shape[1] as usize, shape[2] as usize, &letterbox)
            .into_iter()
            .map(|d| RawDetection { bbox: d.bbox.clamp(frame.width, frame.height), ..d })
            .collect();

        Ok(detections)
    }

    fn name(&self) -> &str {
        "yolov8"
    }
}
