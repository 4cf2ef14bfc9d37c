use criterion::{criterion_group, criterion_main, Criterion};
use detection_relay::detect::annotate::draw_detections;
use detection_relay::detect::{BoundingBox, Detection, FrameProcessor, Grayscale};
use detection_relay::media::{PixelFormat, VideoFrame};
use detection_relay::webrtc::candidate;
use std::hint::black_box;

fn frame_640x480() -> VideoFrame {
    let width = 640u32;
    let height = 480u32;
    let data: Vec<u8> = (0..width * height * 3).map(|i| (i % 251) as u8).collect();
    VideoFrame::new(width, height, PixelFormat::Bgr24, data)
}

fn bench_candidate_parse(c: &mut Criterion) {
    let line = "candidate:842163049 1 udp 1677729535 203.0.113.7 3478 typ srflx raddr 0.0.0.0 rport 0";
    c.bench_function("candidate_parse", |b| {
        b.iter(|| candidate::parse(black_box(line)).expect("parse candidate"))
    });
}

fn bench_grayscale(c: &mut Criterion) {
    let frame = frame_640x480();
    c.bench_function("grayscale_640x480", |b| {
        b.iter(|| Grayscale.process(black_box(&frame)).expect("grayscale"))
    });
}

fn bench_annotate(c: &mut Criterion) {
    let frame = frame_640x480();
    let detections: Vec<Detection> = (0..10)
        .map(|i| {
            let x = (i * 60) as f32;
            Detection::new(i, 0.5 + i as f32 / 40.0, BoundingBox::new(x, 40.0, x + 50.0, 300.0))
        })
        .collect();

    c.bench_function("draw_10_detections_640x480", |b| {
        b.iter(|| draw_detections(black_box(&frame), black_box(&detections)).expect("draw"))
    });
}

criterion_group!(benches, bench_candidate_parse, bench_grayscale, bench_annotate);
criterion_main!(benches);
