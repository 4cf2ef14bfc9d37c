//! Per-session frame producer
//!
//! Pulls frames from a relay consumer, runs them through the frame
//! processor, ships detection metadata and yields the outgoing frame with
//! the source frame's timestamps.

use super::{FrameSource, FrameStats, VideoFrame};
use crate::config::PipelineVariant;
use crate::detect::FrameProcessor;
use crate::webrtc::data_channel::MetadataSink;
use crate::webrtc::engine::VideoOutput;
use crate::webrtc::session::Session;
use crate::webrtc::signaling::{DetectionPayload, EventEmitter};
use crate::webrtc::WebRTCError;
use log::{debug, error, info, warn};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

/// Drives one session's processing loop
pub struct FrameProducer {
    session: Arc<Session>,
    source: Box<dyn FrameSource>,
    processor: Arc<dyn FrameProcessor>,
    variant: PipelineVariant,
    sink: MetadataSink,
    stats: FrameStats,
}

impl FrameProducer {
    pub fn new(
        session: Arc<Session>,
        source: Box<dyn FrameSource>,
        processor: Arc<dyn FrameProcessor>,
        variant: PipelineVariant,
        emitter: Arc<dyn EventEmitter>,
    ) -> Self {
        let sink = MetadataSink::new(session.clone(), emitter);
        Self {
            session,
            source,
            processor,
            variant,
            sink,
            stats: FrameStats::default(),
        }
    }

    /// Process the next frame.
    ///
    /// `Ok(None)` when the source has ended. `InvalidFrame` when the
    /// processor gave back nothing usable; the producer must stop then.
    pub async fn recv(&mut self) -> Result<Option<VideoFrame>, WebRTCError> {
        let Some(frame) = self.source.next_frame().await else {
            return Ok(None);
        };
        let key = self.session.key.clone();

        let bgr = frame
            .to_bgr24()
            .ok_or_else(|| WebRTCError::InvalidFrame(format!("session {}: undecodable {}", key, frame)))?;
        let (width, height) = self.session.record_frame_size(bgr.width, bgr.height);

        let started = Instant::now();
        let processor = self.processor.clone();
        let input = bgr.clone();
        let annotated = tokio::task::spawn_blocking(move || processor.process(&input))
            .await
            .map_err(|e| WebRTCError::InvalidFrame(format!("session {}: processor task failed: {}", key, e)))?
            .map_err(|e| WebRTCError::InvalidFrame(format!("session {}: {}", key, e)))?;

        if !annotated.frame.is_well_formed() || !annotated.frame.same_shape(&bgr) {
            return Err(WebRTCError::InvalidFrame(format!(
                "session {}: processor returned {} for {}",
                key, annotated.frame, bgr
            )));
        }

        let elapsed_us = started.elapsed().as_micros() as u64;
        self.stats.record(annotated.detections.len(), elapsed_us);

        let reports = self.processor.reports_detections();
        if reports {
            let payload = DetectionPayload {
                detections: annotated.detections,
                original_width: width,
                original_height: height,
            };
            if let Err(e) = self.sink.deliver(payload).await {
                if e.is_expected() {
                    debug!("Session {} detections dropped: {}", key, e);
                } else {
                    warn!("Session {} detections not delivered: {}", key, e);
                }
            }
        }

        let out = if reports && self.variant == PipelineVariant::MetadataOnly {
            bgr
        } else {
            annotated.frame
        };
        Ok(Some(out.with_timing_of(&frame)))
    }

    /// Feed processed frames to `output` until the source ends, the
    /// session is cancelled or a frame fails.
    pub async fn run(mut self, output: Arc<dyn VideoOutput>, cancel: CancellationToken) -> Result<(), WebRTCError> {
        let key = self.session.key.clone();
        info!("Session {} producer started ({})", key, self.processor.name());

        let result = loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break Ok(()),
                next = self.recv() => match next {
                    Ok(Some(frame)) => {
                        if let Err(e) = output.send(frame).await {
                            break Err(e);
                        }
                    }
                    Ok(None) => break Ok(()),
                    Err(e) => break Err(e),
                },
            }
        };

        match result {
            Ok(()) => info!(
                "Session {} producer stopped after {} frames (avg {} us)",
                key,
                self.stats.total_frames,
                self.stats.average_process_time_us()
            ),
            Err(ref e) => error!("Session {} producer failed: {}", key, e),
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{Annotated, BoundingBox, DetectError, Detection, Grayscale};
    use crate::media::{PixelFormat, TimeBase};
    use crate::webrtc::signaling::OutboundEvent;
    use crate::webrtc::testing::{FakeEngine, FakeOutput, RecordingEmitter};
    use crate::webrtc::SessionRegistry;
    use std::time::Duration;
    use tokio::sync::mpsc;

    /// Inverts pixels and reports one person per frame
    struct Invert;

    impl FrameProcessor for Invert {
        fn process(&self, frame: &VideoFrame) -> Result<Annotated, DetectError> {
            let data: Vec<u8> = frame.data.iter().map(|b| 255 - b).collect();
            Ok(Annotated {
                frame: VideoFrame::new(frame.width, frame.height, frame.format, data),
                detections: vec![Detection::new(0, 0.9, BoundingBox::new(0.0, 0.0, 1.0, 1.0))],
            })
        }

        fn name(&self) -> &str {
            "invert"
        }
    }

    /// Returns a frame of the wrong size
    struct Shrink;

    impl FrameProcessor for Shrink {
        fn process(&self, _frame: &VideoFrame) -> Result<Annotated, DetectError> {
            Ok(Annotated::frame_only(VideoFrame::new(1, 1, PixelFormat::Bgr24, vec![0u8; 3])))
        }

        fn name(&self) -> &str {
            "shrink"
        }
    }

    fn frame(pts: i64, value: u8) -> VideoFrame {
        VideoFrame::new(4, 2, PixelFormat::Bgr24, vec![value; 24]).with_timing(Some(pts), TimeBase::RTP_VIDEO)
    }

    async fn producer(
        processor: Arc<dyn FrameProcessor>,
        variant: PipelineVariant,
    ) -> (FrameProducer, mpsc::UnboundedSender<VideoFrame>, Arc<RecordingEmitter>, Arc<Session>) {
        let registry = SessionRegistry::new(Arc::new(FakeEngine::default()));
        let session = registry.connect("abc").await.unwrap();
        let emitter = Arc::new(RecordingEmitter::default());
        let (tx, rx) = mpsc::unbounded_channel();
        let producer = FrameProducer::new(session.clone(), Box::new(rx), processor, variant, emitter.clone());
        (producer, tx, emitter, session)
    }

    #[tokio::test]
    async fn test_timestamps_pass_through() {
        let (mut producer, tx, _emitter, _session) = producer(Arc::new(Invert), PipelineVariant::Annotate).await;
        let pts = [0i64, 3000, 6000, 9000, 90_000];
        for (i, p) in pts.iter().enumerate() {
            tx.send(frame(*p, i as u8)).unwrap();
        }

        for (i, p) in pts.iter().enumerate() {
            let out = producer.recv().await.unwrap().unwrap();
            assert_eq!(out.pts, Some(*p));
            assert_eq!(out.time_base, TimeBase::RTP_VIDEO);
            assert_eq!(out.data[0], 255 - i as u8);
        }
    }

    #[tokio::test]
    async fn test_detections_carry_session_key_and_first_size() {
        let (mut producer, tx, emitter, session) = producer(Arc::new(Invert), PipelineVariant::Annotate).await;
        tx.send(frame(0, 0)).unwrap();
        tx.send(VideoFrame::new(2, 2, PixelFormat::Bgr24, vec![0u8; 12])).unwrap();
        producer.recv().await.unwrap();
        producer.recv().await.unwrap();

        assert_eq!(session.frame_size(), Some((4, 2)));
        let events = emitter.events();
        assert_eq!(events.len(), 2);
        for (key, event) in events {
            assert_eq!(key, "abc");
            match event {
                OutboundEvent::Detections(p) => {
                    assert_eq!((p.original_width, p.original_height), (4, 2));
                    assert!(p.detections.iter().all(|d| d.sid.as_deref() == Some("abc")));
                }
                other => panic!("unexpected {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn test_metadata_only_forwards_original() {
        let (mut producer, tx, emitter, _session) = producer(Arc::new(Invert), PipelineVariant::MetadataOnly).await;
        tx.send(frame(7, 10)).unwrap();
        let out = producer.recv().await.unwrap().unwrap();
        assert_eq!(out.data[0], 10);
        assert_eq!(out.pts, Some(7));
        assert_eq!(emitter.events().len(), 1);
    }

    #[tokio::test]
    async fn test_grayscale_never_emits_detections() {
        let (mut producer, tx, emitter, _session) = producer(Arc::new(Grayscale), PipelineVariant::MetadataOnly).await;
        for pts in 0..3 {
            tx.send(frame(pts, 100)).unwrap();
        }
        drop(tx);

        let mut count = 0;
        while let Some(out) = producer.recv().await.unwrap() {
            assert_eq!(out.data[0], out.data[1]);
            count += 1;
        }
        assert_eq!(count, 3);
        assert!(emitter.events().is_empty());
    }

    #[tokio::test]
    async fn test_wrong_shape_is_invalid_frame() {
        let (mut producer, tx, _emitter, _session) = producer(Arc::new(Shrink), PipelineVariant::Annotate).await;
        tx.send(frame(0, 0)).unwrap();
        assert!(matches!(producer.recv().await, Err(WebRTCError::InvalidFrame(_))));
    }

    #[tokio::test]
    async fn test_run_stops_on_invalid_frame() {
        let (producer, tx, _emitter, _session) = producer(Arc::new(Shrink), PipelineVariant::Annotate).await;
        let output = Arc::new(FakeOutput::default());
        tx.send(frame(0, 0)).unwrap();
        let result = producer.run(output.clone(), CancellationToken::new()).await;
        assert!(matches!(result, Err(WebRTCError::InvalidFrame(_))));
        assert!(output.frames().is_empty());
    }

    #[tokio::test]
    async fn test_run_ends_promptly_on_cancel() {
        let (producer, tx, _emitter, session) = producer(Arc::new(Invert), PipelineVariant::Annotate).await;
        let output = Arc::new(FakeOutput::default());
        let task = tokio::spawn(producer.run(output.clone(), session.cancellation()));

        tx.send(frame(0, 0)).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        session.close().await.unwrap();

        let result = tokio::time::timeout(Duration::from_secs(1), task).await.expect("producer hung");
        assert!(result.unwrap().is_ok());
        assert_eq!(output.frames().len(), 1);
        // the source is still open, nothing new is processed
        let _ = tx.send(frame(1, 0));
        assert_eq!(output.frames().len(), 1);
    }
}
