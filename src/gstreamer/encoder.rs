//! Processed BGR frames to outbound RTP

use super::codec;
use super::GstError;
use crate::config::VideoCodec;
use crate::media::VideoFrame;
use crate::webrtc::engine::VideoOutput;
use crate::webrtc::WebRTCError;
use ::gstreamer as gst;
use async_trait::async_trait;
use bytes::Bytes;
use gst::prelude::*;
use gstreamer_app as gst_app;
use log::{debug, info, warn};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use webrtc::track::track_local::track_local_static_rtp::TrackLocalStaticRTP;
use webrtc::track::track_local::{TrackLocal, TrackLocalWriter};

/// appsrc (BGR) -> videoconvert -> encoder -> payloader -> RTP appsink
pub struct FrameEncodePipeline {
    pipeline: gst::Pipeline,
    appsrc: gst_app::AppSrc,
    width: u32,
    height: u32,
    encoder_element: &'static str,
}

impl FrameEncodePipeline {
    pub fn new(
        codec: VideoCodec,
        width: u32,
        height: u32,
        payload_type: u8,
        packets: mpsc::UnboundedSender<Bytes>,
    ) -> Result<Self, GstError> {
        super::init()?;

        let pipeline = gst::Pipeline::new();

        let caps_str = format!("video/x-raw,format=BGR,width={},height={},framerate=0/1", width, height);
        let caps = caps_str
            .parse::<gst::Caps>()
            .map_err(|e| GstError::PipelineFailed(format!("Invalid caps: {}", e)))?;

        // frames carry their own pts
        let appsrc = gst_app::AppSrc::builder()
            .name("framesrc")
            .caps(&caps)
            .format(gst::Format::Time)
            .is_live(true)
            .do_timestamp(false)
            .build();

        let convert = gst::ElementFactory::make("videoconvert")
            .build()
            .map_err(|e| GstError::PipelineFailed(format!("Failed to create videoconvert: {}", e)))?;
        let (encoder, encoder_element) = codec::create_encoder(codec)?;
        let payloader = codec::create_payloader(codec, payload_type)?;

        let appsink = gst_app::AppSink::builder()
            .name("rtpsink")
            .sync(false)
            .max_buffers(0)
            .drop(false)
            .build();
        appsink.set_callbacks(
            gst_app::AppSinkCallbacks::builder()
                .new_sample(move |sink| {
                    let sample = sink.pull_sample().map_err(|_| gst::FlowError::Eos)?;
                    let buffer = sample.buffer().ok_or(gst::FlowError::Error)?;
                    let map = buffer.map_readable().map_err(|_| gst::FlowError::Error)?;
                    if packets.send(Bytes::copy_from_slice(map.as_slice())).is_err() {
                        return Err(gst::FlowError::Flushing);
                    }
                    Ok(gst::FlowSuccess::Ok)
                })
                .build(),
        );

        pipeline
            .add_many([appsrc.upcast_ref(), &convert, &encoder, &payloader, appsink.upcast_ref()])
            .map_err(|e| GstError::PipelineFailed(format!("Failed to add elements: {}", e)))?;

        appsrc
            .upcast_ref::<gst::Element>()
            .link(&convert)
            .map_err(|e| GstError::LinkFailed(format!("appsrc->convert: {}", e)))?;
        convert
            .link(&encoder)
            .map_err(|e| GstError::LinkFailed(format!("convert->encoder: {}", e)))?;
        encoder
            .link(&payloader)
            .map_err(|e| GstError::LinkFailed(format!("encoder->payloader: {}", e)))?;
        payloader
            .link(appsink.upcast_ref::<gst::Element>())
            .map_err(|e| GstError::LinkFailed(format!("payloader->appsink: {}", e)))?;

        Ok(Self {
            pipeline,
            appsrc,
            width,
            height,
            encoder_element,
        })
    }

    pub fn start(&self) -> Result<(), GstError> {
        info!(
            "Starting encode pipeline {}x{} with encoder: {}",
            self.width, self.height, self.encoder_element
        );
        self.pipeline
            .set_state(gst::State::Playing)
            .map_err(|e| GstError::StateChangeFailed(format!("Failed to start pipeline: {}", e)))?;
        Ok(())
    }

    pub fn stop(&self) -> Result<(), GstError> {
        self.pipeline
            .set_state(gst::State::Null)
            .map_err(|e| GstError::StateChangeFailed(format!("Failed to stop pipeline: {}", e)))?;
        Ok(())
    }

    pub fn accepts(&self, frame: &VideoFrame) -> bool {
        self.width == frame.width && self.height == frame.height
    }

    /// Push a BGR frame, keeping its presentation timestamp
    pub fn push_frame(&self, frame: &VideoFrame) -> Result<(), GstError> {
        let mut buffer = gst::Buffer::from_slice(frame.data.clone());
        if let (Some(pts), Some(buffer_ref)) = (frame.pts, buffer.get_mut()) {
            buffer_ref.set_pts(gst::ClockTime::from_nseconds(pts_to_ns(pts, frame.time_base.num, frame.time_base.den)));
        }
        self.appsrc
            .push_buffer(buffer)
            .map_err(|e| GstError::PipelineFailed(format!("appsrc push failed: {:?}", e)))?;
        Ok(())
    }
}

impl Drop for FrameEncodePipeline {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            debug!("{}", e);
        }
    }
}

fn pts_to_ns(pts: i64, num: u32, den: u32) -> u64 {
    if pts <= 0 || den == 0 {
        return 0;
    }
    (pts as u128 * num as u128 * 1_000_000_000 / den as u128) as u64
}

/// Encodes processed frames onto a local WebRTC track
pub struct TrackVideoOutput {
    codec: VideoCodec,
    payload_type: u8,
    packets: mpsc::UnboundedSender<Bytes>,
    pipeline: Mutex<Option<FrameEncodePipeline>>,
    writer: JoinHandle<()>,
}

impl TrackVideoOutput {
    pub fn new(track: Arc<TrackLocalStaticRTP>, codec: VideoCodec, payload_type: u8) -> Self {
        let (packets, mut rx) = mpsc::unbounded_channel::<Bytes>();
        let writer = tokio::spawn(async move {
            while let Some(packet) = rx.recv().await {
                if let Err(e) = track.write(&packet).await {
                    debug!("Track {} write failed: {}", track.id(), e);
                }
            }
        });
        Self {
            codec,
            payload_type,
            packets,
            pipeline: Mutex::new(None),
            writer,
        }
    }

    fn push(&self, frame: &VideoFrame) -> Result<(), GstError> {
        let mut slot = self.pipeline.lock();
        if !slot.as_ref().is_some_and(|p| p.accepts(frame)) {
            if slot.is_some() {
                warn!("Output size changed to {}x{}, rebuilding encoder", frame.width, frame.height);
            }
            *slot = None;
            let pipeline = FrameEncodePipeline::new(
                self.codec,
                frame.width,
                frame.height,
                self.payload_type,
                self.packets.clone(),
            )?;
            pipeline.start()?;
            *slot = Some(pipeline);
        }
        match slot.as_ref() {
            Some(pipeline) => pipeline.push_frame(frame),
            None => Err(GstError::PipelineFailed("encoder missing".to_string())),
        }
    }
}

#[async_trait]
impl VideoOutput for TrackVideoOutput {
    async fn send(&self, frame: VideoFrame) -> Result<(), WebRTCError> {
        let bgr = frame
            .to_bgr24()
            .ok_or_else(|| WebRTCError::InvalidFrame(format!("cannot encode {}", frame)))?;
        self.push(&bgr)?;
        Ok(())
    }
}

impl Drop for TrackVideoOutput {
    fn drop(&mut self) {
        self.pipeline.lock().take();
        self.writer.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pts_to_ns() {
        assert_eq!(pts_to_ns(90_000, 1, 90_000), 1_000_000_000);
        assert_eq!(pts_to_ns(3000, 1, 90_000), 33_333_333);
        assert_eq!(pts_to_ns(-5, 1, 90_000), 0);
        assert_eq!(pts_to_ns(10, 1, 0), 0);
    }
}
