//! Inbound RTP to raw BGR frames

use super::codec::{self, encoding_name};
use super::GstError;
use crate::config::VideoCodec;
use crate::media::{FrameSource, PixelFormat, TimeBase, VideoFrame};
use ::gstreamer as gst;
use async_trait::async_trait;
use gst::prelude::*;
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;
use log::{debug, info, warn};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use webrtc::track::track_remote::TrackRemote;
use webrtc::util::Marshal;

/// appsrc (RTP) -> depay -> decoder -> videoconvert -> BGR appsink
pub struct RtpDecodePipeline {
    pipeline: gst::Pipeline,
    appsrc: gst_app::AppSrc,
    codec: VideoCodec,
}

impl RtpDecodePipeline {
    pub fn new(
        codec: VideoCodec,
        payload_type: u8,
        clock_rate: u32,
        frames: mpsc::UnboundedSender<VideoFrame>,
    ) -> Result<Self, GstError> {
        super::init()?;

        let pipeline = gst::Pipeline::new();

        let caps_str = format!(
            "application/x-rtp,media=video,clock-rate={},encoding-name={},payload={}",
            clock_rate,
            encoding_name(codec),
            payload_type
        );
        let caps = caps_str
            .parse::<gst::Caps>()
            .map_err(|e| GstError::PipelineFailed(format!("Invalid caps: {}", e)))?;

        let appsrc = gst_app::AppSrc::builder()
            .name("rtpsrc")
            .caps(&caps)
            .format(gst::Format::Time)
            .is_live(true)
            .do_timestamp(true)
            .build();

        let depay = codec::create_depayloader(codec)?;
        let decoder = codec::create_decoder(codec)?;
        let convert = gst::ElementFactory::make("videoconvert")
            .build()
            .map_err(|e| GstError::PipelineFailed(format!("Failed to create videoconvert: {}", e)))?;
        let bgr_caps = "video/x-raw,format=BGR"
            .parse::<gst::Caps>()
            .map_err(|e| GstError::PipelineFailed(format!("Invalid caps: {}", e)))?;
        let filter = gst::ElementFactory::make("capsfilter")
            .property("caps", &bgr_caps)
            .build()
            .map_err(|e| GstError::PipelineFailed(format!("Failed to create capsfilter: {}", e)))?;

        let appsink = gst_app::AppSink::builder().name("framesink").sync(false).build();
        appsink.set_callbacks(
            gst_app::AppSinkCallbacks::builder()
                .new_sample(move |sink| {
                    let sample = sink.pull_sample().map_err(|_| gst::FlowError::Eos)?;
                    let Some(frame) = sample_to_frame(&sample) else {
                        warn!("Dropping undecodable sample");
                        return Ok(gst::FlowSuccess::Ok);
                    };
                    if frames.send(frame).is_err() {
                        return Err(gst::FlowError::Flushing);
                    }
                    Ok(gst::FlowSuccess::Ok)
                })
                .build(),
        );

        let mut chain: Vec<gst::Element> = vec![appsrc.clone().upcast(), depay];
        if codec == VideoCodec::H264 {
            let parse = gst::ElementFactory::make("h264parse")
                .build()
                .map_err(|e| GstError::PipelineFailed(format!("Failed to create h264parse: {}", e)))?;
            chain.push(parse);
        }
        chain.extend([decoder, convert, filter, appsink.upcast()]);

        pipeline
            .add_many(chain.iter())
            .map_err(|e| GstError::PipelineFailed(format!("Failed to add elements: {}", e)))?;
        gst::Element::link_many(chain.iter())
            .map_err(|e| GstError::LinkFailed(format!("decode chain: {}", e)))?;

        Ok(Self { pipeline, appsrc, codec })
    }

    pub fn start(&self) -> Result<(), GstError> {
        info!("Starting {} decode pipeline", self.codec.as_str());
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

    /// Push one marshalled RTP packet
    pub fn push_rtp(&self, packet: &[u8]) -> Result<(), GstError> {
        let buffer = gst::Buffer::from_slice(packet.to_vec());
        self.appsrc
            .push_buffer(buffer)
            .map_err(|e| GstError::PipelineFailed(format!("appsrc push failed: {:?}", e)))?;
        Ok(())
    }
}

impl Drop for RtpDecodePipeline {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            debug!("{}", e);
        }
    }
}

fn sample_to_frame(sample: &gst::Sample) -> Option<VideoFrame> {
    let caps = sample.caps()?;
    let info = gst_video::VideoInfo::from_caps(caps).ok()?;
    let buffer = sample.buffer()?;
    let map = buffer.map_readable().ok()?;

    let width = info.width();
    let height = info.height();
    let stride = *info.stride().first()? as usize;
    let data = pack_rows(map.as_slice(), stride, width as usize * 3, height as usize)?;
    let pts = buffer.pts().map(|t| ns_to_rtp(t.nseconds()));

    Some(VideoFrame::new(width, height, PixelFormat::Bgr24, data).with_timing(pts, TimeBase::RTP_VIDEO))
}

/// Copy `height` rows of `row_bytes` out of a strided plane
fn pack_rows(data: &[u8], stride: usize, row_bytes: usize, height: usize) -> Option<Vec<u8>> {
    if stride < row_bytes || height == 0 {
        return None;
    }
    if stride == row_bytes {
        return data.get(..row_bytes * height).map(<[u8]>::to_vec);
    }
    let mut out = Vec::with_capacity(row_bytes * height);
    for row in 0..height {
        let start = row * stride;
        out.extend_from_slice(data.get(start..start + row_bytes)?);
    }
    Some(out)
}

fn ns_to_rtp(ns: u64) -> i64 {
    (ns as u128 * TimeBase::RTP_VIDEO.den as u128 / 1_000_000_000) as i64
}

/// Decoded frames of one remote WebRTC track
pub struct TrackFrameSource {
    frames: mpsc::UnboundedReceiver<VideoFrame>,
    pipeline: Arc<RtpDecodePipeline>,
    reader: JoinHandle<()>,
}

impl TrackFrameSource {
    /// Start decoding `track`; RTP is read until the track ends
    pub fn start(track: Arc<TrackRemote>) -> Result<Self, GstError> {
        let params = track.codec();
        let mime = params.capability.mime_type.clone();
        let codec = codec::codec_from_mime(&mime).ok_or_else(|| GstError::CodecNotFound(mime.clone()))?;

        let (tx, frames) = mpsc::unbounded_channel();
        let pipeline = Arc::new(RtpDecodePipeline::new(
            codec,
            params.payload_type,
            params.capability.clock_rate,
            tx,
        )?);
        pipeline.start()?;

        let track_id = track.id();
        let decoder = pipeline.clone();
        let reader = tokio::spawn(async move {
            loop {
                let packet = match track.read_rtp().await {
                    Ok((packet, _)) => packet,
                    Err(e) => {
                        debug!("Track {} ended: {}", track_id, e);
                        break;
                    }
                };
                let bytes = match packet.marshal() {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        warn!("Track {} packet not marshalled: {}", track_id, e);
                        continue;
                    }
                };
                if let Err(e) = decoder.push_rtp(&bytes) {
                    debug!("Track {} decoder closed: {}", track_id, e);
                    break;
                }
            }
            if let Err(e) = decoder.stop() {
                warn!("{}", e);
            }
        });

        Ok(Self { frames, pipeline, reader })
    }
}

#[async_trait]
impl FrameSource for TrackFrameSource {
    async fn next_frame(&mut self) -> Option<VideoFrame> {
        self.frames.recv().await
    }
}

impl Drop for TrackFrameSource {
    fn drop(&mut self) {
        self.reader.abort();
        // the aborted reader may still hold a clone until its task is polled
        if let Err(e) = self.pipeline.stop() {
            debug!("{}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pack_rows_strips_padding() {
        // 2x2 BGR, stride 8
        let data = [1, 2, 3, 4, 5, 6, 0, 0, 7, 8, 9, 10, 11, 12, 0, 0];
        assert_eq!(
            pack_rows(&data, 8, 6, 2),
            Some(vec![1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12])
        );
        assert_eq!(pack_rows(&data[..12], 6, 6, 2), Some(data[..12].to_vec()));
        assert_eq!(pack_rows(&data[..10], 8, 6, 2), None);
        assert_eq!(pack_rows(&data, 4, 6, 2), None);
    }

    #[test]
    fn test_ns_to_rtp() {
        assert_eq!(ns_to_rtp(0), 0);
        assert_eq!(ns_to_rtp(1_000_000_000), 90_000);
        assert_eq!(ns_to_rtp(33_333_333), 2_999);
    }

    fn vp8_pipeline() -> Option<(RtpDecodePipeline, mpsc::UnboundedReceiver<VideoFrame>)> {
        let (tx, frames) = mpsc::unbounded_channel();
        match RtpDecodePipeline::new(VideoCodec::VP8, 96, 90_000, tx) {
            Ok(pipeline) => Some((pipeline, frames)),
            Err(e) => {
                eprintln!("skipping, VP8 decode unavailable: {}", e);
                None
            }
        }
    }

    #[test]
    fn test_dropped_decode_pipeline_is_stopped() {
        let Some((decoder, _frames)) = vp8_pipeline() else { return };
        decoder.start().unwrap();
        let pipeline = decoder.pipeline.clone();

        drop(decoder);
        assert_eq!(pipeline.current_state(), gst::State::Null);
    }

    #[tokio::test]
    async fn test_dropped_track_source_stops_pipeline() {
        let Some((decoder, frames)) = vp8_pipeline() else { return };
        decoder.start().unwrap();
        let decoder = Arc::new(decoder);
        let pipeline = decoder.pipeline.clone();

        // reader still holds its clone, as a mid-read track would
        let held = decoder.clone();
        let reader = tokio::spawn(async move {
            std::future::pending::<()>().await;
            drop(held);
        });
        let source = TrackFrameSource { frames, pipeline: decoder, reader };

        drop(source);
        assert_eq!(pipeline.current_state(), gst::State::Null);
    }
}
