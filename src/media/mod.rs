//! Video frame plumbing
//!
//! Frames flow from a remote track through a [`MediaRelay`], which fans them
//! out to independent consumers, into the per-session [`FrameProducer`].

pub mod frame;
pub mod relay;
pub mod pipeline;

pub use frame::{FrameStats, PixelFormat, TimeBase, VideoFrame};
pub use pipeline::FrameProducer;
pub use relay::{MediaRelay, RelayConsumer};

use async_trait::async_trait;

/// Pull-based source of decoded frames
#[async_trait]
pub trait FrameSource: Send {
    /// Next frame, or `None` once the source has ended
    async fn next_frame(&mut self) -> Option<VideoFrame>;
}

#[async_trait]
impl FrameSource for tokio::sync::mpsc::UnboundedReceiver<VideoFrame> {
    async fn next_frame(&mut self) -> Option<VideoFrame> {
        self.recv().await
    }
}

#[async_trait]
impl FrameSource for tokio::sync::mpsc::Receiver<VideoFrame> {
    async fn next_frame(&mut self) -> Option<VideoFrame> {
        self.recv().await
    }
}
