//! Track fan-out
//!
//! A `MediaRelay` reads its source exactly once and hands every frame to each
//! subscriber through an unbounded per-subscriber queue, so a stalled
//! consumer never holds up the source or its siblings.

use super::{FrameSource, VideoFrame};
use async_trait::async_trait;
use log::{debug, info};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

#[derive(Default)]
struct RelayState {
    subscribers: Vec<mpsc::UnboundedSender<VideoFrame>>,
    ended: bool,
}

/// Fans one frame source out to any number of consumers
pub struct MediaRelay {
    name: String,
    state: Arc<Mutex<RelayState>>,
    pump: JoinHandle<()>,
}

impl MediaRelay {
    /// Start pumping `source`. Must be called from within a tokio runtime.
    pub fn start(name: impl Into<String>, mut source: Box<dyn FrameSource>) -> Self {
        let name = name.into();
        let state = Arc::new(Mutex::new(RelayState::default()));

        let pump_state = state.clone();
        let pump_name = name.clone();
        let pump = tokio::spawn(async move {
            let mut forwarded: u64 = 0;
            while let Some(frame) = source.next_frame().await {
                let mut state = pump_state.lock();
                let before = state.subscribers.len();
                state.subscribers.retain(|tx| tx.send(frame.clone()).is_ok());
                if state.subscribers.len() < before {
                    debug!("Relay {} pruned {} closed consumer(s)", pump_name, before - state.subscribers.len());
                }
                forwarded += 1;
            }

            let mut state = pump_state.lock();
            state.ended = true;
            state.subscribers.clear();
            info!("Relay {} source ended after {} frames", pump_name, forwarded);
        });

        Self { name, state, pump }
    }

    /// New independent consumer. It receives every frame pulled after this call.
    pub fn subscribe(&self) -> RelayConsumer {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.state.lock();
        // An ended relay hands out a consumer that is already finished
        if !state.ended {
            state.subscribers.push(tx);
        }
        RelayConsumer { rx }
    }

    pub fn subscriber_count(&self) -> usize {
        self.state.lock().subscribers.len()
    }

    /// Stop reading the source; all consumers see end-of-stream
    pub fn stop(&self) {
        self.pump.abort();
        let mut state = self.state.lock();
        if !state.ended {
            debug!("Relay {} stopped", self.name);
        }
        state.ended = true;
        state.subscribers.clear();
    }
}

impl Drop for MediaRelay {
    fn drop(&mut self) {
        self.stop();
    }
}

/// One subscription to a [`MediaRelay`]
pub struct RelayConsumer {
    rx: mpsc::UnboundedReceiver<VideoFrame>,
}

impl RelayConsumer {
    pub async fn recv(&mut self) -> Option<VideoFrame> {
        self.rx.recv().await
    }
}

#[async_trait]
impl FrameSource for RelayConsumer {
    async fn next_frame(&mut self) -> Option<VideoFrame> {
        self.recv().await
    }
}
