//! In-memory engine for tests

use super::engine::{
    MetadataChannel, NegotiationState, PeerEngine, PeerEvent, PeerHandle, TrackEvent, TrackKind, VideoOutput,
};
use super::signaling::{EventEmitter, OutboundEvent, SessionDescription};
use super::{IceCandidate, WebRTCError};
use crate::media::VideoFrame;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Engine that records `create:<id>` / `close:<id>` in call order
#[derive(Default)]
pub struct FakeEngine {
    log: Arc<Mutex<Vec<String>>>,
    peers: Mutex<Vec<Arc<FakePeer>>>,
    counter: AtomicU64,
}

impl FakeEngine {
    pub fn ops(&self) -> Vec<String> {
        self.log.lock().clone()
    }

    pub fn peers(&self) -> Vec<Arc<FakePeer>> {
        self.peers.lock().clone()
    }

    pub fn last_peer(&self) -> Arc<FakePeer> {
        self.peers.lock().last().cloned().expect("no peer created")
    }
}

#[async_trait]
impl PeerEngine for FakeEngine {
    async fn create_handle(&self, session_key: &str) -> Result<Arc<dyn PeerHandle>, WebRTCError> {
        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        let id = format!("{}#{}", session_key, n);
        self.log.lock().push(format!("create:{}", id));
        let peer = Arc::new(FakePeer::with_log(&id, self.log.clone()));
        self.peers.lock().push(peer.clone());
        Ok(peer)
    }
}

/// Peer connection double
pub struct FakePeer {
    pub id: String,
    log: Arc<Mutex<Vec<String>>>,
    steps: Mutex<Vec<String>>,
    state: Mutex<NegotiationState>,
    events_tx: Mutex<Option<mpsc::UnboundedSender<PeerEvent>>>,
    events_rx: Mutex<Option<mpsc::UnboundedReceiver<PeerEvent>>>,
    local: Mutex<Option<SessionDescription>>,
    candidates: Mutex<Vec<IceCandidate>>,
    outputs: Mutex<Vec<Arc<FakeOutput>>>,
}

impl FakePeer {
    pub fn new(id: &str) -> Self {
        Self::with_log(id, Arc::new(Mutex::new(Vec::new())))
    }

    fn with_log(id: &str, log: Arc<Mutex<Vec<String>>>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            id: id.to_string(),
            log,
            steps: Mutex::new(Vec::new()),
            state: Mutex::new(NegotiationState::New),
            events_tx: Mutex::new(Some(tx)),
            events_rx: Mutex::new(Some(rx)),
            local: Mutex::new(None),
            candidates: Mutex::new(Vec::new()),
            outputs: Mutex::new(Vec::new()),
        }
    }

    /// Negotiation calls in order (`set_remote`, `observe`, ...)
    pub fn steps(&self) -> Vec<String> {
        self.steps.lock().clone()
    }

    pub fn candidates(&self) -> Vec<IceCandidate> {
        self.candidates.lock().clone()
    }

    pub fn outputs(&self) -> Vec<Arc<FakeOutput>> {
        self.outputs.lock().clone()
    }

    /// Raise an engine event; false once the peer is closed
    pub fn raise(&self, event: PeerEvent) -> bool {
        match *self.events_tx.lock() {
            Some(ref tx) => tx.send(event).is_ok(),
            None => false,
        }
    }

    /// Surface a remote track and return the sender feeding its frames
    pub fn push_track(&self, kind: TrackKind) -> mpsc::UnboundedSender<VideoFrame> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.raise(PeerEvent::Track(TrackEvent {
            id: format!("{}-{:?}", self.id, kind),
            kind,
            source: Some(Box::new(rx)),
        }));
        tx
    }

    fn step(&self, name: &str) {
        self.steps.lock().push(name.to_string());
    }

    fn ensure_open(&self) -> Result<(), WebRTCError> {
        if self.state.lock().is_closed() {
            return Err(WebRTCError::ConnectionFailed(format!("{} is closed", self.id)));
        }
        Ok(())
    }
}

#[async_trait]
impl PeerHandle for FakePeer {
    fn negotiation_state(&self) -> NegotiationState {
        *self.state.lock()
    }

    async fn set_remote_description(&self, _desc: SessionDescription) -> Result<(), WebRTCError> {
        self.ensure_open()?;
        self.step("set_remote");
        *self.state.lock() = NegotiationState::HaveRemoteOffer;
        Ok(())
    }

    fn take_events(&self) -> Option<mpsc::UnboundedReceiver<PeerEvent>> {
        self.step("observe");
        self.events_rx.lock().take()
    }

    async fn create_answer(&self) -> Result<SessionDescription, WebRTCError> {
        self.ensure_open()?;
        self.step("create_answer");
        Ok(SessionDescription::answer(format!("v=0\r\no=- {} answer", self.id)))
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), WebRTCError> {
        self.ensure_open()?;
        self.step("set_local");
        *self.local.lock() = Some(desc);
        *self.state.lock() = NegotiationState::Stable;
        Ok(())
    }

    async fn local_description(&self) -> Option<SessionDescription> {
        self.local.lock().clone()
    }

    async fn add_ice_candidate(&self, candidate: &IceCandidate) -> Result<(), WebRTCError> {
        self.ensure_open()?;
        self.candidates.lock().push(candidate.clone());
        Ok(())
    }

    async fn add_video_output(&self) -> Result<Arc<dyn VideoOutput>, WebRTCError> {
        let output = Arc::new(FakeOutput::default());
        self.outputs.lock().push(output.clone());
        Ok(output)
    }

    async fn close(&self) -> Result<(), WebRTCError> {
        self.log.lock().push(format!("close:{}", self.id));
        *self.state.lock() = NegotiationState::Closed;
        self.events_tx.lock().take();
        Ok(())
    }
}

/// Outgoing track double
#[derive(Default)]
pub struct FakeOutput {
    frames: Mutex<Vec<VideoFrame>>,
}

impl FakeOutput {
    pub fn frames(&self) -> Vec<VideoFrame> {
        self.frames.lock().clone()
    }
}

#[async_trait]
impl VideoOutput for FakeOutput {
    async fn send(&self, frame: VideoFrame) -> Result<(), WebRTCError> {
        self.frames.lock().push(frame);
        Ok(())
    }
}

/// Data channel double
pub struct FakeChannel {
    label: String,
    open: AtomicBool,
    sent: Mutex<Vec<String>>,
}

impl FakeChannel {
    pub fn new(label: &str, open: bool) -> Self {
        Self {
            label: label.to_string(),
            open: AtomicBool::new(open),
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().clone()
    }
}

#[async_trait]
impl MetadataChannel for FakeChannel {
    fn label(&self) -> String {
        self.label.clone()
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    async fn send_text(&self, text: String) -> Result<(), WebRTCError> {
        self.sent.lock().push(text);
        Ok(())
    }
}

/// Emitter that records every event with its target key
#[derive(Default)]
pub struct RecordingEmitter {
    events: Mutex<Vec<(String, OutboundEvent)>>,
}

impl RecordingEmitter {
    pub fn events(&self) -> Vec<(String, OutboundEvent)> {
        self.events.lock().clone()
    }
}

impl EventEmitter for RecordingEmitter {
    fn emit(&self, session_key: &str, event: OutboundEvent) -> Result<(), WebRTCError> {
        self.events.lock().push((session_key.to_string(), event));
        Ok(())
    }
}
