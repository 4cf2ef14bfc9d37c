//! Signaling event dispatch
//!
//! Every inbound event is routed by name to a handler that receives the
//! session key explicitly and resolves state through the registry. Errors
//! stop at [`SignalingRouter::handle`]; they are logged and never tear down
//! the connection or the process.

use super::candidate;
use super::engine::{ConnectionState, PeerEvent, TrackEvent, TrackKind};
use super::session::{Session, SessionRegistry};
use super::signaling::{CandidatePayload, EventEmitter, OutboundEvent, SdpType, SessionDescription, SignalingEvent};
use super::WebRTCError;
use crate::config::PipelineVariant;
use crate::detect::FrameProcessor;
use crate::media::{FrameProducer, MediaRelay};
use log::{debug, error, info, warn};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Per-process pipeline settings applied to every session
#[derive(Clone)]
pub struct RouterSettings {
    pub processor: Arc<dyn FrameProcessor>,
    pub variant: PipelineVariant,
    /// Label of the data channel that carries detection metadata
    pub data_channel_label: String,
}

/// Dispatches signaling events to the session registry
#[derive(Clone)]
pub struct SignalingRouter {
    registry: Arc<SessionRegistry>,
    emitter: Arc<dyn EventEmitter>,
    settings: Arc<RouterSettings>,
}

impl SignalingRouter {
    pub fn new(registry: Arc<SessionRegistry>, emitter: Arc<dyn EventEmitter>, settings: RouterSettings) -> Self {
        Self {
            registry,
            emitter,
            settings: Arc::new(settings),
        }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Whether frames go through a detector
    pub fn detection_enabled(&self) -> bool {
        self.settings.processor.reports_detections()
    }

    /// Dispatch one event and log any failure
    pub async fn handle(&self, key: &str, event: SignalingEvent) {
        let name = event.name();
        if let Err(e) = self.dispatch(key, event).await {
            if e.is_expected() {
                warn!("Session {} {} dropped: {}", key, name, e);
            } else {
                error!("Session {} {} failed: {}", key, name, e);
            }
        }
    }

    /// Dispatch one event
    pub async fn dispatch(&self, key: &str, event: SignalingEvent) -> Result<(), WebRTCError> {
        match event {
            SignalingEvent::Connect => self.on_connect(key).await,
            SignalingEvent::Disconnect => {
                self.registry.disconnect(key).await;
                Ok(())
            }
            SignalingEvent::Sdp(desc) => self.on_offer(key, desc).await,
            SignalingEvent::IceCandidate(payload) => self.on_ice_candidate(key, payload).await,
        }
    }

    async fn on_connect(&self, key: &str) -> Result<(), WebRTCError> {
        self.registry.connect(key).await?;
        Ok(())
    }

    async fn on_offer(&self, key: &str, desc: SessionDescription) -> Result<(), WebRTCError> {
        if desc.sdp_type != SdpType::Offer {
            return Err(WebRTCError::SdpError(format!(
                "expected an offer, got {}",
                desc.sdp_type.as_str()
            )));
        }

        let session = self.registry.ensure_for_offer(key).await?;
        let generation = session.generation;

        match self.negotiate(&session, desc).await {
            Ok(answer) => {
                info!("Session {} answered (generation {})", key, generation);
                self.emitter.emit(key, OutboundEvent::SdpAnswer(answer))
            }
            Err(e) => {
                self.registry.release_if_current(key, generation).await;
                Err(e)
            }
        }
    }

    /// Remote offer in, local answer installed and returned
    async fn negotiate(&self, session: &Arc<Session>, offer: SessionDescription) -> Result<SessionDescription, WebRTCError> {
        session.handle.set_remote_description(offer).await?;

        // armed before the answer exists; tracks may surface right after
        if let Some(events) = session.handle.take_events() {
            self.spawn_session_events(session.clone(), events);
        }

        let answer = session.handle.create_answer().await?;
        session.handle.set_local_description(answer.clone()).await?;

        Ok(session.handle.local_description().await.unwrap_or(answer))
    }

    async fn on_ice_candidate(&self, key: &str, payload: CandidatePayload) -> Result<(), WebRTCError> {
        let session = self
            .registry
            .lookup(key)
            .ok_or_else(|| WebRTCError::NoActiveSession(key.to_string()))?;

        if payload.candidate.trim().is_empty() {
            debug!("Session {} end of candidates", key);
            return Ok(());
        }

        let candidate = candidate::parse(&payload.candidate)?.with_media(payload.sdp_mid, payload.sdp_mline_index);
        debug!(
            "Session {} candidate {} {}:{} typ {}",
            key, candidate.protocol, candidate.ip, candidate.port, candidate.candidate_type
        );
        session.handle.add_ice_candidate(&candidate).await
    }

    fn spawn_session_events(&self, session: Arc<Session>, mut events: mpsc::UnboundedReceiver<PeerEvent>) {
        let router = self.clone();
        let cancel = session.cancellation();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    event = events.recv() => match event {
                        Some(event) => router.on_peer_event(&session, event).await,
                        None => break,
                    },
                }
            }
            debug!("Session {} event stream closed (generation {})", session.key, session.generation);
        });
    }

    async fn on_peer_event(&self, session: &Arc<Session>, event: PeerEvent) {
        match event {
            PeerEvent::Track(track) => self.on_track(session, track).await,
            PeerEvent::DataChannel(channel) => {
                if channel.label() == self.settings.data_channel_label {
                    session.set_metadata_channel(channel);
                } else {
                    debug!("Session {} ignoring data channel '{}'", session.key, channel.label());
                }
            }
            PeerEvent::ConnectionState(state) => {
                info!("Session {} connection state: {:?}", session.key, state);
                if state == ConnectionState::Failed {
                    self.registry.release_if_current(&session.key, session.generation).await;
                }
            }
        }
    }

    async fn on_track(&self, session: &Arc<Session>, track: TrackEvent) {
        if track.kind != TrackKind::Video {
            debug!("Session {} ignoring {:?} track {}", session.key, track.kind, track.id);
            return;
        }
        let Some(source) = track.source else {
            warn!("Session {} video track {} has no decoder, not processed", session.key, track.id);
            return;
        };

        let relay = MediaRelay::start(format!("{}/{}", session.key, track.id), source);
        let consumer = relay.subscribe();
        session.set_relay(relay);

        let output = match session.handle.add_video_output().await {
            Ok(output) => output,
            Err(e) => {
                error!("Session {} cannot attach outgoing track: {}", session.key, e);
                return;
            }
        };

        info!("Session {} processing video track {}", session.key, track.id);
        let producer = FrameProducer::new(
            session.clone(),
            Box::new(consumer),
            self.settings.processor.clone(),
            self.settings.variant,
            self.emitter.clone(),
        );
        tokio::spawn(producer.run(output, session.cancellation()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::Grayscale;
    use crate::media::{PixelFormat, VideoFrame};
    use crate::webrtc::engine::PeerHandle;
    use crate::webrtc::testing::{FakeChannel, FakeEngine, FakePeer, RecordingEmitter};
    use std::time::Duration;

    struct Harness {
        engine: Arc<FakeEngine>,
        emitter: Arc<RecordingEmitter>,
        router: SignalingRouter,
    }

    fn harness() -> Harness {
        let engine = Arc::new(FakeEngine::default());
        let emitter = Arc::new(RecordingEmitter::default());
        let registry = Arc::new(SessionRegistry::new(engine.clone()));
        let router = SignalingRouter::new(
            registry,
            emitter.clone(),
            RouterSettings {
                processor: Arc::new(Grayscale),
                variant: PipelineVariant::Annotate,
                data_channel_label: "detections".to_string(),
            },
        );
        Harness { engine, emitter, router }
    }

    fn offer() -> SignalingEvent {
        SignalingEvent::Sdp(SessionDescription::offer("v=0..."))
    }

    fn candidate(text: &str) -> SignalingEvent {
        SignalingEvent::IceCandidate(CandidatePayload {
            candidate: text.to_string(),
            sdp_mid: Some("0".to_string()),
            sdp_mline_index: Some(0),
        })
    }

    async fn eventually(mut check: impl FnMut() -> bool) {
        for _ in 0..100 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached");
    }

    fn peer(h: &Harness) -> Arc<FakePeer> {
        h.engine.last_peer()
    }

    #[tokio::test]
    async fn test_connect_offer_candidate_disconnect() {
        let h = harness();
        h.router.dispatch("abc", SignalingEvent::Connect).await.unwrap();
        h.router.dispatch("abc", offer()).await.unwrap();

        let events = h.emitter.events();
        assert_eq!(events.len(), 1);
        let (key, event) = &events[0];
        assert_eq!(key, "abc");
        match event {
            OutboundEvent::SdpAnswer(answer) => assert_eq!(answer.sdp_type, SdpType::Answer),
            other => panic!("expected sdp_answer, got {:?}", other),
        }

        h.router
            .dispatch("abc", candidate("candidate:1 1 udp 2122260223 192.168.1.5 54321 typ host"))
            .await
            .unwrap();
        let installed = peer(&h).candidates();
        assert_eq!(installed.len(), 1);
        let c = &installed[0];
        assert_eq!(c.foundation, "1");
        assert_eq!(c.component, 1);
        assert_eq!(c.protocol, "udp");
        assert_eq!(c.priority, 2122260223);
        assert_eq!(c.ip, "192.168.1.5");
        assert_eq!(c.port, 54321);
        assert_eq!(c.candidate_type, "host");
        assert_eq!(c.sdp_mid.as_deref(), Some("0"));
        assert_eq!(c.sdp_mline_index, Some(0));

        h.router.dispatch("abc", SignalingEvent::Disconnect).await.unwrap();
        let late = h
            .router
            .dispatch("abc", candidate("candidate:2 1 udp 2122260223 192.168.1.5 54322 typ host"))
            .await;
        assert!(matches!(late, Err(WebRTCError::NoActiveSession(_))));
        h.router.handle("abc", candidate("candidate:3 1 udp 1 10.0.0.1 9 typ host")).await;
        assert_eq!(peer(&h).candidates().len(), 1);
        assert!(h.router.registry().is_empty());
    }

    #[tokio::test]
    async fn test_observer_armed_before_answer() {
        let h = harness();
        h.router.dispatch("abc", offer()).await.unwrap();
        assert_eq!(peer(&h).steps(), vec!["set_remote", "observe", "create_answer", "set_local"]);
    }

    #[tokio::test]
    async fn test_offer_without_connect_creates_session() {
        let h = harness();
        h.router.dispatch("xyz", offer()).await.unwrap();
        assert!(h.router.registry().lookup("xyz").is_some());
        assert_eq!(h.engine.ops(), vec!["create:xyz#1"]);
    }

    #[tokio::test]
    async fn test_offer_on_closed_handle_gets_fresh_handle() {
        let h = harness();
        h.router.dispatch("abc", SignalingEvent::Connect).await.unwrap();
        let first = peer(&h);
        first.close().await.unwrap();

        h.router.dispatch("abc", offer()).await.unwrap();
        let second = peer(&h);
        assert_ne!(first.id, second.id);
        assert!(first.steps().is_empty());
        assert_eq!(second.steps()[0], "set_remote");
        assert_eq!(h.engine.ops(), vec!["create:abc#1", "close:abc#1", "close:abc#1", "create:abc#2"]);
    }

    #[tokio::test]
    async fn test_answer_only_goes_to_offering_session() {
        let h = harness();
        h.router.dispatch("a", SignalingEvent::Connect).await.unwrap();
        h.router.dispatch("b", SignalingEvent::Connect).await.unwrap();
        h.router.dispatch("b", offer()).await.unwrap();

        let keys: Vec<String> = h.emitter.events().into_iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["b"]);
    }

    #[tokio::test]
    async fn test_non_offer_is_rejected() {
        let h = harness();
        let answer = SignalingEvent::Sdp(SessionDescription::answer("v=0..."));
        assert!(matches!(h.router.dispatch("abc", answer).await, Err(WebRTCError::SdpError(_))));
        assert!(h.router.registry().is_empty());
        assert!(h.emitter.events().is_empty());
    }

    #[tokio::test]
    async fn test_bad_candidates_do_not_stop_later_ones() {
        let h = harness();
        h.router.dispatch("abc", SignalingEvent::Connect).await.unwrap();

        let bad = h.router.dispatch("abc", candidate("candidate:1 1 udp")).await;
        assert!(matches!(bad, Err(WebRTCError::MalformedCandidate(_))));
        h.router.handle("abc", candidate("candidate:1 x udp 1 10.0.0.1 9 typ host")).await;
        h.router.dispatch("abc", candidate("")).await.unwrap();
        h.router
            .dispatch("abc", candidate("candidate:7 1 tcp 1518280447 10.0.0.2 9 typ host"))
            .await
            .unwrap();

        assert_eq!(peer(&h).candidates().len(), 1);
        assert_eq!(h.router.registry().len(), 1);
    }

    #[tokio::test]
    async fn test_video_track_is_processed_without_detections() {
        let h = harness();
        h.router.dispatch("abc", offer()).await.unwrap();
        let frames = peer(&h).push_track(TrackKind::Video);
        frames
            .send(VideoFrame::new(2, 2, PixelFormat::Bgr24, vec![200u8; 12]).with_timing(Some(3000), Default::default()))
            .unwrap();

        let p = peer(&h);
        eventually(|| p.outputs().first().map(|o| o.frames().len() == 1).unwrap_or(false)).await;
        let out = &p.outputs()[0].frames()[0];
        assert_eq!(out.pts, Some(3000));
        assert_eq!(h.router.registry().lookup("abc").unwrap().frame_size(), Some((2, 2)));
        // sdp_answer only
        assert_eq!(h.emitter.events().len(), 1);
    }

    #[tokio::test]
    async fn test_audio_track_is_ignored() {
        let h = harness();
        h.router.dispatch("abc", offer()).await.unwrap();
        let p = peer(&h);
        let _audio = p.push_track(TrackKind::Audio);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(p.outputs().is_empty());
    }

    #[tokio::test]
    async fn test_matching_data_channel_is_attached() {
        let h = harness();
        h.router.dispatch("abc", offer()).await.unwrap();
        let p = peer(&h);
        p.raise(PeerEvent::DataChannel(Arc::new(FakeChannel::new("chat", true))));
        p.raise(PeerEvent::DataChannel(Arc::new(FakeChannel::new("detections", true))));

        let session = h.router.registry().lookup("abc").unwrap();
        eventually(|| session.metadata_channel().is_some()).await;
        assert_eq!(session.metadata_channel().unwrap().label(), "detections");
    }

    #[tokio::test]
    async fn test_failed_connection_tears_session_down() {
        let h = harness();
        h.router.dispatch("abc", offer()).await.unwrap();
        peer(&h).raise(PeerEvent::ConnectionState(ConnectionState::Failed));

        let router = h.router.clone();
        eventually(|| router.registry().is_empty()).await;
        assert!(peer(&h).negotiation_state().is_closed());
    }

    #[tokio::test]
    async fn test_disconnect_stops_producer() {
        let h = harness();
        h.router.dispatch("abc", offer()).await.unwrap();
        let p = peer(&h);
        let frames = p.push_track(TrackKind::Video);
        frames.send(VideoFrame::new(1, 1, PixelFormat::Bgr24, vec![0u8; 3])).unwrap();
        eventually(|| p.outputs().first().map(|o| o.frames().len() == 1).unwrap_or(false)).await;

        h.router.handle("abc", SignalingEvent::Disconnect).await;
        let _ = frames.send(VideoFrame::new(1, 1, PixelFormat::Bgr24, vec![0u8; 3]));
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(p.outputs()[0].frames().len(), 1);
        assert!(h.router.registry().lookup("abc").is_none());
    }
}
