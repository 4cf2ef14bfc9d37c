//! WebRTC Session Management
//!
//! Manages the lifecycle of per-client sessions:
//! - Session creation, replacement and teardown
//! - Peer connection handle ownership
//! - Relay, metadata channel and frame size bookkeeping

use super::engine::{MetadataChannel, NegotiationState, PeerEngine, PeerHandle};
use super::WebRTCError;
use crate::media::MediaRelay;
use log::{debug, info, warn};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use tokio_util::sync::CancellationToken;

/// A single client session
pub struct Session {
    /// Session key (one per signaling connection)
    pub key: String,
    /// Distinguishes successive sessions installed under the same key
    pub generation: u64,
    /// Peer connection
    pub handle: Arc<dyn PeerHandle>,
    /// Dimensions of the first processed frame
    frame_size: OnceLock<(u32, u32)>,
    /// Remote-opened metadata channel
    metadata_channel: RwLock<Option<Arc<dyn MetadataChannel>>>,
    /// Fan-out of the inbound video track
    relay: Mutex<Option<MediaRelay>>,
    /// Cancelled when the session is released
    cancel: CancellationToken,
}

impl Session {
    fn new(key: String, generation: u64, handle: Arc<dyn PeerHandle>) -> Self {
        Self {
            key,
            generation,
            handle,
            frame_size: OnceLock::new(),
            metadata_channel: RwLock::new(None),
            relay: Mutex::new(None),
            cancel: CancellationToken::new(),
        }
    }

    pub fn negotiation_state(&self) -> NegotiationState {
        self.handle.negotiation_state()
    }

    /// Record frame dimensions; only the first call has an effect
    pub fn record_frame_size(&self, width: u32, height: u32) -> (u32, u32) {
        *self.frame_size.get_or_init(|| {
            debug!("Session {} first frame {}x{}", self.key, width, height);
            (width, height)
        })
    }

    pub fn frame_size(&self) -> Option<(u32, u32)> {
        self.frame_size.get().copied()
    }

    pub fn set_metadata_channel(&self, channel: Arc<dyn MetadataChannel>) {
        info!("Session {} metadata channel '{}' attached", self.key, channel.label());
        *self.metadata_channel.write() = Some(channel);
    }

    pub fn metadata_channel(&self) -> Option<Arc<dyn MetadataChannel>> {
        self.metadata_channel.read().clone()
    }

    /// Install the relay for the inbound video track, replacing any previous one
    pub fn set_relay(&self, relay: MediaRelay) {
        if let Some(previous) = self.relay.lock().replace(relay) {
            previous.stop();
        }
    }

    /// Token cancelled when this session is released
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_released(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Release everything the session owns. Idempotent.
    pub async fn close(&self) -> Result<(), WebRTCError> {
        self.cancel.cancel();
        if let Some(relay) = self.relay.lock().take() {
            relay.stop();
        }
        self.metadata_channel.write().take();
        self.handle.close().await
    }
}

/// Process-wide map from session key to session
pub struct SessionRegistry {
    sessions: Mutex<HashMap<String, Arc<Session>>>,
    engine: Arc<dyn PeerEngine>,
    next_generation: AtomicU64,
}

impl SessionRegistry {
    pub fn new(engine: Arc<dyn PeerEngine>) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            engine,
            next_generation: AtomicU64::new(1),
        }
    }

    /// Create a session for `key`, releasing any previous one first
    pub async fn connect(&self, key: &str) -> Result<Arc<Session>, WebRTCError> {
        let previous = self.sessions.lock().remove(key);
        if let Some(previous) = previous {
            info!("Replacing session {} (generation {})", key, previous.generation);
            release(&previous).await;
        }

        let handle = self.engine.create_handle(key).await?;
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let session = Arc::new(Session::new(key.to_string(), generation, handle));

        let displaced = self.sessions.lock().insert(key.to_string(), session.clone());
        if let Some(displaced) = displaced {
            // another connect for the same key finished while we were creating
            warn!("Session {} generation {} displaced by {}", key, displaced.generation, generation);
            release(&displaced).await;
        }

        info!("Created session {} (generation {})", key, generation);
        Ok(session)
    }

    pub fn lookup(&self, key: &str) -> Option<Arc<Session>> {
        self.sessions.lock().get(key).cloned()
    }

    /// Release and forget the session for `key`; no-op when absent
    pub async fn disconnect(&self, key: &str) {
        let removed = self.sessions.lock().remove(key);
        match removed {
            Some(session) => {
                release(&session).await;
                info!("Session {} disconnected", key);
            }
            None => debug!("Disconnect for unknown session {}", key),
        }
    }

    /// Session to run an offer against.
    ///
    /// Reuses the live session unless its handle is closed, in which case
    /// it is replaced like `connect` would.
    pub async fn ensure_for_offer(&self, key: &str) -> Result<Arc<Session>, WebRTCError> {
        if let Some(session) = self.lookup(key) {
            if !session.negotiation_state().is_closed() {
                return Ok(session);
            }
            let stale = WebRTCError::StaleNegotiation(key.to_string());
            info!("{}, installing a fresh peer connection", stale);
        }
        self.connect(key).await
    }

    /// Remove the session only if it is still the given generation
    pub async fn release_if_current(&self, key: &str, generation: u64) -> bool {
        let removed = {
            let mut sessions = self.sessions.lock();
            match sessions.get(key) {
                Some(session) if session.generation == generation => sessions.remove(key),
                _ => None,
            }
        };
        match removed {
            Some(session) => {
                release(&session).await;
                info!("Session {} (generation {}) torn down", key, generation);
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.lock().is_empty()
    }

    /// Release every session (shutdown)
    pub async fn close_all(&self) {
        let drained: Vec<Arc<Session>> = self.sessions.lock().drain().map(|(_, s)| s).collect();
        for session in drained {
            release(&session).await;
        }
    }
}

async fn release(session: &Session) {
    if let Err(e) = session.close().await {
        warn!("Session {} close failed: {}", session.key, e);
    }
}
