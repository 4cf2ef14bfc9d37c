//! Connected signaling clients, keyed by session key

use crate::webrtc::signaling::{EventEmitter, OutboundEvent};
use crate::webrtc::WebRTCError;
use log::debug;
use parking_lot::RwLock;
use std::collections::HashMap;
use tokio::sync::mpsc;

/// Outbound text queues of the live WebSocket connections
#[derive(Default)]
pub struct ClientHub {
    clients: RwLock<HashMap<String, mpsc::UnboundedSender<String>>>,
}

impl ClientHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection and return the queue its writer drains
    pub fn register(&self, key: &str) -> mpsc::UnboundedReceiver<String> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.clients.write().insert(key.to_string(), tx);
        debug!("Client {} registered ({} connected)", key, self.len());
        rx
    }

    pub fn unregister(&self, key: &str) {
        self.clients.write().remove(key);
    }

    pub fn len(&self) -> usize {
        self.clients.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn send_text(&self, key: &str, text: String) -> Result<(), WebRTCError> {
        let clients = self.clients.read();
        let sender = clients
            .get(key)
            .ok_or_else(|| WebRTCError::NoActiveSession(key.to_string()))?;
        sender
            .send(text)
            .map_err(|_| WebRTCError::NoActiveSession(key.to_string()))
    }
}

impl EventEmitter for ClientHub {
    fn emit(&self, session_key: &str, event: OutboundEvent) -> Result<(), WebRTCError> {
        let text = event.to_json()?;
        self.send_text(session_key, text)
    }
}
