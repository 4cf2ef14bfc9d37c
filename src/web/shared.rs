//! Shared state for the HTTP front door

use crate::config::Config;
use crate::transport::ClientHub;
use crate::webrtc::SignalingRouter;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Shared state for the application
#[derive(Clone)]
pub struct SharedState {
    /// Configuration
    pub config: Arc<Config>,

    /// Signaling dispatch, shared by every WebSocket connection
    pub router: SignalingRouter,

    /// Live signaling connections
    pub hub: Arc<ClientHub>,

    /// Server start time
    pub start_time: Instant,
}

impl SharedState {
    pub fn new(config: Arc<Config>, router: SignalingRouter, hub: Arc<ClientHub>) -> Self {
        Self {
            config,
            router,
            hub,
            start_time: Instant::now(),
        }
    }

    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Number of live sessions
    pub fn session_count(&self) -> usize {
        self.router.registry().len()
    }

    pub fn connection_count(&self) -> usize {
        self.hub.len()
    }
}
