//! Detection metadata delivery
//!
//! Detections for a session go out through the session's data channel when
//! the remote peer opened one, otherwise as a `detections` signaling event
//! addressed to the session key. A data channel that is not open drops the
//! message; nothing is queued.

use super::session::Session;
use super::signaling::{DetectionPayload, EventEmitter, OutboundEvent};
use super::WebRTCError;
use log::debug;
use std::sync::Arc;

/// Per-session metadata sink
pub struct MetadataSink {
    session: Arc<Session>,
    emitter: Arc<dyn EventEmitter>,
}

impl MetadataSink {
    pub fn new(session: Arc<Session>, emitter: Arc<dyn EventEmitter>) -> Self {
        Self { session, emitter }
    }

    /// Stamp every detection with the session key and deliver the payload
    pub async fn deliver(&self, mut payload: DetectionPayload) -> Result<(), WebRTCError> {
        let key = self.session.key.as_str();
        for detection in payload.detections.iter_mut() {
            detection.attach_session(key);
        }
        let event = OutboundEvent::Detections(payload);

        match self.session.metadata_channel() {
            Some(channel) => {
                if !channel.is_open() {
                    return Err(WebRTCError::ChannelNotReady(format!(
                        "session {} channel '{}'",
                        key,
                        channel.label()
                    )));
                }
                channel.send_text(event.to_json()?).await?;
                debug!("Session {} detections sent on data channel", key);
                Ok(())
            }
            None => self.emitter.emit(key, event),
        }
    }
}
