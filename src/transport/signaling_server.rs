//! WebSocket signaling endpoint
//!
//! Each connection gets a fresh session key. Text frames carry
//! `{"event": ..., "data": ...}` objects that are handed to the router one
//! at a time, so events of a connection are applied in arrival order.

use super::hub::ClientHub;
use crate::webrtc::{SignalingEvent, SignalingRouter};
use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use std::sync::Arc;

/// Handle a WebRTC signaling WebSocket connection
pub async fn handle_signaling_connection(socket: WebSocket, router: SignalingRouter, hub: Arc<ClientHub>) {
    let key = uuid::Uuid::new_v4().to_string();
    info!("New signaling connection {}", key);
    let (mut ws_sender, mut ws_receiver) = socket.split();

    let mut rx = hub.register(&key);

    // Spawn task to forward messages to WebSocket
    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if ws_sender.send(Message::Text(msg.into())).await.is_err() {
                break;
            }
        }
    });

    router.handle(&key, SignalingEvent::Connect).await;

    while let Some(result) = ws_receiver.next().await {
        match result {
            Ok(Message::Text(text)) => handle_text(&router, &key, text.as_ref()).await,
            Ok(Message::Binary(_)) => {
                debug!("Received binary message on signaling channel");
            }
            Ok(Message::Close(_)) => {
                info!("Signaling connection {} closed", key);
                break;
            }
            Err(e) => {
                error!("WebSocket error: {}", e);
                break;
            }
            _ => {}
        }
    }

    router.handle(&key, SignalingEvent::Disconnect).await;
    hub.unregister(&key);
    send_task.abort();

    info!("Signaling connection handler finished (session: {})", key);
}

/// Parse one text frame and dispatch it
pub async fn handle_text(router: &SignalingRouter, key: &str, text: &str) {
    match SignalingEvent::from_json(text) {
        Ok(event) => router.handle(key, event).await,
        Err(e) => warn!("Session {}: {}", key, e),
    }
}
