//! HTTP front door
//!
//! Landing page, status endpoints, static assets and the signaling
//! WebSocket upgrade.

pub mod shared;
pub use shared::SharedState;

pub mod http_server;
pub use http_server::{build_router, run_http_server};
