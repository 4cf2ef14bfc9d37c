//! Transport layer
//!
//! WebSocket signaling connections and the hub that routes outbound events
//! to the connection owning a session key.

pub mod hub;
pub mod signaling_server;

pub use hub::ClientHub;
pub use signaling_server::handle_signaling_connection;
