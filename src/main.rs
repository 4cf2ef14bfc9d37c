//! detection-relay - Main entry point
//!
//! WebRTC relay that runs object detection on browser video and streams the
//! annotated track and detection metadata back.

mod args;

use args::Args;
use clap::Parser;
use detection_relay::config::Config;
use detection_relay::transport::ClientHub;
use detection_relay::web::{run_http_server, SharedState};
use detection_relay::webrtc::{PeerEngine, RouterSettings, SessionRegistry, SignalingRouter};
use detection_relay::{detect, logging};
use log::{error, info, warn};
use std::sync::Arc;
use tokio::signal;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Parse command line arguments
    let args = Args::parse();

    let mut config = args.load_config()?;
    args.apply_overrides(&mut config);

    logging::init(&config.logging, config.server.debug)?;

    info!("detection-relay v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration loaded from {:?}", args.config_path());

    config.validate()?;

    if !config.server.is_active {
        error!("Server is not active (server.is_active = false), refusing to start");
        std::process::exit(1);
    }

    let processor = detect::build_processor(&config.detection)?;
    info!("Frame processor: {}", processor.name());

    let engine = create_engine(&config)?;
    let registry = Arc::new(SessionRegistry::new(engine));
    let hub = Arc::new(ClientHub::new());
    let router = SignalingRouter::new(
        registry.clone(),
        hub.clone(),
        RouterSettings {
            processor,
            variant: config.detection.variant,
            data_channel_label: config.webrtc.data_channel_label.clone(),
        },
    );

    let state = Arc::new(SharedState::new(Arc::new(config), router, hub));

    // Wait for shutdown signal
    let shutdown = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for ctrl-c: {}", e);
            std::future::pending::<()>().await;
        }
        info!("Initiating graceful shutdown...");
    };

    let result = run_http_server(state, shutdown).await;

    registry.close_all().await;
    info!("Shutdown complete");
    result
}

#[cfg(feature = "webrtc-streaming")]
fn create_engine(config: &Config) -> Result<Arc<dyn PeerEngine>, Box<dyn std::error::Error>> {
    #[cfg(feature = "gstreamer")]
    detection_relay::gstreamer::init()?;

    info!(
        "WebRTC engine: {} outgoing, {} ICE server(s)",
        config.webrtc.video_codec.as_str(),
        config.webrtc.ice_servers.len()
    );
    Ok(Arc::new(detection_relay::webrtc::peer_connection::RtcEngine::new(
        config.webrtc.clone(),
    )))
}

#[cfg(not(feature = "webrtc-streaming"))]
fn create_engine(_config: &Config) -> Result<Arc<dyn PeerEngine>, Box<dyn std::error::Error>> {
    Err(Box::new(detection_relay::webrtc::WebRTCError::FeatureDisabled("webrtc-streaming")))
}
