//! Configuration management for detection-relay

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Codec of the outgoing annotated video track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum VideoCodec {
    #[default]
    VP8,
    H264,
}

impl VideoCodec {
    pub fn as_str(&self) -> &'static str {
        match self {
            VideoCodec::VP8 => "vp8",
            VideoCodec::H264 => "h264",
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            VideoCodec::VP8 => "video/VP8",
            VideoCodec::H264 => "video/H264",
        }
    }
}

/// What the outgoing track carries when detection is enabled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PipelineVariant {
    /// Frames with boxes drawn on them
    #[default]
    Annotate,
    /// Original frames; detections travel out-of-band only
    MetadataOnly,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// TLS material
    #[serde(default)]
    pub tls: TlsConfig,

    /// Static assets and templates
    #[serde(default)]
    pub web: WebConfig,

    /// WebRTC configuration
    #[serde(default)]
    pub webrtc: WebRTCConfig,

    /// Detection configuration
    #[serde(default)]
    pub detection: DetectionConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address
    pub host: String,

    /// Listen port
    pub port: u16,

    /// Refuse to start when false
    #[serde(default = "default_true")]
    pub is_active: bool,

    /// Verbose logging
    #[serde(default)]
    pub debug: bool,

    /// Front-end label reported by `/framework`
    #[serde(default = "default_framework")]
    pub framework: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            is_active: true,
            debug: false,
            framework: default_framework(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TlsConfig {
    /// PEM certificate chain
    pub cert: Option<PathBuf>,

    /// PEM private key
    pub key: Option<PathBuf>,
}

impl TlsConfig {
    /// Both halves, when TLS is configured
    pub fn material(&self) -> Option<(PathBuf, PathBuf)> {
        match (&self.cert, &self.key) {
            (Some(cert), Some(key)) => Some((cert.clone(), key.clone())),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebConfig {
    /// Served under `/static`
    pub static_dir: PathBuf,

    /// Holds `index.html`
    pub template_dir: PathBuf,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            static_dir: PathBuf::from("static"),
            template_dir: PathBuf::from("templates"),
        }
    }
}

/// One STUN/TURN server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IceServerConfig {
    pub urls: Vec<String>,

    #[serde(default)]
    pub username: String,

    #[serde(default)]
    pub credential: String,
}

/// WebRTC configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebRTCConfig {
    /// STUN/TURN servers handed to every peer connection
    #[serde(default = "default_ice_servers")]
    pub ice_servers: Vec<IceServerConfig>,

    /// Label of the remote-opened channel used for detection metadata
    #[serde(default = "default_data_channel_label")]
    pub data_channel_label: String,

    /// Outgoing track codec
    #[serde(default)]
    pub video_codec: VideoCodec,
}

impl Default for WebRTCConfig {
    fn default() -> Self {
        Self {
            ice_servers: default_ice_servers(),
            data_channel_label: default_data_channel_label(),
            video_codec: VideoCodec::default(),
        }
    }
}

/// Object detection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionConfig {
    /// Run the detector; when false frames are converted to grayscale.
    /// Defaults to on only in builds with the ONNX backend.
    #[serde(default = "default_detection_enabled")]
    pub enabled: bool,

    #[serde(default)]
    pub variant: PipelineVariant,

    /// ONNX model file
    #[serde(default = "default_model_path")]
    pub model_path: String,

    /// Minimum confidence kept
    #[serde(default = "default_threshold")]
    pub confidence: f32,

    /// NMS IoU threshold
    #[serde(default = "default_threshold")]
    pub iou: f32,

    /// Square model input size
    #[serde(default = "default_input_size")]
    pub input_size: u32,

    #[serde(default)]
    pub use_cuda: bool,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            enabled: default_detection_enabled(),
            variant: PipelineVariant::default(),
            model_path: default_model_path(),
            confidence: default_threshold(),
            iou: default_threshold(),
            input_size: default_input_size(),
            use_cuda: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    pub level: String,

    /// Log file path
    pub logfile: Option<PathBuf>,

    /// Log format ("text" or "json")
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            logfile: None,
            format: "text".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from TOML file
    pub fn load(path: &PathBuf) -> Result<Self, Box<dyn std::error::Error>> {
        if !path.exists() {
            return Ok(Config::default());
        }

        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), Box<dyn std::error::Error>> {
        if self.server.host.trim().is_empty() {
            return Err("Server host must not be empty".into());
        }

        if self.server.port == 0 {
            return Err("Server port must be non-zero".into());
        }

        if self.tls.cert.is_some() != self.tls.key.is_some() {
            return Err("TLS requires both cert and key".into());
        }

        if self.webrtc.ice_servers.is_empty() || self.webrtc.ice_servers.iter().any(|s| s.urls.is_empty()) {
            return Err("WebRTC needs at least one ICE server with a URL".into());
        }

        if self.webrtc.data_channel_label.is_empty() {
            return Err("WebRTC data_channel_label must not be empty".into());
        }

        // Detection validation
        if self.detection.enabled {
            if !(0.0..=1.0).contains(&self.detection.confidence) {
                return Err("Detection confidence must be within [0, 1]".into());
            }
            if !(0.0..=1.0).contains(&self.detection.iou) {
                return Err("Detection iou must be within [0, 1]".into());
            }
            if self.detection.input_size == 0 {
                return Err("Detection input size must be non-zero".into());
            }
        }

        if !matches!(self.logging.format.as_str(), "text" | "json") {
            return Err("Logging format must be \"text\" or \"json\"".into());
        }

        Ok(())
    }
}

fn default_true() -> bool {
    true
}

fn default_detection_enabled() -> bool {
    cfg!(feature = "onnx")
}

fn default_framework() -> String {
    "axum".to_string()
}

fn default_ice_servers() -> Vec<IceServerConfig> {
    vec![IceServerConfig {
        urls: vec!["stun:stun.l.google.com:19302".to_string()],
        username: String::new(),
        credential: String::new(),
    }]
}

fn default_data_channel_label() -> String {
    "detections".to_string()
}

fn default_model_path() -> String {
    "models/yolov8n.onnx".to_string()
}

fn default_threshold() -> f32 { 0.45 }
fn default_input_size() -> u32 { 640 }

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let cfg = Config::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.webrtc.ice_servers[0].urls[0], "stun:stun.l.google.com:19302");
        assert_eq!(cfg.detection.confidence, 0.45);
    }

    #[test]
    fn validate_rejects_half_tls() {
        let mut cfg = Config::default();
        cfg.tls.cert = Some(PathBuf::from("cert.pem"));
        assert!(cfg.validate().is_err());
        cfg.tls.key = Some(PathBuf::from("key.pem"));
        assert!(cfg.validate().is_ok());
        assert!(cfg.tls.material().is_some());
    }

    #[test]
    fn validate_rejects_out_of_range_thresholds() {
        let mut cfg = Config::default();
        cfg.detection.enabled = true;
        cfg.detection.confidence = 1.5;
        assert!(cfg.validate().is_err());

        // ignored while detection is off
        cfg.detection.enabled = false;
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn validate_rejects_empty_ice_servers() {
        let mut cfg = Config::default();
        cfg.webrtc.ice_servers.clear();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn parse_partial_toml() {
        let cfg: Config = toml::from_str(
            r#"
            [server]
            host = "127.0.0.1"
            port = 5000
            is_active = false

            [detection]
            enabled = true
            variant = "metadata_only"
            use_cuda = true
            "#,
        )
        .unwrap();
        assert_eq!(cfg.server.port, 5000);
        assert!(!cfg.server.is_active);
        assert_eq!(cfg.server.framework, "axum");
        assert_eq!(cfg.detection.variant, PipelineVariant::MetadataOnly);
        assert_eq!(cfg.detection.iou, 0.45);
        assert_eq!(cfg.webrtc.video_codec, VideoCodec::VP8);
        assert_eq!(cfg.logging.level, "info");
    }
}
