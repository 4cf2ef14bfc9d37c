use clap::Parser;
use std::path::PathBuf;

use detection_relay::config;

#[derive(Parser, Debug)]
#[command(name = "detection-relay")]
#[command(author = "Detection Relay Team")]
#[command(version)]
#[command(about = "WebRTC relay with server-side object detection", long_about = None)]
pub struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "configs/local.toml")]
    pub config: PathBuf,

    /// Environment name; loads configs/<ENV> (e.g. local.toml, prod.toml)
    #[arg(short, long)]
    pub env: Option<String>,

    /// Bind address
    #[arg(long)]
    pub host: Option<String>,

    /// Listen port
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Verbose logging
    #[arg(short, long, action)]
    pub verbose: bool,

    /// TLS certificate (PEM)
    #[arg(long, requires = "tls_key")]
    pub tls_cert: Option<PathBuf>,

    /// TLS private key (PEM)
    #[arg(long, requires = "tls_cert")]
    pub tls_key: Option<PathBuf>,

    /// Disable object detection (frames are converted to grayscale)
    #[arg(long, action)]
    pub no_detection: bool,
}

impl Args {
    /// Path of the configuration file to load
    pub fn config_path(&self) -> PathBuf {
        match self.env {
            Some(ref env) => {
                let name = if env.ends_with(".toml") { env.clone() } else { format!("{}.toml", env) };
                PathBuf::from("configs").join(name)
            }
            None => self.config.clone(),
        }
    }

    pub fn load_config(&self) -> Result<config::Config, Box<dyn std::error::Error>> {
        config::Config::load(&self.config_path())
    }

    /// Apply command line overrides on top of the loaded file
    pub fn apply_overrides(&self, config: &mut config::Config) {
        if let Some(ref host) = self.host {
            config.server.host = host.clone();
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if self.verbose {
            config.server.debug = true;
        }
        if self.tls_cert.is_some() {
            config.tls.cert = self.tls_cert.clone();
            config.tls.key = self.tls_key.clone();
        }
        if self.no_detection {
            config.detection.enabled = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_selects_configs_dir() {
        let args = Args::parse_from(["detection-relay", "--env", "prod"]);
        assert_eq!(args.config_path(), PathBuf::from("configs/prod.toml"));
        let args = Args::parse_from(["detection-relay", "--env", "local.toml"]);
        assert_eq!(args.config_path(), PathBuf::from("configs/local.toml"));
    }

    #[test]
    fn overrides_win_over_file() {
        let args = Args::parse_from(["detection-relay", "--port", "9000", "--no-detection"]);
        let mut cfg = config::Config::default();
        cfg.detection.enabled = true;
        args.apply_overrides(&mut cfg);
        assert_eq!(cfg.server.port, 9000);
        assert!(!cfg.detection.enabled);
        assert!(cfg.tls.material().is_none());
    }
}
