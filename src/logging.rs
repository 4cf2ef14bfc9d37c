//! Logger setup
//!
//! `env_logger` behind the `log` facade. Filters come from
//! `DETECTION_RELAY_LOG`, falling back to the configured level.

use crate::config::LoggingConfig;
use std::fs::OpenOptions;
use std::io::Write;

/// Environment variable holding an `env_logger` filter string
pub const LOG_ENV: &str = "DETECTION_RELAY_LOG";

/// WebRTC sub-crates that log every ICE/DTLS step at info
const NOISY_MODULES: [&str; 4] = ["webrtc_ice", "webrtc_dtls", "webrtc_mdns", "webrtc_sctp"];

/// Filter string for this run
pub fn filter_spec(config: &LoggingConfig, debug: bool, env_value: Option<String>) -> String {
    match env_value {
        Some(spec) if !spec.trim().is_empty() => spec,
        _ if debug => "debug".to_string(),
        _ => config.level.clone(),
    }
}

/// Install the global logger
pub fn init(config: &LoggingConfig, debug: bool) -> Result<(), Box<dyn std::error::Error>> {
    let spec = filter_spec(config, debug, std::env::var(LOG_ENV).ok());

    let mut builder = env_logger::Builder::new();
    builder.parse_filters(&spec);
    for module in NOISY_MODULES {
        builder.filter_module(module, log::LevelFilter::Error);
    }

    if config.format == "json" {
        builder.format(|buf, record| {
            let line = serde_json::json!({
                "ts": buf.timestamp_millis().to_string(),
                "level": record.level().as_str(),
                "target": record.target(),
                "msg": record.args().to_string(),
            });
            writeln!(buf, "{}", line)
        });
    }

    if let Some(ref path) = config.logfile {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        builder.target(env_logger::Target::Pipe(Box::new(file)));
    }

    builder.try_init()?;
    Ok(())
}
