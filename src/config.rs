use std::{env, fs};

use serde::{Deserialize, Serialize};

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub router: RouterConfig,
    #[serde(default)]
    pub log: Log,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RouterConfig {
    /// Input queue depth expressed in seconds of media.
    #[serde(default = "default_input_queue_size_seconds")]
    pub input_queue_size_seconds: u64,
    /// Explicit queue depth in packets. Overrides the seconds-based sizing.
    #[serde(default)]
    pub input_queue_packets: Option<usize>,
    #[serde(default = "default_pull_timeout_ms")]
    pub pull_timeout_ms: u64,
    /// How long a producer blocks on a full queue before the drop policy runs.
    #[serde(default = "default_producer_block_ms")]
    pub producer_block_ms: u64,
    /// Attach publishers directly to provider output when no transcoder is
    /// registered on the application.
    #[serde(default)]
    pub publisher_bypass_transcoder: bool,
}

/// Queue sizing fallback when a track set carries no usable bitrate hint:
/// enough slots for one video and one audio track per second.
const QUEUE_PACKETS_PER_SECOND: usize = 128;

impl RouterConfig {
    pub fn queue_capacity(&self) -> usize {
        self.input_queue_packets
            .unwrap_or(self.input_queue_size_seconds as usize * QUEUE_PACKETS_PER_SECOND)
            .max(1)
    }
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            input_queue_size_seconds: default_input_queue_size_seconds(),
            input_queue_packets: None,
            pull_timeout_ms: default_pull_timeout_ms(),
            producer_block_ms: default_producer_block_ms(),
            publisher_bypass_transcoder: false,
        }
    }
}

fn default_input_queue_size_seconds() -> u64 {
    3
}

fn default_pull_timeout_ms() -> u64 {
    3000
}

fn default_producer_block_ms() -> u64 {
    200
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Log {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for Log {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    env::var("LOG_LEVEL").unwrap_or_else(|_| {
        if cfg!(debug_assertions) {
            "debug".to_string()
        } else {
            "info".to_string()
        }
    })
}

impl Config {
    pub fn parse(path: Option<String>) -> Self {
        let result = fs::read_to_string(path.unwrap_or(String::from("mediaroute.toml")))
            .or(fs::read_to_string("/etc/mediaroute/mediaroute.toml"))
            .unwrap_or("".to_string());
        toml::from_str(result.as_str()).expect("config parse error")
    }
}
