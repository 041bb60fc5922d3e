//! Directory configuration: bind address plus the probe poller's interval
//! and timeout, both overridable by environment (§6.4).

use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_METRICS_INTERVAL_MS: u64 = 180_000;
const DEFAULT_METRICS_TIMEOUT_MS: u64 = 8_000;

#[derive(Debug, Clone, Copy)]
pub struct PollerConfig {
    pub interval: Duration,
    pub timeout: Duration,
}

impl PollerConfig {
    pub fn resolve() -> Self {
        Self {
            interval: Duration::from_millis(
                env_u64("DIRECTORY_METRICS_INTERVAL_MS").unwrap_or(DEFAULT_METRICS_INTERVAL_MS),
            ),
            timeout: Duration::from_millis(
                env_u64("DIRECTORY_METRICS_TIMEOUT_MS").unwrap_or(DEFAULT_METRICS_TIMEOUT_MS),
            ),
        }
    }
}

fn env_u64(key: &str) -> Option<u64> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

pub fn default_root() -> PathBuf {
    std::env::var("DIRECTORY_DATA_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("./data/directory"))
}

pub fn default_bind_addr() -> String {
    std::env::var("DIRECTORY_BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:9090".to_string())
}
