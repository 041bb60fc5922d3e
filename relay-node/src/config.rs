//! Relay configuration (§6.2, §6.4): `<root>/relay/config.json` plus
//! environment overrides, falling back to documented defaults the way
//! `ubl-server::main` reads `DATABASE_URL`/`PORT` with `unwrap_or_else`.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::fsutil;

fn default_heartbeat_interval() -> u64 {
    120
}

fn default_bind_addr() -> String {
    "0.0.0.0:8080".to_string()
}

/// Relay-reported metric overrides, settable in config rather than only
/// measured (useful for tests and for relays that front their own probes).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsOverride {
    #[serde(default)]
    pub latency_ms: Option<f64>,
    #[serde(default)]
    pub reachability: Option<f64>,
    #[serde(default)]
    pub gfw_blocked: Option<bool>,
}

/// Recognized relay config options (§6.4).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayConfig {
    #[serde(default)]
    pub directory_url: Option<String>,
    pub onion: String,
    pub public_url: String,
    #[serde(default)]
    pub public_access_url: Option<String>,
    #[serde(default)]
    pub nickname: Option<String>,
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval: u64,
    #[serde(default)]
    pub metrics: MetricsOverride,
    #[serde(default)]
    pub active_genesis_hash: Option<String>,
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            directory_url: None,
            onion: "relay-local".to_string(),
            public_url: "http://localhost:8080".to_string(),
            public_access_url: None,
            nickname: None,
            heartbeat_interval: default_heartbeat_interval(),
            metrics: MetricsOverride::default(),
            active_genesis_hash: None,
            bind_addr: default_bind_addr(),
        }
    }
}

impl RelayConfig {
    pub fn load_or_default(path: &Path) -> std::io::Result<Self> {
        match fsutil::read_json_opt::<Self>(path)? {
            Some(mut config) => {
                config.apply_public_access_url_alignment();
                Ok(config)
            }
            None => {
                let config = Self::default();
                fsutil::write_json(path, &config)?;
                Ok(config)
            }
        }
    }

    pub fn save(&self, path: &Path) -> std::io::Result<()> {
        fsutil::write_json(path, self)
    }

    /// §4.7: whenever `publicAccessUrl` is set, it wins over `publicUrl`.
    pub fn apply_public_access_url_alignment(&mut self) {
        if let Some(access_url) = &self.public_access_url {
            if !access_url.is_empty() {
                self.public_url = access_url.clone();
            }
        }
    }
}

/// Timer intervals, resolved from env vars with a fallback to config/defaults
/// (§6.4: "a missing/invalid value falls back to its documented default").
#[derive(Debug, Clone, Copy)]
pub struct Intervals {
    pub sync_ms: u64,
    pub report_ms: u64,
}

impl Intervals {
    pub fn resolve(config: &RelayConfig) -> Self {
        let report_ms = env_u64("RELAY_REPORT_INTERVAL_MS")
            .unwrap_or_else(|| config.heartbeat_interval.saturating_mul(1000));
        let sync_ms = env_u64("RELAY_SYNC_INTERVAL_MS").unwrap_or(60_000);
        Self { sync_ms, report_ms }
    }
}

fn env_u64(key: &str) -> Option<u64> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

/// Root data directory for this relay, overridable for tests.
pub fn default_root() -> PathBuf {
    std::env::var("RELAY_DATA_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("./data/relay"))
}
