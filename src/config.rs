use std::env;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::redirect::MAX_REDIRECT_DEPTH;

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Engine tuning, resolved from defaults and `MDICT_HUB_*` environment variables
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub discover_timeout_ms: u64,
    /// Load timeout before accounting for file sizes
    pub load_base_timeout_ms: u64,
    /// Assumed read rate used to stretch the load timeout
    pub load_bytes_per_sec: u64,
    pub load_max_timeout_ms: u64,
    /// Lookup-family operations
    pub query_timeout_ms: u64,
    /// Resource resolution, including transcoding
    pub resource_timeout_ms: u64,
    pub max_redirect_depth: usize,
    /// Program used to transcode Speex audio
    pub transcoder: String,
    pub channel_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            discover_timeout_ms: 10_000,
            load_base_timeout_ms: 30_000,
            load_bytes_per_sec: 50 * 1024 * 1024,
            load_max_timeout_ms: 600_000,
            query_timeout_ms: 5_000,
            resource_timeout_ms: 15_000,
            max_redirect_depth: MAX_REDIRECT_DEPTH,
            transcoder: "ffmpeg".to_string(),
            channel_capacity: 256,
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            discover_timeout_ms: env_or("MDICT_HUB_DISCOVER_TIMEOUT_MS", d.discover_timeout_ms),
            load_base_timeout_ms: env_or("MDICT_HUB_LOAD_BASE_TIMEOUT_MS", d.load_base_timeout_ms),
            load_bytes_per_sec: env_or("MDICT_HUB_LOAD_BYTES_PER_SEC", d.load_bytes_per_sec),
            load_max_timeout_ms: env_or("MDICT_HUB_LOAD_MAX_TIMEOUT_MS", d.load_max_timeout_ms),
            query_timeout_ms: env_or("MDICT_HUB_QUERY_TIMEOUT_MS", d.query_timeout_ms),
            resource_timeout_ms: env_or("MDICT_HUB_RESOURCE_TIMEOUT_MS", d.resource_timeout_ms),
            max_redirect_depth: env_or("MDICT_HUB_MAX_REDIRECT_DEPTH", d.max_redirect_depth),
            transcoder: env::var("MDICT_HUB_TRANSCODER").unwrap_or(d.transcoder),
            channel_capacity: env_or("MDICT_HUB_CHANNEL_CAPACITY", d.channel_capacity).max(1),
        }
    }

    pub fn discover_timeout(&self) -> Duration {
        Duration::from_millis(self.discover_timeout_ms)
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.query_timeout_ms)
    }

    pub fn resource_timeout(&self) -> Duration {
        Duration::from_millis(self.resource_timeout_ms)
    }

    /// Load timeout for `total_bytes` of dictionary files
    pub fn load_timeout(&self, total_bytes: u64) -> Duration {
        let rate = self.load_bytes_per_sec.max(1);
        let extra_ms = total_bytes.saturating_mul(1000) / rate;
        let ms = self
            .load_base_timeout_ms
            .saturating_add(extra_ms)
            .min(self.load_max_timeout_ms.max(self.load_base_timeout_ms));
        Duration::from_millis(ms)
    }
}
