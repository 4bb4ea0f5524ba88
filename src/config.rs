//! Bridge configuration.
//!
//! Loaded from an optional TOML file plus `BRIDGE_*` environment overrides
//! (e.g. `BRIDGE_HTTP_PORT=8081`, `BRIDGE_RECONNECT__MAX_RETRIES=5`).
//! Defaults match the deployment this bridge replaces: port 3000, credential
//! vault under `./sessions`, collaborators on localhost:8080.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Port the HTTP facade listens on.
    pub http_port: u16,
    pub bind_addr: String,
    /// Root directory of the per-merchant credential vault.
    pub session_dir: PathBuf,
    /// Base URL of the session-persistence service.
    pub db_service_url: String,
    /// Base URL of the AI response service.
    pub ai_service_url: String,
    /// Country code prefix applied to local phone numbers on /whatsapp/send.
    pub default_country_code: String,
    /// Transport adapter to wire in ("memory" is the in-process loopback).
    pub transport: String,
    pub reconnect: ReconnectPolicy,
    /// Conversation-context lifetime in seconds; 0 disables eviction.
    pub context_ttl_secs: u64,
}

/// Backoff policy for automatic reconnection after a non-logout close.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReconnectPolicy {
    /// Retry ceiling per merchant; the counter resets once a connection opens.
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            http_port: 3000,
            bind_addr: "0.0.0.0".to_string(),
            session_dir: PathBuf::from("./sessions"),
            db_service_url: "http://localhost:8080".to_string(),
            ai_service_url: "http://localhost:8080".to_string(),
            default_country_code: "212".to_string(),
            transport: "memory".to_string(),
            reconnect: ReconnectPolicy::default(),
            context_ttl_secs: 86_400,
        }
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_retries: 10,
            base_delay_ms: 500,
            max_delay_ms: 30_000,
        }
    }
}

impl BridgeConfig {
    /// Load configuration from `path` (missing file is fine, defaults apply)
    /// merged with `BRIDGE_*` environment variables.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let cfg = config::Config::builder()
            .add_source(config::File::from(path).required(false))
            .add_source(config::Environment::with_prefix("BRIDGE").separator("__"))
            .build()?;
        Ok(cfg.try_deserialize()?)
    }

    /// Context TTL as a duration; `None` means entries never expire.
    pub fn context_ttl(&self) -> Option<Duration> {
        if self.context_ttl_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(self.context_ttl_secs))
        }
    }
}
