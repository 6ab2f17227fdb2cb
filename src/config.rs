use anyhow::{Context, Result};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::session::{SlotKind, TypeDurations};

pub const DEFAULT_CONFIG_PATH: &str = "config/talestolen";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub service: ServiceConfig,
    pub session: SessionConfig,
    pub relay: RelayConfig,
    pub sync: SyncConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub name: String,
    pub http: HttpConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: "talestolen".to_string(),
            http: HttpConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub bind: String,
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

impl HttpConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.bind, self.port)
            .parse()
            .with_context(|| format!("Invalid bind address {}:{}", self.bind, self.port))
    }
}

/// Default slot lengths and the display refresh rate
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub opening_secs: u32,
    pub rebuttal_secs: u32,
    pub reply_secs: u32,
    pub tick_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            opening_secs: 180,
            rebuttal_secs: 60,
            reply_secs: 30,
            tick_ms: 250,
        }
    }
}

impl SessionConfig {
    /// Durations for a fresh session, clamped to the allowed range
    pub fn type_durations(&self) -> TypeDurations {
        TypeDurations::default()
            .with(SlotKind::Opening, self.opening_secs)
            .with(SlotKind::Rebuttal, self.rebuttal_secs)
            .with(SlotKind::ReplyToRebuttal, self.reply_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub room_ttl_mins: u64,
    pub gc_interval_secs: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            room_ttl_mins: 24 * 60,
            gc_interval_secs: 600,
        }
    }
}

impl RelayConfig {
    pub fn room_ttl(&self) -> Duration {
        Duration::from_secs(self.room_ttl_mins * 60)
    }

    pub fn gc_interval(&self) -> Duration {
        Duration::from_secs(self.gc_interval_secs.max(1))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Snapshot shared by surfaces on this device
    pub snapshot_path: PathBuf,
    pub peer: PeerConfig,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            snapshot_path: PathBuf::from("data/talestolen_snapshot.json"),
            peer: PeerConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PeerConfig {
    pub ice_servers: Vec<String>,
    pub gather_timeout_ms: u64,
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            ice_servers: vec!["stun:stun.l.google.com:19302".to_string()],
            gather_timeout_ms: 3000,
        }
    }
}

impl PeerConfig {
    pub fn gather_timeout(&self) -> Duration {
        Duration::from_millis(self.gather_timeout_ms)
    }
}

impl Config {
    /// Load `path` (extension optional, file optional) and apply
    /// `TALESTOLEN__SECTION__KEY` environment overrides
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(
                config::Environment::with_prefix("TALESTOLEN")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .with_context(|| format!("Failed to read config {}", path))?;

        settings
            .try_deserialize()
            .context("Invalid configuration")
    }
}
