//! Node configuration: CLI flags layered over an optional JSON file.
//!
//! Everything here is resolved once before the node starts; there is no
//! runtime reconfiguration.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::cli::Cli;

const DEFAULT_PING_INTERVAL_MS: u64 = 1_000;
const DEFAULT_RESPONSE_TIMEOUT_MS: u64 = 1_000;

/// Fully resolved runtime settings for one node.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Local listen endpoint, `host:port`. The port doubles as the node id.
    pub listen: String,
    /// Configured peer endpoints in order. Entries matching the local
    /// endpoint are dropped when the registry is built.
    pub peers: Vec<String>,
    /// Period between leader health checks.
    pub ping_interval: Duration,
    /// Deadline for the connect and the reply read of one exchange.
    pub response_timeout: Duration,
}

impl Settings {
    /// Resolves settings from the CLI, loading the config file when one is
    /// given. Flags win over file values; defaults fill the rest.
    pub fn resolve(cli: &Cli) -> Result<Self> {
        let file = match &cli.config {
            Some(path) => FileConfig::load(path)?,
            None => FileConfig::default(),
        };

        let listen = cli
            .listen
            .clone()
            .or(file.listen)
            .context("no listen endpoint configured; pass --listen or set it in the config file")?;
        let peers = if cli.peers.is_empty() {
            file.peers
        } else {
            cli.peers.clone()
        };
        let ping_interval_ms = cli
            .ping_interval_ms
            .or(file.ping_interval_ms)
            .unwrap_or(DEFAULT_PING_INTERVAL_MS);
        let response_timeout_ms = cli
            .response_timeout_ms
            .or(file.response_timeout_ms)
            .unwrap_or(DEFAULT_RESPONSE_TIMEOUT_MS);

        Ok(Self {
            listen,
            peers,
            ping_interval: Duration::from_millis(ping_interval_ms),
            response_timeout: Duration::from_millis(response_timeout_ms),
        })
    }
}

/// On-disk configuration, JSON.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub listen: Option<String>,
    #[serde(default)]
    pub peers: Vec<String>,
    pub ping_interval_ms: Option<u64>,
    pub response_timeout_ms: Option<u64>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("invalid config file {}", path.display()))
    }
}
