//! Agent configuration
//!
//! Handles:
//! - TOML config file in the OS config directory (defaults when absent)
//! - Peer list parsing (`host[:port]`, port defaults to the listen port)
//! - Validation before the sender and receiver are built

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// UDP port to listen on, and default port for peers
    pub port: u16,
    /// Peers as `host[:port]`
    pub peers: Vec<String>,
    pub interval_secs: u16,
    /// Accept load messages from peers
    pub listen: bool,
    /// Sample this host and send to peers
    pub monitor: bool,
    pub write_logs: bool,
    pub log_dir: PathBuf,
    /// Date-stamped log names, switched at UTC midnight
    pub rotate: bool,
    pub verbose: u8,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            port: 9999,
            peers: Vec::new(),
            interval_secs: 10,
            listen: false,
            monitor: true,
            write_logs: false,
            log_dir: PathBuf::from("."),
            rotate: true,
            verbose: 1,
        }
    }
}

impl AgentConfig {
    /// Load config from `path`, or from the OS-specific location
    pub async fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = match path {
            Some(path) => path.to_path_buf(),
            None => match Self::config_file_path() {
                Ok(path) => path,
                Err(_) => return Ok(Self::default()),
            },
        };

        if config_path.exists() {
            let content = tokio::fs::read_to_string(&config_path)
                .await
                .with_context(|| format!("Failed to read {}", config_path.display()))?;
            debug!("Loaded config from {}", config_path.display());
            Self::from_toml(&content)
                .with_context(|| format!("Invalid config file {}", config_path.display()))
        } else if path.is_some() {
            bail!("Config file {} not found", config_path.display())
        } else {
            Ok(Self::default())
        }
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Get OS-specific config file path
    pub fn config_file_path() -> Result<PathBuf> {
        let mut path = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;

        path.push("loadwatch");
        path.push("config.toml");
        Ok(path)
    }

    pub fn validate(&self) -> Result<()> {
        if self.interval_secs == 0 {
            bail!("interval must be at least 1 second");
        }
        if self.listen && self.peers.is_empty() {
            bail!("listening requires at least one peer to accept traffic from");
        }
        Ok(())
    }

    /// Resolve every peer; any failure is fatal at startup
    pub async fn resolve_peers(&self) -> Result<Vec<SocketAddr>> {
        let mut resolved = Vec::with_capacity(self.peers.len());
        for peer in &self.peers {
            let target = peer_target(peer, self.port);
            let addr = tokio::net::lookup_host(&target)
                .await
                .with_context(|| format!("Invalid peer address: {}", peer))?
                .next()
                .with_context(|| format!("Peer {} resolved to no address", peer))?;
            debug!("Peer {} -> {}", peer, addr);
            resolved.push(addr);
        }
        Ok(resolved)
    }
}

/// Append the default port to a peer address that lacks one
pub fn peer_target(peer: &str, default_port: u16) -> String {
    let peer = peer.trim();
    if let Ok(ip) = peer.parse::<IpAddr>() {
        return SocketAddr::new(ip, default_port).to_string();
    }
    if peer.contains(':') {
        peer.to_string()
    } else {
        format!("{}:{}", peer, default_port)
    }
}
