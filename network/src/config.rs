// SPDX-License-Identifier: MIT OR Apache-2.0

//! Session configuration, optionally persisted as TOML

use anyhow::{Context, Result};
use directories::ProjectDirs;
use lanlink_core::{DISCOVERY_PORT, SESSION_PORT};
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Tunables for a [`crate::Session`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Address the host listens on for session connections
    pub session_bind: SocketAddr,
    /// Port used when a connect target does not name one
    pub session_port: u16,
    /// Address the discovery listener binds
    pub discovery_bind: SocketAddr,
    /// Where the host sends its beacons
    pub beacon_target: SocketAddr,
    /// Delay between two beacons
    #[serde(with = "humantime_serde")]
    pub beacon_interval: Duration,
    /// Upper bound for an outbound connect
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,
    /// Longest line accepted from a peer, in bytes
    pub max_line_len: usize,
    /// Frames that may wait to be written to one peer before it is dropped
    pub outbound_queue: usize,
    /// How long shutdown waits for background tasks
    #[serde(with = "humantime_serde")]
    pub shutdown_timeout: Duration,
    /// Capacity of the session event channel
    pub event_buffer: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            session_bind: SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, SESSION_PORT).into(),
            session_port: SESSION_PORT,
            discovery_bind: SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, DISCOVERY_PORT).into(),
            beacon_target: SocketAddrV4::new(Ipv4Addr::BROADCAST, DISCOVERY_PORT).into(),
            beacon_interval: Duration::from_secs(1),
            connect_timeout: Duration::from_secs(5),
            max_line_len: 64 * 1024,
            outbound_queue: 1024,
            shutdown_timeout: Duration::from_secs(5),
            event_buffer: 100,
        }
    }
}

impl SessionConfig {
    /// Configuration bound to loopback with OS-assigned ports.
    ///
    /// Beacons are aimed at `discovery_port` on loopback, so a listener in
    /// the same process (or test) can pick them up without broadcast.
    pub fn loopback(discovery_port: u16) -> Self {
        let localhost = Ipv4Addr::LOCALHOST;
        Self {
            session_bind: SocketAddrV4::new(localhost, 0).into(),
            discovery_bind: SocketAddrV4::new(localhost, discovery_port).into(),
            beacon_target: SocketAddrV4::new(localhost, discovery_port).into(),
            ..Self::default()
        }
    }
}

/// Default location of the configuration file
pub fn get_config_path() -> Result<PathBuf> {
    let proj_dirs = ProjectDirs::from("io", "lanlink", "lanlink")
        .context("Failed to determine config directory")?;
    Ok(proj_dirs.config_dir().join("config.toml"))
}

/// Load the configuration from the default location, creating it if missing
pub fn load_config() -> Result<SessionConfig> {
    let config_path = get_config_path().context("Failed to determine config path")?;

    if !config_path.exists() {
        tracing::info!("Config file not found, creating default at: {}", config_path.display());
        let default_config = SessionConfig::default();
        save_config_to(&default_config, &config_path)?;
        return Ok(default_config);
    }

    load_config_from(&config_path)
}

/// Load the configuration from an explicit file
pub fn load_config_from(path: &Path) -> Result<SessionConfig> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    toml::from_str::<SessionConfig>(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Write the configuration to an explicit file
pub fn save_config_to(config: &SessionConfig, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).context("Failed to create config directory")?;
    }

    let toml_content = toml::to_string_pretty(config).context("Failed to serialize config")?;

    fs::write(path, toml_content)
        .with_context(|| format!("Failed to write config file: {}", path.display()))?;

    tracing::info!("Saved config to: {}", path.display());
    Ok(())
}
