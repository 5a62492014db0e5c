// Configuration management for the meshroute node
//
// Stored as JSON in the platform config directory:
// - macOS: ~/Library/Application Support/meshroute/config.json
// - Linux: ~/.config/meshroute/config.json
// - Windows: %APPDATA%\meshroute\config.json

use anyhow::{Context, Result};
use meshroute_core::{InterfaceAddress, ProtocolConfig};
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Routing engine settings
    pub protocol: ProtocolConfig,

    /// Interfaces the node routes on
    pub interfaces: Vec<InterfaceConfig>,

    /// Seconds between routing table dumps (0 = never)
    pub dump_interval_secs: u64,

    /// Log filter used when RUST_LOG is unset
    pub log_filter: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceConfig {
    pub index: u32,
    pub address: Ipv4Addr,
    pub prefix_len: u8,
}

impl From<InterfaceConfig> for InterfaceAddress {
    fn from(config: InterfaceConfig) -> Self {
        InterfaceAddress::new(config.index, config.address, config.prefix_len)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            protocol: ProtocolConfig::default(),
            interfaces: Vec::new(),
            dump_interval_secs: 10,
            log_filter: "info".to_string(),
        }
    }
}

impl Config {
    /// Get the config directory path (cross-platform)
    pub fn config_dir() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Failed to determine config directory")?
            .join("meshroute");

        std::fs::create_dir_all(&config_dir).context("Failed to create config directory")?;

        Ok(config_dir)
    }

    pub fn default_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.json"))
    }

    /// Load config from `path`, falling back to defaults when the file is missing
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Config::default());
        }
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: Config = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        config
            .protocol
            .validate()
            .context("Invalid protocol settings")?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let contents = serde_json::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(path, contents)
            .with_context(|| format!("Failed to write config file {}", path.display()))?;
        Ok(())
    }

    /// Set a config value
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        let mut next = self.clone();
        match key {
            "control_port" => {
                next.protocol.control_port = value.parse().context("Invalid port number")?;
            }
            "hello_interval_ms" => {
                next.protocol.hello_interval_ms = value.parse().context("Invalid number")?;
            }
            "route_timeout_ms" => {
                next.protocol.route_timeout_ms = value.parse().context("Invalid number")?;
            }
            "fast_local_repair" => {
                next.protocol.fast_local_repair = value.parse().context("Invalid boolean value")?;
            }
            "subnet_direct_routes" => {
                next.protocol.subnet_direct_routes =
                    value.parse().context("Invalid boolean value")?;
            }
            "dump_interval_secs" => {
                next.dump_interval_secs = value.parse().context("Invalid number")?;
            }
            "log_filter" => {
                next.log_filter = value.to_string();
            }
            _ => anyhow::bail!("Unknown config key: {}", key),
        }
        next.protocol.validate().context("Invalid protocol settings")?;
        *self = next;
        Ok(())
    }

    /// Get a config value
    pub fn get(&self, key: &str) -> Option<String> {
        self.list()
            .into_iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }

    /// List all config values
    pub fn list(&self) -> Vec<(String, String)> {
        vec![
            ("control_port".to_string(), self.protocol.control_port.to_string()),
            ("hello_interval_ms".to_string(), self.protocol.hello_interval_ms.to_string()),
            ("route_timeout_ms".to_string(), self.protocol.route_timeout_ms.to_string()),
            ("fast_local_repair".to_string(), self.protocol.fast_local_repair.to_string()),
            ("subnet_direct_routes".to_string(), self.protocol.subnet_direct_routes.to_string()),
            ("dump_interval_secs".to_string(), self.dump_interval_secs.to_string()),
            ("log_filter".to_string(), self.log_filter.clone()),
            ("interfaces".to_string(), self.interfaces.len().to_string()),
        ]
    }
}

/// Parse `10.0.0.1/24` (prefix defaults to /24)
pub fn parse_interface(index: u32, text: &str) -> Result<InterfaceAddress> {
    let (address, prefix_len) = match text.split_once('/') {
        Some((address, prefix)) => (address, prefix.parse().context("Invalid prefix length")?),
        None => (text, 24),
    };
    let address: Ipv4Addr = address
        .parse()
        .with_context(|| format!("Invalid IPv4 address: {}", address))?;
    if prefix_len > 32 {
        anyhow::bail!("Prefix length out of range: {}", prefix_len);
    }
    Ok(InterfaceAddress::new(index, address, prefix_len))
}
