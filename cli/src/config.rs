// Configuration management for the matchcall relay
//
// Cross-platform config stored in:
// - macOS: ~/Library/Application Support/matchcall/config.json
// - Linux: ~/.config/matchcall/config.json
// - Windows: %APPDATA%\matchcall\config.json

use anyhow::{Context, Result};
use matchcall_core::signaling::MAX_FRAME_SIZE;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Port the relay listens on
    pub listen_port: u16,

    /// Interface the relay binds to
    pub bind_address: String,

    /// Match graph JSON (`likes` / `blocks`); every pair may call when unset
    pub policy_file: Option<String>,

    /// Largest accepted signaling frame, in KiB; at most the protocol limit
    pub max_frame_kb: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_port: 8080,
            bind_address: "0.0.0.0".to_string(),
            policy_file: None,
            max_frame_kb: 64,
        }
    }
}

impl Config {
    /// Get the config directory path (cross-platform)
    pub fn config_dir() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Failed to determine config directory")?
            .join("matchcall");

        std::fs::create_dir_all(&config_dir).context("Failed to create config directory")?;

        Ok(config_dir)
    }

    pub fn config_file() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.json"))
    }

    /// Load config from the platform config dir, creating the default if missing
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_file()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path).context("Failed to read config file")?;
            let config: Config =
                serde_json::from_str(&contents).context("Failed to parse config file")?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save_to(path)?;
            Ok(config)
        }
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_file()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        let contents = serde_json::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(path, contents).context("Failed to write config file")?;
        Ok(())
    }

    /// Update one key in memory. Callers persist with `save()`.
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "listen_port" => {
                self.listen_port = value.parse().context("Invalid port number")?;
            }
            "bind_address" => {
                value
                    .parse::<IpAddr>()
                    .context("Invalid IP address")?;
                self.bind_address = value.to_string();
            }
            "policy_file" => {
                self.policy_file = if value.is_empty() {
                    None
                } else {
                    Some(value.to_string())
                };
            }
            "max_frame_kb" => {
                let kb: usize = value.parse().context("Invalid number")?;
                let limit = MAX_FRAME_SIZE / 1024;
                if kb == 0 || kb > limit {
                    anyhow::bail!("max_frame_kb must be between 1 and {}", limit);
                }
                self.max_frame_kb = kb;
            }
            _ => anyhow::bail!("Unknown config key: {}", key),
        }
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<String> {
        match key {
            "listen_port" => Some(self.listen_port.to_string()),
            "bind_address" => Some(self.bind_address.clone()),
            "policy_file" => self.policy_file.clone(),
            "max_frame_kb" => Some(self.max_frame_kb.to_string()),
            _ => None,
        }
    }

    pub fn list(&self) -> Vec<(String, String)> {
        vec![
            ("listen_port".to_string(), self.listen_port.to_string()),
            ("bind_address".to_string(), self.bind_address.clone()),
            (
                "policy_file".to_string(),
                self.policy_file
                    .clone()
                    .unwrap_or_else(|| "(allow all)".to_string()),
            ),
            ("max_frame_kb".to_string(), self.max_frame_kb.to_string()),
        ]
    }

    /// Frame limit in bytes, clamped to what the protocol decoder accepts
    pub fn max_frame_bytes(&self) -> usize {
        self.max_frame_kb.saturating_mul(1024).min(MAX_FRAME_SIZE)
    }

    pub fn bind_ip(&self) -> Result<IpAddr> {
        self.bind_address
            .parse()
            .with_context(|| format!("Invalid bind_address: {}", self.bind_address))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.listen_port, 8080);
        assert_eq!(config.policy_file, None);
        assert!(config.bind_ip().is_ok());
    }

    #[test]
    fn test_set_and_get() {
        let mut config = Config::default();
        config.set("listen_port", "9000").unwrap();
        config.set("policy_file", "/srv/matches.json").unwrap();
        assert_eq!(config.get("listen_port").as_deref(), Some("9000"));
        assert_eq!(config.get("policy_file").as_deref(), Some("/srv/matches.json"));

        config.set("policy_file", "").unwrap();
        assert_eq!(config.get("policy_file"), None);
    }

    #[test]
    fn test_rejects_bad_values() {
        let mut config = Config::default();
        assert!(config.set("listen_port", "http").is_err());
        assert!(config.set("bind_address", "not-an-ip").is_err());
        assert!(config.set("max_frame_kb", "0").is_err());
        assert!(config.set("max_frame_kb", "128").is_err());
        assert!(config.set("enable_mdns", "true").is_err());
        assert_eq!(config.listen_port, 8080);
    }

    #[test]
    fn test_load_creates_default_then_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        let mut config = Config::load_from(&path).unwrap();
        assert!(path.exists());
        config.set("max_frame_kb", "32").unwrap();
        config.save_to(&path).unwrap();

        let reloaded = Config::load_from(&path).unwrap();
        assert_eq!(reloaded.max_frame_kb, 32);
    }

    #[test]
    fn test_missing_keys_fall_back_to_defaults() {
        let config: Config = serde_json::from_str(r#"{"listen_port": 7000}"#).unwrap();
        assert_eq!(config.listen_port, 7000);
        assert_eq!(config.bind_address, "0.0.0.0");
        assert_eq!(config.max_frame_kb, 64);
    }

    #[test]
    fn test_frame_limit_never_exceeds_protocol() {
        let config: Config = serde_json::from_str(r#"{"max_frame_kb": 512}"#).unwrap();
        assert_eq!(config.max_frame_bytes(), MAX_FRAME_SIZE);
        assert_eq!(Config::default().max_frame_bytes(), 64 * 1024);
    }
}
