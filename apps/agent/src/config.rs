//! Agent configuration management.
//!
//! Configuration is stored as TOML at `$CHUNKYARD_CONFIG` when set,
//! otherwise:
//! - Linux: `~/.config/chunkyard/agent.toml`
//! - Windows: `%APPDATA%/chunkyard/agent.toml`

use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Environment variable overriding the configuration file location.
pub const CONFIG_ENV: &str = "CHUNKYARD_CONFIG";

/// Agent configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Root directory for staged chunks and merged files.
    #[serde(default = "default_upload_dir")]
    pub upload_dir: PathBuf,

    /// Address the WebSocket server binds.
    #[serde(default = "default_bind_address")]
    pub bind_address: IpAddr,

    /// WebSocket server port (0 = auto-assign).
    #[serde(default = "default_port")]
    pub port: u16,

    /// Base URL under which `upload_dir` is served to clients.
    #[serde(default = "default_public_url")]
    pub public_url: String,

    /// Chunk size advertised to clients in the `ping` reply, in bytes.
    #[serde(default = "default_chunk_size")]
    pub default_chunk_size: usize,
}

fn default_upload_dir() -> PathBuf {
    PathBuf::from("./uploads")
}

fn default_bind_address() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

fn default_port() -> u16 {
    8088
}

fn default_public_url() -> String {
    "http://127.0.0.1:8088/uploads".into()
}

fn default_chunk_size() -> usize {
    chunkyard_protocol::constants::DEFAULT_CHUNK_SIZE
}

impl Default for Config {
    fn default() -> Self {
        Self {
            upload_dir: default_upload_dir(),
            bind_address: default_bind_address(),
            port: default_port(),
            public_url: default_public_url(),
            default_chunk_size: default_chunk_size(),
        }
    }
}

impl Config {
    /// Loads configuration from disk, or creates a default if not found.
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(&config_path()?)
    }

    /// Loads configuration from `path`, writing defaults there if missing.
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Config = toml::from_str(&content)?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save_to(path)?;
            Ok(config)
        }
    }

    /// Saves the configuration to `path`.
    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        tracing::debug!(path = %path.display(), "configuration saved");
        Ok(())
    }
}

/// Returns the configuration file path.
fn config_path() -> anyhow::Result<PathBuf> {
    if let Some(path) = std::env::var_os(CONFIG_ENV) {
        return Ok(PathBuf::from(path));
    }

    #[cfg(target_os = "windows")]
    {
        let appdata =
            std::env::var("APPDATA").unwrap_or_else(|_| "C:\\Users\\Default\\AppData".into());
        Ok(PathBuf::from(appdata).join("chunkyard").join("agent.toml"))
    }

    #[cfg(not(target_os = "windows"))]
    {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
        Ok(PathBuf::from(home)
            .join(".config")
            .join("chunkyard")
            .join("agent.toml"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = Config::default();
        assert_eq!(config.upload_dir, PathBuf::from("./uploads"));
        assert_eq!(config.bind_address, IpAddr::V4(Ipv4Addr::UNSPECIFIED));
        assert_eq!(config.port, 8088);
        assert_eq!(config.public_url, "http://127.0.0.1:8088/uploads");
        assert_eq!(config.default_chunk_size, 1024 * 1024);
    }

    #[test]
    fn config_roundtrip_toml() {
        let config = Config {
            upload_dir: "/srv/uploads".into(),
            bind_address: "127.0.0.1".parse().unwrap(),
            port: 9000,
            public_url: "https://files.example.com/u".into(),
            default_chunk_size: 4096,
        };

        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn config_partial_toml() {
        // Only specify port, rest should use defaults.
        let config: Config = toml::from_str("port = 0").unwrap();
        assert_eq!(config.port, 0);
        assert_eq!(config.upload_dir, PathBuf::from("./uploads"));
        assert_eq!(config.public_url, "http://127.0.0.1:8088/uploads");
    }

    #[test]
    fn config_path_not_empty() {
        let path = config_path().unwrap();
        assert!(!path.as_os_str().is_empty());
    }

    #[test]
    fn missing_file_writes_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("nested").join("agent.toml");

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config, Config::default());
        assert!(path.exists());

        let reloaded = Config::load_from(&path).unwrap();
        assert_eq!(reloaded, config);
    }

    #[test]
    fn config_save_and_load() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("agent.toml");

        let config = Config {
            port: 1234,
            ..Config::default()
        };
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.port, 1234);
    }

    #[test]
    fn invalid_toml_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("agent.toml");
        std::fs::write(&path, "port = \"not a number\"").unwrap();
        assert!(Config::load_from(&path).is_err());
    }
}
