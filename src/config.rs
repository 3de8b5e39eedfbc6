use std::path::PathBuf;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

/// Get the data directory for the application.
pub fn get_data_dir() -> PathBuf {
    if let Ok(s) = std::env::var("TAPCARD_DATA") {
        PathBuf::from(s)
    } else if let Some(proj_dirs) = ProjectDirs::from("com", "tapcard", "tapcard") {
        proj_dirs.data_local_dir().to_path_buf()
    } else {
        PathBuf::from(".").join(".data")
    }
}

/// Get the config directory for the application.
pub fn get_config_dir() -> PathBuf {
    if let Ok(s) = std::env::var("TAPCARD_CONFIG") {
        PathBuf::from(s)
    } else if let Some(proj_dirs) = ProjectDirs::from("com", "tapcard", "tapcard") {
        proj_dirs.config_local_dir().to_path_buf()
    } else {
        PathBuf::from(".").join(".config")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub name: String,
    pub explorer_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub network: NetworkConfig,
    /// SOCKS proxy for explorer traffic, e.g. `socks5h://127.0.0.1:9050`.
    pub socks_proxy: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self::mainnet()
    }
}

impl Config {
    /// Pick the network matching what the card reports, with an optional
    /// proxy from the CLI.
    pub fn for_card(testnet: bool, socks_proxy: Option<&str>) -> Self {
        let mut config = if testnet {
            Self::testnet()
        } else {
            Self::mainnet()
        };
        config.socks_proxy = socks_proxy.map(str::to_string);
        config
    }

    pub fn mainnet() -> Self {
        Self {
            network: NetworkConfig {
                name: "mainnet".to_string(),
                explorer_url: "https://blockstream.info/api".to_string(),
            },
            socks_proxy: None,
        }
    }

    pub fn testnet() -> Self {
        Self {
            network: NetworkConfig {
                name: "testnet".to_string(),
                explorer_url: "https://blockstream.info/testnet/api".to_string(),
            },
            socks_proxy: None,
        }
    }
}
