//! Shell Configuration
//!
//! Loaded from `cute-shell.toml` (or the path given on the command line).
//! Every field has a default, so an absent file is not an error.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};

/// Default config file name, looked up in the working directory
pub const DEFAULT_CONFIG_FILE: &str = "cute-shell.toml";

/// A neighbor the dry-run engine pretends to discover
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NeighborEntry {
    pub name: String,
    pub address: Ipv4Addr,
}

/// An application the dry-run registry reports as installed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppEntry {
    pub name: String,
    pub package: String,
    #[serde(default)]
    pub system: bool,
}

/// Shell configuration file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShellConfig {
    /// Settings and engine logs live here
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// `tracing` filter used when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Id of this application, always excluded from the tunnel
    #[serde(default = "default_host_app_id")]
    pub host_app_id: String,
    /// Whether VPN permission starts out granted
    #[serde(default = "default_true")]
    pub permission_granted: bool,
    /// Dry-run engine heartbeat interval
    #[serde(default = "default_heartbeat_secs")]
    pub heartbeat_secs: u64,
    #[serde(default = "default_neighbors")]
    pub neighbors: Vec<NeighborEntry>,
    #[serde(default = "default_apps")]
    pub apps: Vec<AppEntry>,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("cute-data")
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_host_app_id() -> String {
    "com.github.clmul.cute".to_string()
}

fn default_true() -> bool {
    true
}

fn default_heartbeat_secs() -> u64 {
    5
}

fn default_neighbors() -> Vec<NeighborEntry> {
    vec![
        NeighborEntry {
            name: "router".to_string(),
            address: Ipv4Addr::new(172, 20, 0, 1),
        },
        NeighborEntry {
            name: "desktop".to_string(),
            address: Ipv4Addr::new(172, 20, 0, 2),
        },
    ]
}

fn default_apps() -> Vec<AppEntry> {
    vec![
        AppEntry {
            name: "Browser".to_string(),
            package: "org.example.browser".to_string(),
            system: false,
        },
        AppEntry {
            name: "Mail".to_string(),
            package: "org.example.mail".to_string(),
            system: false,
        },
        AppEntry {
            name: "System UI".to_string(),
            package: "android.systemui".to_string(),
            system: true,
        },
    ]
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            log_level: default_log_level(),
            host_app_id: default_host_app_id(),
            permission_granted: true,
            heartbeat_secs: default_heartbeat_secs(),
            neighbors: default_neighbors(),
            apps: default_apps(),
        }
    }
}

impl ShellConfig {
    /// Load from TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).context("invalid shell configuration")
    }

    /// Load `path`, or `cute-shell.toml` if present, or defaults
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => {
                let default = PathBuf::from(DEFAULT_CONFIG_FILE);
                if !default.exists() {
                    return Ok(Self::default());
                }
                default
            }
        };

        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("cannot read {}", path.display()))?;
        Self::from_toml(&content)
    }
}
