//! Tunnel Configuration
//!
//! Derives the tunnel interface configuration and the engine parameters
//! from the current settings. Both are rebuilt on every start attempt.

use crate::settings::{SettingKey, SettingsStore};
use std::collections::BTreeSet;
use std::fmt;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};

/// Interface prefix length
pub const PREFIX_LENGTH: u8 = 24;

/// Interface MTU
pub const TUNNEL_MTU: u16 = 1350;

/// Session label shown by the OS
pub const SESSION_LABEL: &str = "CuteVPN";

/// IPv4 route in CIDR notation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Ipv4Cidr {
    /// Network address
    pub addr: Ipv4Addr,
    /// Prefix length (0-32)
    pub prefix: u8,
}

impl Ipv4Cidr {
    /// Create a new route
    pub fn new(addr: Ipv4Addr, prefix: u8) -> Self {
        Self { addr, prefix }
    }

    /// Route covering all IPv4 traffic (`0.0.0.0/0`)
    pub fn default_route() -> Self {
        Self::new(Ipv4Addr::UNSPECIFIED, 0)
    }
}

impl fmt::Display for Ipv4Cidr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.addr, self.prefix)
    }
}

/// Tunnel interface configuration handed to the OS
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelConfig {
    /// Address assigned to the interface
    pub local_address: Ipv4Addr,
    /// Prefix length of the interface network
    pub prefix_length: u8,
    /// DNS server inside the tunnel
    pub dns_server: Ipv4Addr,
    /// Routes captured by the tunnel
    pub routes: Vec<Ipv4Cidr>,
    /// Interface MTU
    pub mtu: u16,
    /// Session label
    pub session_label: String,
    /// Applications whose traffic bypasses the tunnel (always contains the host)
    pub excluded_app_ids: BTreeSet<String>,
}

/// Parameters handed to the engine together with the descriptor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineParams {
    /// Directory the engine may write its files (logs) into
    pub storage_dir: PathBuf,
    /// Local node name
    pub local_name: String,
    /// Local address in CIDR form, e.g. `172.20.0.99/24`
    pub local_address: Ipv4Cidr,
    /// Initial gateway
    pub gateway: String,
    /// Link endpoints
    pub links: Vec<String>,
}

/// Builds [`TunnelConfig`] and [`EngineParams`] from settings
#[derive(Debug, Clone)]
pub struct TunnelConfigBuilder {
    host_app_id: String,
}

impl TunnelConfigBuilder {
    /// Create a builder for the given host application id
    pub fn new(host_app_id: impl Into<String>) -> Self {
        Self {
            host_app_id: host_app_id.into(),
        }
    }

    /// Derive the interface configuration
    pub fn build(&self, settings: &SettingsStore) -> Result<TunnelConfig, ConfigError> {
        let local_address = parse_address(settings, SettingKey::LocalAddress)?;
        let dns_server = parse_address(settings, SettingKey::DnsServer)?;

        let mut excluded_app_ids = settings.excluded_apps().unwrap_or_default();
        excluded_app_ids.insert(self.host_app_id.clone());

        Ok(TunnelConfig {
            local_address,
            prefix_length: PREFIX_LENGTH,
            dns_server,
            routes: vec![Ipv4Cidr::default_route()],
            mtu: TUNNEL_MTU,
            session_label: SESSION_LABEL.to_string(),
            excluded_app_ids,
        })
    }

    /// Derive the engine parameters
    pub fn engine_params(
        &self,
        settings: &SettingsStore,
        storage_dir: &Path,
    ) -> Result<EngineParams, ConfigError> {
        let local_address = parse_address(settings, SettingKey::LocalAddress)?;

        Ok(EngineParams {
            storage_dir: storage_dir.to_path_buf(),
            local_name: required(settings, SettingKey::Name)?,
            local_address: Ipv4Cidr::new(local_address, PREFIX_LENGTH),
            gateway: required(settings, SettingKey::Gateway)?,
            links: parse_links(&required(settings, SettingKey::Links)?),
        })
    }
}

/// Split the multi-line links setting into endpoints
///
/// Lines are trimmed and blank lines dropped.
pub fn parse_links(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

fn required(settings: &SettingsStore, key: SettingKey) -> Result<String, ConfigError> {
    settings
        .get_string(key)
        .ok_or(ConfigError::MissingSetting(key))
}

fn parse_address(settings: &SettingsStore, key: SettingKey) -> Result<Ipv4Addr, ConfigError> {
    let value = required(settings, key)?;
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidAddress { key, value })
}

/// Configuration errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing setting: {0}")]
    MissingSetting(SettingKey),

    #[error("Invalid {key} address: {value:?}")]
    InvalidAddress { key: SettingKey, value: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOST: &str = "com.github.clmul.cute";

    #[test]
    fn test_build_defaults() {
        let settings = SettingsStore::in_memory();
        let config = TunnelConfigBuilder::new(HOST).build(&settings).unwrap();

        assert_eq!(config.local_address, Ipv4Addr::new(172, 20, 0, 99));
        assert_eq!(config.dns_server, Ipv4Addr::new(8, 8, 8, 8));
        assert_eq!(config.prefix_length, 24);
        assert_eq!(config.mtu, 1350);
        assert_eq!(config.routes, vec![Ipv4Cidr::default_route()]);
        assert_eq!(config.session_label, "CuteVPN");
    }

    #[test]
    fn test_host_always_excluded() {
        let settings = SettingsStore::in_memory();
        let builder = TunnelConfigBuilder::new(HOST);

        let config = builder.build(&settings).unwrap();
        assert_eq!(config.excluded_app_ids.len(), 1);
        assert!(config.excluded_app_ids.contains(HOST));

        let mut draft = settings.draft_excluded_apps();
        draft.set("com.example.bank", true);
        settings.commit_excluded_apps(draft);

        let config = builder.build(&settings).unwrap();
        assert!(config.excluded_app_ids.contains(HOST));
        assert!(config.excluded_app_ids.contains("com.example.bank"));
    }

    #[test]
    fn test_build_does_not_touch_settings() {
        let settings = SettingsStore::in_memory();
        TunnelConfigBuilder::new(HOST).build(&settings).unwrap();

        assert!(settings.excluded_apps().unwrap().is_empty());
    }

    #[test]
    fn test_invalid_address() {
        let settings = SettingsStore::in_memory();
        settings.save_string(SettingKey::LocalAddress, "not-an-ip");

        let err = TunnelConfigBuilder::new(HOST).build(&settings).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidAddress { key: SettingKey::LocalAddress, .. }
        ));
    }

    #[test]
    fn test_engine_params() {
        let settings = SettingsStore::in_memory();
        settings.save_string(SettingKey::Links, "  tls://a:4433\n\n udp://b:9000  \n");

        let params = TunnelConfigBuilder::new(HOST)
            .engine_params(&settings, Path::new("/data/cute"))
            .unwrap();

        assert_eq!(params.local_name, "cellphone");
        assert_eq!(params.local_address.to_string(), "172.20.0.99/24");
        assert_eq!(params.gateway, "172.20.0.1");
        assert_eq!(params.links, vec!["tls://a:4433", "udp://b:9000"]);
    }
}
