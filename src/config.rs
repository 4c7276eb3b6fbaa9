//! On-disk configuration. Loading is deliberately narrow: one `load(path)`
//! function, no flag parsing, no env var layering — those are an external
//! collaborator's job (the CLI/service wrapper around this crate).

use std::fs;
use std::path::Path;

use anyhow::Context;
use serde::Deserialize;

use crate::error::CentralError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InterfaceType {
    Serial,
    Gateway,
    Cc1101,
}

/// One entry of the radio-interface list.
#[derive(Debug, Clone, Deserialize)]
pub struct InterfaceConfig {
    pub id: String,
    #[serde(rename = "type")]
    pub interface_type: InterfaceType,
    /// Serial device path, or gateway host, depending on `interface_type`.
    #[serde(rename = "host/device")]
    pub host_or_device: String,
    pub port: Option<u16>,
    #[serde(default)]
    pub default: bool,
    #[serde(default = "default_response_delay_ms")]
    pub response_delay_ms: u64,
    pub ca_file: Option<String>,
    pub cert_file: Option<String>,
    pub key_file: Option<String>,
    pub gpio1: Option<u32>,
    pub gpio2: Option<u32>,
    pub interrupt_pin: Option<u32>,
    /// Daisy-chain position on a shared CUL bus; drives the `*` line prefix.
    #[serde(default)]
    pub stack_position: u8,
    /// Raw lines replayed verbatim after the interface's init sequence, and
    /// again on every reconnect.
    #[serde(default)]
    pub additional_commands: Vec<String>,
}

fn default_response_delay_ms() -> u64 {
    210
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub interfaces: Vec<InterfaceConfig>,
    /// Overrides the central address normally derived from persistence.
    pub centraladdress: Option<u32>,
}

impl Config {
    pub fn default_interface(&self) -> Option<&InterfaceConfig> {
        self.interfaces
        .iter()
        .find(|i| i.default)
        .or_else(|| self.interfaces.first())
    }
}

/// Loads and parses the on-disk config, with file-path context attached to
/// any I/O or parse failure the way the caller's own top-level error
/// handling expects.
pub fn load(path: impl AsRef<Path>) -> Result<Config, CentralError> {
    load_inner(path.as_ref()).map_err(|e| CentralError::Other(format!("{e:#}")))
}

fn load_inner(path: &Path) -> anyhow::Result<Config> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("reading config at {}", path.display()))?;
    let cfg = toml::from_str(&text).context("parsing config")?;
    Ok(cfg)
}

/// Vendor-specific pairing behavior the core calls but does not know the
/// content of (e.g. a gateway's "add vendor features" step after an ack),
/// keeping bridging logic out of core.
pub trait PairingFeatures: Send + Sync {
    fn on_pairing_ack(&self, peer_address: u32, device_type: u32, firmware: u16);
}

/// No-op implementation for deployments that don't need vendor pairing hooks.
pub struct NoPairingFeatures;

impl PairingFeatures for NoPairingFeatures {
    fn on_pairing_ack(&self, _peer_address: u32, _device_type: u32, _firmware: u16) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn parses_minimal_config() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
            centraladdress = 123456

            [[interfaces]]
            id = "cul0"
            type = "serial"
            "host/device" = "/dev/ttyUSB0"
            default = true
            "#
        )
        .unwrap();
        let cfg = load(file.path()).unwrap();
        assert_eq!(cfg.centraladdress, Some(123456));
        assert_eq!(cfg.interfaces.len(), 1);
        assert_eq!(cfg.default_interface().unwrap().id, "cul0");
        assert_eq!(cfg.default_interface().unwrap().response_delay_ms, 210);
    }

    #[test]
    fn parses_gateway_interface_with_tls_paths() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
            [[interfaces]]
            id = "gw0"
            type = "gateway"
            "host/device" = "gateway.local"
            port = 2001
            ca_file = "ca.pem"
            cert_file = "cert.pem"
            key_file = "key.pem"
            additional_commands = ["Zx"]
            "#
        )
        .unwrap();
        let cfg = load(file.path()).unwrap();
        let iface = &cfg.interfaces[0];
        assert_eq!(iface.interface_type, InterfaceType::Gateway);
        assert_eq!(iface.port, Some(2001));
        assert_eq!(iface.additional_commands, vec!["Zx".to_string()]);
    }
}
