//! Runtime configuration for the secure-communications subsystem.
//!
//! One [`SecureGridConfig`] is owned by each orchestrator instance. Partial
//! updates are applied section-by-section via [`ConfigUpdate`]; a change only
//! affects calls issued after it.
use serde::{Deserialize, Serialize};

/// Coarse setting controlling the maximum random displacement applied to a
/// true coordinate.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ObfuscationLevel {
    Low,
    Medium,
    High,
    Maximum,
}

impl ObfuscationLevel {
    /// Maximum displacement for this level, in coordinate-degree units.
    pub fn radius(&self) -> f64 {
        match self {
            ObfuscationLevel::Low => 0.01,
            ObfuscationLevel::Medium => 0.1,
            ObfuscationLevel::High => 0.5,
            ObfuscationLevel::Maximum => 5.0,
        }
    }

    /// Contribution of this level to the aggregate security score.
    pub fn score_points(&self) -> u8 {
        match self {
            ObfuscationLevel::Low => 10,
            ObfuscationLevel::Medium => 20,
            ObfuscationLevel::High => 30,
            ObfuscationLevel::Maximum => 40,
        }
    }
}

/// Simulated tunnel protocol selection. Reporting only; no real transport
/// exists behind it.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TunnelProtocol {
    Wireguard,
    Openvpn,
    Ikev2,
}

/// Message-encryption settings.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct EncryptionConfig {
    /// Whether outbound message encryption is available.
    pub enabled: bool,
    /// Advisory key-rotation interval in seconds. Rotation itself is driven
    /// by the caller; this module never rotates on a timer.
    pub key_rotation_interval_secs: u64,
}

impl Default for EncryptionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            key_rotation_interval_secs: 86_400,
        }
    }
}

/// Location-masking settings.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct LocationConfig {
    /// Whether coordinates are obfuscated before leaving the device.
    pub enabled: bool,
    /// Displacement radius applied when masking is enabled.
    pub level: ObfuscationLevel,
}

impl Default for LocationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            level: ObfuscationLevel::Medium,
        }
    }
}

/// Simulated-tunnel settings.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct TunnelConfig {
    /// Whether a tunnel session is opened at initialization.
    pub enabled: bool,
    pub protocol: TunnelProtocol,
    /// Reported cipher strength of the simulated tunnel, e.g. "aes-256".
    pub encryption_level: String,
    /// Whether traffic should be dropped when the tunnel degrades.
    /// Advisory flag; this module reports it but does not enforce it.
    pub kill_switch: bool,
    /// Whether non-sensitive traffic may bypass the tunnel.
    pub split_tunneling: bool,
}

impl Default for TunnelConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            protocol: TunnelProtocol::Wireguard,
            encryption_level: "aes-256".to_string(),
            kill_switch: true,
            split_tunneling: false,
        }
    }
}

/// Full configuration for one orchestrator instance.
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct SecureGridConfig {
    pub encryption: EncryptionConfig,
    pub location: LocationConfig,
    pub tunnel: TunnelConfig,
}

/// A partial configuration update.
///
/// Each present section replaces the corresponding live section wholesale;
/// absent sections are left untouched. There is no field-level merging.
#[derive(Deserialize, Clone, Debug, Default)]
pub struct ConfigUpdate {
    pub encryption: Option<EncryptionConfig>,
    pub location: Option<LocationConfig>,
    pub tunnel: Option<TunnelConfig>,
}

impl SecureGridConfig {
    /// Applies a partial update, replacing any section present in `update`.
    pub fn apply(&mut self, update: ConfigUpdate) {
        if let Some(encryption) = update.encryption {
            self.encryption = encryption;
        }
        if let Some(location) = update.location {
            self.location = location;
        }
        if let Some(tunnel) = update.tunnel {
            self.tunnel = tunnel;
        }
    }
}
