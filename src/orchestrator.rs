//! The public face of the secure-communications subsystem.
//!
//! [`SecureGrid`] composes the keyring, message cipher, location obfuscator,
//! and tunnel manager behind one configuration object. It is an explicit
//! instance, constructed at application start and dependency-injected into
//! callers; there is no global singleton, so multiple accounts or tests can
//! run side by side.
use crate::config::{ConfigUpdate, ObfuscationLevel, SecureGridConfig, TunnelProtocol};
use crate::crypto::{cipher, EncryptedEnvelope, KeyPair, Keyring};
use crate::error::{Result, SecurityError};
use crate::location::{self, MaskedLocation, ProxiedRequest};
use crate::tunnel::{TunnelSession, TunnelSessionManager, TunnelStatus};
use serde::Serialize;
use std::time::Duration;
use tokio::sync::RwLock;

/// Result of routing a payload through [`SecureGrid::secure_request`].
#[derive(Clone, Debug)]
pub enum SecureRequestOutcome {
    /// The payload was encapsulated through the active tunnel session.
    Tunneled { session_id: String, frame: String },
    /// No active tunnel; the payload was wrapped with synthetic proxy
    /// headers instead.
    Proxied(ProxiedRequest),
}

/// Per-subsystem snapshot returned by [`SecureGrid::security_status`].
#[derive(Serialize, Clone, Debug)]
pub struct SecurityStatus {
    pub encryption: EncryptionStatus,
    pub location: LocationStatus,
    pub tunnel: TunnelStatusSummary,
    /// Aggregate 0-100 score over the enabled and active subsystems.
    pub overall_security_score: u8,
}

#[derive(Serialize, Clone, Debug)]
pub struct EncryptionStatus {
    pub enabled: bool,
    pub key_rotation_interval_secs: u64,
}

#[derive(Serialize, Clone, Debug)]
pub struct LocationStatus {
    pub enabled: bool,
    pub level: ObfuscationLevel,
}

#[derive(Serialize, Clone, Debug)]
pub struct TunnelStatusSummary {
    pub enabled: bool,
    pub protocol: TunnelProtocol,
    /// Whether the instance's single tracked session is currently active.
    pub active: bool,
    pub session: Option<TunnelSession>,
}

/// Orchestrates the secure-communications subsystems behind one API.
///
/// At most one tunnel session is tracked per instance. A failure in one
/// subsystem never disables the others.
pub struct SecureGrid {
    config: RwLock<SecureGridConfig>,
    keyring: RwLock<Keyring>,
    tunnels: TunnelSessionManager,
    active_tunnel: RwLock<Option<String>>,
}

impl SecureGrid {
    pub fn new(config: SecureGridConfig) -> Self {
        Self {
            config: RwLock::new(config),
            keyring: RwLock::new(Keyring::new()),
            tunnels: TunnelSessionManager::new(),
            active_tunnel: RwLock::new(None),
        }
    }

    /// Like [`Self::new`], with a custom simulated tunnel handshake delay.
    pub fn with_handshake_delay(config: SecureGridConfig, handshake_delay: Duration) -> Self {
        Self {
            config: RwLock::new(config),
            keyring: RwLock::new(Keyring::new()),
            tunnels: TunnelSessionManager::with_handshake_delay(handshake_delay),
            active_tunnel: RwLock::new(None),
        }
    }

    /// Prepares the instance for a user: generates their key pair and, when
    /// the tunnel is enabled, opens the single tracked tunnel session.
    ///
    /// Any previously tracked session is closed first, keeping the
    /// one-tunnel-per-instance constraint.
    ///
    /// # Errors
    ///
    /// Returns an error if key generation fails. Tunnel startup cannot fail
    /// here; the handshake completes in the background.
    pub async fn initialize(&self, user_id: &str) -> Result<KeyPair> {
        let pair = self.keyring.write().await.generate_key_pair(user_id)?;

        let tunnel_config = {
            let config = self.config.read().await;
            config.tunnel.clone()
        };

        if tunnel_config.enabled {
            let mut active = self.active_tunnel.write().await;
            if let Some(old_id) = active.take() {
                self.tunnels.close_tunnel(&old_id).await;
            }
            let session = self.tunnels.create_tunnel(user_id, &tunnel_config).await;
            *active = Some(session.session_id);
        }

        tracing::info!(user_id, "Secure grid initialized");
        Ok(pair)
    }

    /// Encrypts a message for a recipient.
    ///
    /// # Errors
    ///
    /// Returns [`SecurityError::Configuration`] when encryption is disabled.
    pub async fn send_secure_message(
        &self,
        plaintext: &str,
        recipient_id: &str,
        recipient_public_key: &[u8; 32],
    ) -> Result<EncryptedEnvelope> {
        {
            let config = self.config.read().await;
            if !config.encryption.enabled {
                return Err(SecurityError::Configuration(
                    "message encryption".to_string(),
                ));
            }
        }

        let key_id = {
            let keyring = self.keyring.read().await;
            keyring
                .key_pair(recipient_id)
                .map(|p| p.key_id.clone())
                .unwrap_or_else(|| "external".to_string())
        };

        cipher::encrypt_message(plaintext, recipient_public_key, None, &key_id)
    }

    /// Decrypts an envelope addressed to a local user.
    ///
    /// # Errors
    ///
    /// Returns [`SecurityError::KeyNotFound`] when no private key is
    /// registered for the recipient, or [`SecurityError::Authentication`]
    /// when the envelope fails its tag check.
    pub async fn receive_secure_message(
        &self,
        envelope: &EncryptedEnvelope,
        recipient_id: &str,
    ) -> Result<String> {
        let decryption_key = {
            let keyring = self.keyring.read().await;
            let pair = keyring
                .key_pair(recipient_id)
                .ok_or_else(|| SecurityError::KeyNotFound(recipient_id.to_string()))?;
            // The digest-derived public key is the shared encryption key
            // under the hash-derived key contract.
            pair.public_key
        };

        cipher::decrypt_message(envelope, &decryption_key)
    }

    /// Masks a coordinate per the configured obfuscation level.
    ///
    /// When masking is disabled this is an explicit bypass, not an error:
    /// the unmasked input comes back tagged with the `low` level and no
    /// proxy region.
    pub async fn mask_current_location(&self, lat: f64, lng: f64) -> Result<MaskedLocation> {
        let location_config = {
            let config = self.config.read().await;
            config.location.clone()
        };

        if !location_config.enabled {
            return Ok(MaskedLocation {
                masked_lat: lat,
                masked_lng: lng,
                proxy_region: "none".to_string(),
                obfuscation_level: ObfuscationLevel::Low,
                timestamp: chrono::Utc::now().timestamp_millis(),
            });
        }

        location::mask_location(lat, lng, location_config.level)
    }

    /// Routes an outbound request through the protective pipeline.
    ///
    /// A `location` object in the payload is replaced with a masked one when
    /// masking is enabled. The possibly adjusted payload is then
    /// encapsulated through the tunnel when one is active; otherwise it
    /// falls back to plain proxy-header wrapping. The tunnel takes
    /// precedence whenever both are available.
    pub async fn secure_request(
        &self,
        url: &str,
        mut data: serde_json::Value,
    ) -> Result<SecureRequestOutcome> {
        let masking_enabled = {
            let config = self.config.read().await;
            config.location.enabled
        };

        if masking_enabled {
            if let Some((lat, lng)) = extract_location(&data) {
                let masked = self.mask_current_location(lat, lng).await?;
                data["location"] = serde_json::to_value(&masked)?;
            }
        }

        let active_id = {
            let active = self.active_tunnel.read().await;
            active.clone()
        };

        if let Some(session_id) = active_id {
            let is_active = self
                .tunnels
                .session(&session_id)
                .await
                .map(|s| s.status == TunnelStatus::Active)
                .unwrap_or(false);
            if is_active {
                let frame = self.tunnels.encapsulate_request(&session_id, &data).await?;
                return Ok(SecureRequestOutcome::Tunneled { session_id, frame });
            }
        }

        Ok(SecureRequestOutcome::Proxied(location::route_through_proxy(
            url, data, None,
        )?))
    }

    /// Applies a partial configuration update. Only calls issued after the
    /// update observe the new configuration.
    pub async fn update_config(&self, update: ConfigUpdate) {
        let mut config = self.config.write().await;
        config.apply(update);
        tracing::info!("Configuration updated");
    }

    /// Snapshot of each subsystem plus the aggregate security score.
    ///
    /// The score is a pure function of the current configuration and tunnel
    /// status: +40 for encryption, +10/20/30/40 by masking level, +20 for an
    /// enabled and active tunnel, capped at 100.
    pub async fn security_status(&self) -> SecurityStatus {
        let config = self.config.read().await.clone();

        let session = {
            let active = self.active_tunnel.read().await;
            match active.as_deref() {
                Some(id) => self.tunnels.session(id).await,
                None => None,
            }
        };
        let tunnel_active = session
            .as_ref()
            .map(|s| s.status == TunnelStatus::Active)
            .unwrap_or(false);

        let mut score: u32 = 0;
        if config.encryption.enabled {
            score += 40;
        }
        if config.location.enabled {
            score += u32::from(config.location.level.score_points());
        }
        if config.tunnel.enabled && tunnel_active {
            score += 20;
        }

        SecurityStatus {
            encryption: EncryptionStatus {
                enabled: config.encryption.enabled,
                key_rotation_interval_secs: config.encryption.key_rotation_interval_secs,
            },
            location: LocationStatus {
                enabled: config.location.enabled,
                level: config.location.level,
            },
            tunnel: TunnelStatusSummary {
                enabled: config.tunnel.enabled,
                protocol: config.tunnel.protocol,
                active: tunnel_active,
                session,
            },
            overall_security_score: score.min(100) as u8,
        }
    }

    /// Regenerates a user's key pair. Existing envelopes under the old
    /// `key_id` are the caller's problem; nothing is re-encrypted.
    pub async fn rotate_keys(&self, user_id: &str) -> Result<KeyPair> {
        self.keyring.write().await.rotate_keys(user_id)
    }

    /// Creates or replaces a conversation's symmetric session key.
    pub async fn generate_session_key(&self, conversation_id: &str) -> Result<[u8; 32]> {
        self.keyring.write().await.generate_session_key(conversation_id)
    }

    /// Looks up a local user's public key.
    pub async fn public_key(&self, user_id: &str) -> Option<[u8; 32]> {
        self.keyring.read().await.public_key(user_id)
    }

    /// Waits for the tracked tunnel session to finish its handshake.
    ///
    /// # Errors
    ///
    /// Returns [`SecurityError::TunnelInactive`] if no tunnel is tracked or
    /// the session disconnects before becoming active.
    pub async fn wait_for_tunnel(&self) -> Result<()> {
        let active_id = {
            let active = self.active_tunnel.read().await;
            active.clone()
        };
        match active_id {
            Some(id) => self.tunnels.wait_until_active(&id).await,
            None => Err(SecurityError::TunnelInactive("none".to_string())),
        }
    }

    /// Advisory health check of the tracked tunnel session.
    pub async fn tunnel_healthy(&self) -> bool {
        let active = self.active_tunnel.read().await;
        match active.as_deref() {
            Some(id) => self.tunnels.health_check(id).await,
            None => false,
        }
    }

    /// Closes the tracked tunnel and clears session keys.
    ///
    /// Key pairs survive shutdown so a later `initialize` cycle can reuse
    /// registered identities; whether they should is an open design
    /// question recorded in DESIGN.md, so the existing behavior is kept.
    pub async fn shutdown(&self) {
        let old_id = {
            let mut active = self.active_tunnel.write().await;
            active.take()
        };
        if let Some(id) = old_id {
            self.tunnels.close_tunnel(&id).await;
        }

        self.keyring.write().await.clear_session_keys();
        tracing::info!("Secure grid shut down");
    }
}

/// Pulls a `{lat, lng}` pair out of a payload's `location` object.
fn extract_location(data: &serde_json::Value) -> Option<(f64, f64)> {
    let location = data.get("location")?;
    let lat = location.get("lat")?.as_f64()?;
    let lng = location.get("lng")?.as_f64()?;
    Some((lat, lng))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EncryptionConfig, LocationConfig, TunnelConfig};

    fn full_config() -> SecureGridConfig {
        SecureGridConfig {
            encryption: EncryptionConfig::default(),
            location: LocationConfig {
                enabled: true,
                level: ObfuscationLevel::Maximum,
            },
            tunnel: TunnelConfig {
                enabled: true,
                ..Default::default()
            },
        }
    }

    #[tokio::test]
    async fn score_is_exactly_100_when_everything_is_on() {
        let grid =
            SecureGrid::with_handshake_delay(full_config(), Duration::from_millis(10));
        grid.initialize("alice").await.expect("initialize");
        grid.wait_for_tunnel().await.expect("handshake");

        let status = grid.security_status().await;
        assert!(status.tunnel.active);
        assert_eq!(status.overall_security_score, 100);
    }

    #[tokio::test]
    async fn score_ignores_an_enabled_but_inactive_tunnel() {
        let grid =
            SecureGrid::with_handshake_delay(full_config(), Duration::from_secs(3600));
        grid.initialize("alice").await.expect("initialize");

        // Handshake will not complete within this test.
        let status = grid.security_status().await;
        assert!(status.tunnel.enabled);
        assert!(!status.tunnel.active);
        assert_eq!(status.overall_security_score, 80);
    }

    #[tokio::test]
    async fn disabled_masking_is_a_bypass_not_an_error() {
        let grid = SecureGrid::new(SecureGridConfig {
            location: LocationConfig {
                enabled: false,
                level: ObfuscationLevel::High,
            },
            ..Default::default()
        });

        let masked = grid.mask_current_location(48.8566, 2.3522).await.expect("mask");
        assert_eq!(masked.masked_lat, 48.8566);
        assert_eq!(masked.masked_lng, 2.3522);
        assert_eq!(masked.obfuscation_level, ObfuscationLevel::Low);
        assert_eq!(masked.proxy_region, "none");
    }

    #[tokio::test]
    async fn secure_request_masks_embedded_locations() {
        let grid = SecureGrid::new(SecureGridConfig {
            location: LocationConfig {
                enabled: true,
                level: ObfuscationLevel::Low,
            },
            ..Default::default()
        });

        let data = serde_json::json!({
            "action": "check-in",
            "location": {"lat": 40.7128, "lng": -74.0060}
        });

        let outcome = grid.secure_request("https://api.example.com", data).await.expect("request");
        let SecureRequestOutcome::Proxied(request) = outcome else {
            panic!("expected proxy fallback without a tunnel");
        };

        let location = &request.body["location"];
        assert!(location.get("masked_lat").is_some());
        let masked_lat = location["masked_lat"].as_f64().unwrap();
        assert!((masked_lat - 40.7128).abs() <= ObfuscationLevel::Low.radius() + 1e-9);
        assert_eq!(request.body["action"], "check-in");
    }

    #[tokio::test]
    async fn shutdown_keeps_key_pairs() {
        let grid = SecureGrid::new(SecureGridConfig::default());
        grid.initialize("alice").await.expect("initialize");

        grid.shutdown().await;

        assert!(grid.public_key("alice").await.is_some());
    }
}
