//! In-memory key material management.
//!
//! The keyring owns one key pair per user and one symmetric session key per
//! conversation. Everything lives in memory only; nothing survives a restart.
//!
//! The "public key" here is a SHA-256 digest of the private key, not a real
//! asymmetric public key. This preserves the existing behavioral contract;
//! see the crate documentation for the upgrade path to a genuine
//! key-agreement primitive.
use crate::error::{Result, SecurityError};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use uuid::Uuid;

/// A per-user key pair held only in memory.
#[derive(Clone, Debug)]
pub struct KeyPair {
    /// Digest-derived public half, shared with peers.
    pub public_key: [u8; 32],
    /// 32 secure-random bytes. Never logged; use [`KeyPair::fingerprint`]
    /// for log lines.
    pub private_key: [u8; 32],
    /// Identifier carried in envelopes so receivers can pick the right key.
    pub key_id: String,
}

impl KeyPair {
    /// Short hex fingerprint of the public key, safe to log.
    pub fn fingerprint(&self) -> String {
        hex::encode(&self.public_key[..4])
    }
}

/// Generates, stores, and rotates key pairs and session keys.
#[derive(Default)]
pub struct Keyring {
    key_pairs: HashMap<String, KeyPair>,
    session_keys: HashMap<String, [u8; 32]>,
}

/// Fills a 32-byte buffer from the OS secure random source.
fn secure_key_bytes() -> Result<[u8; 32]> {
    let mut bytes = [0u8; 32];
    getrandom::getrandom(&mut bytes).map_err(|e| SecurityError::RandomSource(e.to_string()))?;
    Ok(bytes)
}

impl Keyring {
    pub fn new() -> Self {
        Self::default()
    }

    /// Generates a new key pair for a user, replacing any existing one.
    ///
    /// The private key is 32 secure-random bytes; the public key is its
    /// SHA-256 digest.
    ///
    /// # Errors
    ///
    /// Returns an error if the secure random source fails.
    pub fn generate_key_pair(&mut self, user_id: &str) -> Result<KeyPair> {
        let private_key = secure_key_bytes()?;
        let public_key: [u8; 32] = Sha256::digest(private_key).into();

        let pair = KeyPair {
            public_key,
            private_key,
            key_id: Uuid::new_v4().to_string(),
        };

        tracing::debug!(
            user_id,
            key_id = %pair.key_id,
            fingerprint = %pair.fingerprint(),
            "Generated key pair"
        );

        self.key_pairs.insert(user_id.to_string(), pair.clone());
        Ok(pair)
    }

    /// Generates a fresh session key for a conversation, replacing any prior
    /// key for the same conversation. There is no versioning; messages
    /// encrypted under the old key must be handled by the caller.
    ///
    /// # Errors
    ///
    /// Returns an error if the secure random source fails.
    pub fn generate_session_key(&mut self, conversation_id: &str) -> Result<[u8; 32]> {
        let key = secure_key_bytes()?;
        self.session_keys.insert(conversation_id.to_string(), key);
        Ok(key)
    }

    /// Regenerates and replaces the user's key pair.
    ///
    /// Nothing already encrypted under the old `key_id` is re-encrypted;
    /// callers own the key transition.
    ///
    /// # Errors
    ///
    /// Returns an error if the secure random source fails.
    pub fn rotate_keys(&mut self, user_id: &str) -> Result<KeyPair> {
        let pair = self.generate_key_pair(user_id)?;
        tracing::info!(user_id, key_id = %pair.key_id, "Rotated keys");
        Ok(pair)
    }

    /// Looks up a user's public key. Absence is not an error.
    pub fn public_key(&self, user_id: &str) -> Option<[u8; 32]> {
        self.key_pairs.get(user_id).map(|p| p.public_key)
    }

    /// Looks up a user's private key. Absence is not an error.
    pub fn private_key(&self, user_id: &str) -> Option<[u8; 32]> {
        self.key_pairs.get(user_id).map(|p| p.private_key)
    }

    /// Looks up a user's full key pair.
    pub fn key_pair(&self, user_id: &str) -> Option<&KeyPair> {
        self.key_pairs.get(user_id)
    }

    /// Looks up a conversation's current session key.
    pub fn session_key(&self, conversation_id: &str) -> Option<[u8; 32]> {
        self.session_keys.get(conversation_id).copied()
    }

    /// Drops all session keys. Key pairs are retained; see the orchestrator's
    /// shutdown semantics.
    pub fn clear_session_keys(&mut self) {
        let count = self.session_keys.len();
        self.session_keys.clear();
        tracing::debug!(count, "Cleared session keys");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sha2::{Digest, Sha256};

    #[test]
    fn public_key_is_digest_of_private_key() {
        let mut keyring = Keyring::new();
        let pair = keyring.generate_key_pair("alice").expect("generate");

        let expected: [u8; 32] = Sha256::digest(pair.private_key).into();
        assert_eq!(pair.public_key, expected);
    }

    #[test]
    fn rotation_replaces_the_key_pair() {
        let mut keyring = Keyring::new();
        let old = keyring.generate_key_pair("alice").expect("generate");
        let new = keyring.rotate_keys("alice").expect("rotate");

        assert_ne!(old.key_id, new.key_id);
        assert_ne!(old.private_key, new.private_key);
        assert_eq!(keyring.public_key("alice"), Some(new.public_key));
    }

    #[test]
    fn absent_lookups_return_none() {
        let keyring = Keyring::new();
        assert!(keyring.public_key("nobody").is_none());
        assert!(keyring.private_key("nobody").is_none());
        assert!(keyring.session_key("no-conversation").is_none());
    }

    #[test]
    fn session_key_is_overwritten_per_conversation() {
        let mut keyring = Keyring::new();
        let first = keyring.generate_session_key("conv-1").expect("generate");
        let second = keyring.generate_session_key("conv-1").expect("generate");

        assert_ne!(first, second);
        assert_eq!(keyring.session_key("conv-1"), Some(second));
    }

    #[test]
    fn clear_session_keys_keeps_key_pairs() {
        let mut keyring = Keyring::new();
        keyring.generate_key_pair("alice").expect("generate");
        keyring.generate_session_key("conv-1").expect("generate");

        keyring.clear_session_keys();

        assert!(keyring.session_key("conv-1").is_none());
        assert!(keyring.public_key("alice").is_some());
    }
}
