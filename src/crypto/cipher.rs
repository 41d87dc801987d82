//! Message envelope encryption and decryption.
//!
//! The construction is a keyed XOR stream: the keystream is the SHA-256
//! digest of `key || iv` repeated over the serialized payload, and the
//! authentication tag is the SHA-256 digest of `ciphertext || key`.
//!
//! Known weakness, documented deliberately rather than silently fixed: the
//! tag covers the ciphertext and key but not the `iv` or any associated
//! metadata, so IV substitution and cross-IV replay under the same key are
//! not detected. A production-grade replacement should be a real AEAD
//! construction that binds `iv` and `key_id` as associated data while
//! preserving this four-field envelope contract.
use crate::error::{Result, SecurityError};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// How long a decrypted payload may predate "now" before a staleness
/// warning is emitted.
const STALENESS_WINDOW_MS: i64 = 5 * 60 * 1000;

/// A self-describing encrypted message.
///
/// Carries everything needed to attempt decryption except the key itself.
/// Immutable once produced.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct EncryptedEnvelope {
    /// Base64-encoded XOR output.
    pub ciphertext: String,
    /// Hex-encoded 16-byte initialization vector.
    pub iv: String,
    /// Hex-encoded SHA-256 of `ciphertext || key`.
    pub auth_tag: String,
    /// Identifier of the key pair this envelope was addressed to.
    pub key_id: String,
    /// Envelope creation time, milliseconds since the epoch.
    pub timestamp: i64,
}

/// Inner plaintext payload, serialized to JSON before encryption.
#[derive(Serialize, Deserialize, Debug)]
struct InnerPayload {
    message: String,
    timestamp: i64,
    nonce: String,
}

/// Derives the XOR keystream seed from the key and IV.
fn combined_key(key: &[u8; 32], iv: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(key);
    hasher.update(iv);
    hasher.finalize().into()
}

/// Computes the envelope authentication tag over `ciphertext || key`.
fn auth_tag(ciphertext_b64: &str, key: &[u8; 32]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(ciphertext_b64.as_bytes());
    hasher.update(key);
    hex::encode(hasher.finalize())
}

/// XORs `data` in place against the repeating 32-byte keystream seed.
fn xor_stream(data: &mut [u8], keystream: &[u8; 32]) {
    for (i, byte) in data.iter_mut().enumerate() {
        *byte ^= keystream[i % keystream.len()];
    }
}

/// Encrypts a plaintext message into a self-describing envelope.
///
/// The session key takes precedence over the recipient key when both are
/// supplied.
///
/// # Arguments
///
/// * `plaintext` - The message to encrypt.
/// * `recipient_key` - The recipient's 32-byte key.
/// * `session_key` - Optional per-conversation key, preferred when present.
/// * `key_id` - Key identifier recorded in the envelope.
///
/// # Errors
///
/// Returns an error if the secure random source fails or the inner payload
/// cannot be serialized.
pub fn encrypt_message(
    plaintext: &str,
    recipient_key: &[u8; 32],
    session_key: Option<&[u8; 32]>,
    key_id: &str,
) -> Result<EncryptedEnvelope> {
    encrypt_message_at(
        plaintext,
        recipient_key,
        session_key,
        key_id,
        chrono::Utc::now().timestamp_millis(),
    )
}

/// Encryption body with an explicit payload timestamp.
fn encrypt_message_at(
    plaintext: &str,
    recipient_key: &[u8; 32],
    session_key: Option<&[u8; 32]>,
    key_id: &str,
    timestamp: i64,
) -> Result<EncryptedEnvelope> {
    let key = session_key.unwrap_or(recipient_key);

    let mut iv = [0u8; 16];
    getrandom::getrandom(&mut iv).map_err(|e| SecurityError::RandomSource(e.to_string()))?;

    let mut nonce = [0u8; 8];
    getrandom::getrandom(&mut nonce).map_err(|e| SecurityError::RandomSource(e.to_string()))?;

    let payload = InnerPayload {
        message: plaintext.to_string(),
        timestamp,
        nonce: hex::encode(nonce),
    };

    let mut bytes = serde_json::to_vec(&payload)?;
    xor_stream(&mut bytes, &combined_key(key, &iv));

    let ciphertext = BASE64.encode(&bytes);
    let auth_tag = auth_tag(&ciphertext, key);

    Ok(EncryptedEnvelope {
        ciphertext,
        iv: hex::encode(iv),
        auth_tag,
        key_id: key_id.to_string(),
        timestamp,
    })
}

/// Decrypts an envelope, verifying the authentication tag first.
///
/// Decryption needs only the matching key and the envelope itself; no
/// external session state is consulted. Payloads older than five minutes
/// produce a non-fatal staleness warning.
///
/// # Arguments
///
/// * `envelope` - The envelope to open.
/// * `key` - The 32-byte key the envelope was encrypted under.
///
/// # Errors
///
/// Returns [`SecurityError::Authentication`] if the tag does not validate;
/// no decryption is attempted in that case. Malformed `iv` or `ciphertext`
/// encodings yield [`SecurityError::Encoding`].
pub fn decrypt_message(envelope: &EncryptedEnvelope, key: &[u8; 32]) -> Result<String> {
    let expected_tag = auth_tag(&envelope.ciphertext, key);
    if expected_tag != envelope.auth_tag {
        return Err(SecurityError::Authentication);
    }

    let iv = hex::decode(&envelope.iv)
        .map_err(|e| SecurityError::Encoding(format!("invalid iv: {}", e)))?;
    let mut bytes = BASE64
        .decode(&envelope.ciphertext)
        .map_err(|e| SecurityError::Encoding(format!("invalid ciphertext: {}", e)))?;

    xor_stream(&mut bytes, &combined_key(key, &iv));
    let payload: InnerPayload = serde_json::from_slice(&bytes)?;

    let age_ms = chrono::Utc::now().timestamp_millis() - payload.timestamp;
    if age_ms > STALENESS_WINDOW_MS {
        tracing::warn!(age_ms, "Decrypted a stale message payload");
    }

    Ok(payload.message)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let key = [42u8; 32];
        let envelope = encrypt_message("hello, grid", &key, None, "key-1").expect("encrypt");

        assert_eq!(envelope.key_id, "key-1");
        let plaintext = decrypt_message(&envelope, &key).expect("decrypt");
        assert_eq!(plaintext, "hello, grid");
    }

    #[test]
    fn session_key_takes_precedence() {
        let recipient_key = [1u8; 32];
        let session_key = [2u8; 32];
        let envelope =
            encrypt_message("secret", &recipient_key, Some(&session_key), "key-1").expect("encrypt");

        assert_eq!(
            decrypt_message(&envelope, &session_key).expect("decrypt"),
            "secret"
        );
        assert!(matches!(
            decrypt_message(&envelope, &recipient_key),
            Err(SecurityError::Authentication)
        ));
    }

    #[test]
    fn tampered_ciphertext_fails_authentication() {
        let key = [7u8; 32];
        let mut envelope = encrypt_message("payload", &key, None, "key-1").expect("encrypt");

        // Flip one character of the base64 ciphertext.
        let mut chars: Vec<char> = envelope.ciphertext.chars().collect();
        chars[0] = if chars[0] == 'A' { 'B' } else { 'A' };
        envelope.ciphertext = chars.into_iter().collect();

        assert!(matches!(
            decrypt_message(&envelope, &key),
            Err(SecurityError::Authentication)
        ));
    }

    #[test]
    fn wrong_key_fails_authentication() {
        let envelope = encrypt_message("payload", &[3u8; 32], None, "key-1").expect("encrypt");

        assert!(matches!(
            decrypt_message(&envelope, &[4u8; 32]),
            Err(SecurityError::Authentication)
        ));
    }

    #[test]
    fn stale_payload_still_decrypts() {
        let key = [9u8; 32];
        let an_hour_ago = chrono::Utc::now().timestamp_millis() - 3_600_000;
        let envelope =
            encrypt_message_at("old news", &key, None, "key-1", an_hour_ago).expect("encrypt");

        assert_eq!(decrypt_message(&envelope, &key).expect("decrypt"), "old news");
    }

    #[test]
    fn envelopes_are_nondeterministic() {
        let key = [5u8; 32];
        let a = encrypt_message("same text", &key, None, "key-1").expect("encrypt");
        let b = encrypt_message("same text", &key, None, "key-1").expect("encrypt");

        // Fresh IV and nonce per envelope.
        assert_ne!(a.iv, b.iv);
        assert_ne!(a.ciphertext, b.ciphertext);
    }
}
