//! Error taxonomy for the secure-communications subsystem.
//!
//! Every failure surfaces as a typed [`SecurityError`] to the immediate
//! caller; nothing is retried internally, and a failure in one subsystem
//! never disables the others.
use thiserror::Error;

/// Errors produced by the secure-communications subsystem.
#[derive(Debug, Error)]
pub enum SecurityError {
    /// The envelope's authentication tag did not match the ciphertext and key.
    #[error("authentication tag mismatch: message may be tampered with")]
    Authentication,

    /// No private key is registered for the given user.
    #[error("no private key registered for user '{0}'")]
    KeyNotFound(String),

    /// A tunnel operation was attempted against a session that is not active.
    #[error("tunnel session '{0}' is not active")]
    TunnelInactive(String),

    /// A tunnel envelope could not be decoded or parsed.
    #[error("malformed tunnel data: {0}")]
    InvalidTunnelData(String),

    /// An operation was attempted while the relevant subsystem is disabled.
    #[error("operation unavailable: {0} is disabled by configuration")]
    Configuration(String),

    /// A hex or base64 envelope field could not be decoded.
    #[error("encoding error: {0}")]
    Encoding(String),

    /// JSON serialization or deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The secure random source failed to produce bytes.
    #[error("random source failure: {0}")]
    RandomSource(String),
}

/// Convenience result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, SecurityError>;
