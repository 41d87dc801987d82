//! Secure-communications subsystem for a social app.
//!
//! This crate manages per-user key material, encrypts and decrypts message
//! envelopes with tamper detection, obfuscates geographic coordinates before
//! they leave the device, and manages simulated tunnel sessions through
//! which outbound requests are wrapped. Application code talks to one
//! [`SecureGrid`] instance; the subsystems behind it stay independent, so a
//! tunnel failure never disables encryption or masking.
//!
//! Not a certified cryptographic library: the message cipher is a documented
//! keyed-XOR construction (see [`crypto::cipher`]), the "public key" is
//! digest-derived rather than a real asymmetric key, and tunnel/proxy
//! behavior is simulated in-process with no real network transport. Nothing
//! is persisted; all key material lives in memory for the life of the
//! instance.
pub mod config;
pub mod crypto;
pub mod error;
pub mod location;
pub mod orchestrator;
pub mod tunnel;

pub use config::{
    ConfigUpdate, EncryptionConfig, LocationConfig, ObfuscationLevel, SecureGridConfig,
    TunnelConfig, TunnelProtocol,
};
pub use crypto::{EncryptedEnvelope, KeyPair, Keyring};
pub use error::{Result, SecurityError};
pub use location::{MaskedLocation, ProxiedRequest};
pub use orchestrator::{SecureGrid, SecureRequestOutcome, SecurityStatus};
pub use tunnel::{TunnelSession, TunnelSessionManager, TunnelStatus};
