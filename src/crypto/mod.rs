//! Cryptographic building blocks: key material management and message
//! envelope encryption.
pub mod cipher;
pub mod keyring;

pub use cipher::{decrypt_message, encrypt_message, EncryptedEnvelope};
pub use keyring::{KeyPair, Keyring};
