//! Crypto subsystem: cipher registry, key material, key derivation.
//!
//! All block encryption is authenticated (AEAD); the cipher is chosen by
//! name at filesystem creation, persisted in the config, and never changes
//! for the lifetime of a filesystem. Legacy CFB suites exist for old
//! filesystems only and carry no authentication tag; the integrity layer
//! above still validates those blocks' envelopes.

pub mod cipher;
pub mod kdf;
pub mod key;

pub use cipher::CipherSuite;
pub use kdf::ScryptSettings;
pub use key::EncryptionKey;
