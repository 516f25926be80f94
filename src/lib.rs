//! Authenticated file encryption.
//!
//! Files are sealed into a self-describing container: a versioned header,
//! a ChaCha20-Poly1305 ciphertext, and a trailer carrying the tag, a SHA-256
//! digest of the plaintext, and the original filename. Keys are random,
//! derived from a password with Argon2id, or loaded from a key file.
//!
//! [`EncryptionService`] is the entry point for front ends.

pub mod config;
pub mod crypto;
pub mod error;
pub mod format;
pub mod key;
pub mod keys;
pub mod service;
pub mod storage;

pub use crate::config::{Config, default_config_path};
pub use crate::crypto::KdfParams;
pub use crate::error::{Error, Result};
pub use crate::format::{EncryptedContainer, KeyRecord};
pub use crate::key::{KeyMaterial, KeyOrigin, KeySource};
pub use crate::keys::KeyManager;
pub use crate::service::{ContainerInfo, EncryptionService, Operation, Sealed, Summary};
pub use crate::storage::Storage;
