//! Cryptographic primitives for the container core.
//!
//! Provides the chunked AEAD engine, password key derivation, and the
//! plaintext integrity digest.

pub mod aead;
pub mod digest;
pub mod kdf;

pub use aead::{Authenticator, Decryptor, Encryptor, decrypt, encrypt, generate_nonce, generate_salt};
pub use digest::{Digester, digest, verify};
pub use kdf::{KdfAlgorithm, KdfParams, derive_key};

/// Length of the KDF salt (16 bytes).
pub const SALT_LEN: usize = 16;
/// Length of the nonce (12 bytes for ChaCha20-Poly1305).
pub const NONCE_LEN: usize = 12;
/// Length of the encryption key (32 bytes / 256 bits).
pub const KEY_LEN: usize = 32;
/// Length of the Poly1305 authentication tag (16 bytes).
pub const TAG_LEN: usize = 16;
/// Length of the SHA-256 content digest (32 bytes).
pub const DIGEST_LEN: usize = 32;
/// Default plaintext chunk size for the streaming engine (64 KiB).
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;
/// Largest payload a single nonce can cover. Block 0 of the 32-bit ChaCha20
/// counter keys Poly1305 and the last counter value is unusable, leaving
/// `2^32 - 2` blocks for payload data.
pub const MAX_PAYLOAD_LEN: u64 = (u32::MAX as u64 - 1) * 64;
