//! SHA-256 content digest, independent of any key.

use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use super::DIGEST_LEN;
use crate::error::{Error, Result};

/// Incremental digest over plaintext fed in chunks.
#[derive(Clone, Default)]
pub struct Digester {
    hasher: Sha256,
}

impl Digester {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, data: &[u8]) {
        self.hasher.update(data);
    }

    pub fn finalize(self) -> [u8; DIGEST_LEN] {
        self.hasher.finalize().into()
    }
}

pub fn digest(data: &[u8]) -> [u8; DIGEST_LEN] {
    Sha256::digest(data).into()
}

/// Constant-time check of `data` against `expected`.
pub fn verify(data: &[u8], expected: &[u8; DIGEST_LEN]) -> bool {
    digests_match(&digest(data), expected)
}

pub fn digests_match(actual: &[u8; DIGEST_LEN], expected: &[u8; DIGEST_LEN]) -> bool {
    actual[..].ct_eq(&expected[..]).into()
}

/// Format a digest as lowercase hex (64 chars)
pub fn to_hex(digest: &[u8; DIGEST_LEN]) -> String {
    hex::encode(digest)
}

/// Parse a 64-char hex string into a digest
pub fn from_hex(s: &str) -> Result<[u8; DIGEST_LEN]> {
    let bytes = hex::decode(s.trim())
        .map_err(|e| Error::InvalidParameter(format!("invalid digest hex: {e}")))?;
    bytes
        .try_into()
        .map_err(|_| Error::InvalidParameter("digest must be 32 bytes".into()))
}
