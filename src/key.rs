//! In-memory key material and the key sources an operation can draw on.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::crypto::{KEY_LEN, KdfAlgorithm, KdfParams, SALT_LEN};
use crate::error::{Error, Result};

/// Where a key came from. Recorded in the container as the origin flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyOrigin {
    RandomlyGenerated,
    PasswordDerived,
    LoadedFromFile,
}

impl KeyOrigin {
    pub fn flag(&self) -> u8 {
        match self {
            KeyOrigin::RandomlyGenerated => 0,
            KeyOrigin::PasswordDerived => 1,
            KeyOrigin::LoadedFromFile => 2,
        }
    }

    pub fn from_flag(flag: u8) -> Option<Self> {
        match flag {
            0 => Some(KeyOrigin::RandomlyGenerated),
            1 => Some(KeyOrigin::PasswordDerived),
            2 => Some(KeyOrigin::LoadedFromFile),
            _ => None,
        }
    }
}

impl fmt::Display for KeyOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyOrigin::RandomlyGenerated => write!(f, "random"),
            KeyOrigin::PasswordDerived => write!(f, "password-derived"),
            KeyOrigin::LoadedFromFile => write!(f, "loaded from key file"),
        }
    }
}

/// Parameters a password-derived key was stretched with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DerivationParams {
    salt: [u8; SALT_LEN],
    kdf: KdfParams,
}

impl DerivationParams {
    pub fn new(salt: [u8; SALT_LEN], kdf: KdfParams) -> Self {
        Self { salt, kdf }
    }

    pub fn salt(&self) -> &[u8; SALT_LEN] {
        &self.salt
    }

    pub fn kdf(&self) -> &KdfParams {
        &self.kdf
    }

    pub fn iterations(&self) -> u32 {
        self.kdf.time_cost()
    }

    pub fn algorithm(&self) -> KdfAlgorithm {
        self.kdf.algorithm()
    }
}

/// A 256-bit symmetric key. Zeroized on drop.
///
/// Derivation parameters are present exactly when the origin is
/// [`KeyOrigin::PasswordDerived`].
#[derive(Clone)]
pub struct KeyMaterial {
    bytes: Zeroizing<[u8; KEY_LEN]>,
    origin: KeyOrigin,
    derivation: Option<DerivationParams>,
}

impl KeyMaterial {
    pub fn random(bytes: Zeroizing<[u8; KEY_LEN]>) -> Self {
        Self {
            bytes,
            origin: KeyOrigin::RandomlyGenerated,
            derivation: None,
        }
    }

    pub fn derived(bytes: Zeroizing<[u8; KEY_LEN]>, params: DerivationParams) -> Self {
        Self {
            bytes,
            origin: KeyOrigin::PasswordDerived,
            derivation: Some(params),
        }
    }

    pub fn loaded(bytes: Zeroizing<[u8; KEY_LEN]>) -> Self {
        Self {
            bytes,
            origin: KeyOrigin::LoadedFromFile,
            derivation: None,
        }
    }

    /// Builds a key from an untrusted slice, rejecting anything but 32 bytes.
    pub fn from_slice(bytes: &[u8], origin: KeyOrigin) -> Result<Self> {
        if origin == KeyOrigin::PasswordDerived {
            return Err(Error::InvalidParameter(
                "password-derived keys need derivation parameters".into(),
            ));
        }
        if bytes.len() != KEY_LEN {
            return Err(Error::InvalidKeyLength(bytes.len()));
        }
        let mut buf = Zeroizing::new([0u8; KEY_LEN]);
        buf.copy_from_slice(bytes);

        let mut key = Self::loaded(buf);
        key.origin = origin;
        Ok(key)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.bytes
    }

    pub fn origin(&self) -> KeyOrigin {
        self.origin
    }

    pub fn derivation(&self) -> Option<&DerivationParams> {
        self.derivation.as_ref()
    }

    pub fn salt(&self) -> Option<&[u8; SALT_LEN]> {
        self.derivation.as_ref().map(|d| d.salt())
    }
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("bytes", &"[REDACTED]")
            .field("origin", &self.origin)
            .field("derivation", &self.derivation)
            .finish()
    }
}

/// How an operation obtains its key. Passed explicitly into every call.
pub enum KeySource {
    /// Fresh random key; encryption only.
    Generate,
    /// Derive from a password, with a new salt on encrypt or the container's
    /// salt on decrypt.
    Password(Zeroizing<String>),
    Key(KeyMaterial),
    /// Read a key file from disk, unwrapping it with `password` if protected.
    KeyFile {
        path: PathBuf,
        password: Option<Zeroizing<String>>,
    },
}

impl KeySource {
    pub fn password(password: impl Into<String>) -> Self {
        KeySource::Password(Zeroizing::new(password.into()))
    }

    pub(crate) fn describe(&self) -> &'static str {
        match self {
            KeySource::Generate => "generate",
            KeySource::Password(_) => "password",
            KeySource::Key(_) => "key",
            KeySource::KeyFile { .. } => "key-file",
        }
    }
}

impl fmt::Debug for KeySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeySource::KeyFile { path, password } => f
                .debug_struct("KeyFile")
                .field("path", path)
                .field("protected", &password.is_some())
                .finish(),
            other => f.write_str(other.describe()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_slice_rejects_wrong_length() {
        let err = KeyMaterial::from_slice(&[0u8; 31], KeyOrigin::LoadedFromFile).unwrap_err();
        assert!(matches!(err, Error::InvalidKeyLength(31)));
        assert!(KeyMaterial::from_slice(&[0u8; 33], KeyOrigin::RandomlyGenerated).is_err());
    }

    #[test]
    fn from_slice_copies_exact_bytes() {
        let raw: Vec<u8> = (0..32).collect();
        let key = KeyMaterial::from_slice(&raw, KeyOrigin::LoadedFromFile).unwrap();
        assert_eq!(&key.as_bytes()[..], &raw[..]);
    }

    #[test]
    fn from_slice_keeps_origin() {
        let key = KeyMaterial::from_slice(&[1u8; 32], KeyOrigin::RandomlyGenerated).unwrap();
        assert_eq!(key.origin(), KeyOrigin::RandomlyGenerated);
        assert!(key.derivation().is_none());
    }

    #[test]
    fn derived_keys_carry_params() {
        let params = DerivationParams::new([3u8; 16], KdfParams::default());
        let key = KeyMaterial::derived(Zeroizing::new([0u8; 32]), params);
        assert_eq!(key.origin(), KeyOrigin::PasswordDerived);
        assert_eq!(key.salt(), Some(&[3u8; 16]));
        assert_eq!(key.derivation().unwrap().iterations(), 3);
    }

    #[test]
    fn origin_flags_roundtrip() {
        for origin in [
            KeyOrigin::RandomlyGenerated,
            KeyOrigin::PasswordDerived,
            KeyOrigin::LoadedFromFile,
        ] {
            assert_eq!(KeyOrigin::from_flag(origin.flag()), Some(origin));
        }
        assert_eq!(KeyOrigin::from_flag(3), None);
    }

    #[test]
    fn debug_redacts_key_bytes() {
        let key = KeyMaterial::random(Zeroizing::new([0xAB; 32]));
        let dbg = format!("{key:?}");
        assert!(dbg.contains("REDACTED"));
        assert!(!dbg.contains("171"));

        let source = KeySource::password("hunter2");
        assert!(!format!("{source:?}").contains("hunter2"));
    }
}
