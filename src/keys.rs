//! Key lifecycle: generation, password derivation, and key file
//! export/import.
//!
//! Nothing here touches the filesystem; callers persist [`KeyRecord`]s.

use chacha20poly1305::{
    ChaCha20Poly1305, Key, Nonce, Tag,
    aead::{AeadInPlace, KeyInit},
};
use tracing::{debug, warn};
use zeroize::Zeroizing;

use crate::crypto::{self, KEY_LEN, KdfParams, SALT_LEN, aead::secure_random};
use crate::error::{Error, Result};
use crate::format::KeyRecord;
use crate::format::keyfile::FLAG_WRAPPED;
use crate::key::{DerivationParams, KeyMaterial};

#[derive(Debug, Clone, Copy, Default)]
pub struct KeyManager {
    kdf: KdfParams,
}

impl KeyManager {
    pub fn new(kdf: KdfParams) -> Self {
        Self { kdf }
    }

    pub fn kdf(&self) -> &KdfParams {
        &self.kdf
    }

    /// Whether the KDF matches the Argon2 parameters format v1 assumes.
    /// Anything else must be supplied again to decrypt or unwrap.
    pub fn uses_pinned_kdf(&self) -> bool {
        self.kdf == KdfParams::default()
    }

    fn warn_unpinned(&self, what: &str) {
        if !self.uses_pinned_kdf() {
            warn!(
                mem_kib = self.kdf.mem_cost_kib(),
                iterations = self.kdf.time_cost(),
                parallelism = self.kdf.parallelism(),
                "{what} uses non-default Argon2 parameters; the same parameters are required to decrypt"
            );
        }
    }

    /// Logs why a correct password may still fail to authenticate.
    pub(crate) fn hint_unpinned(&self) {
        if !self.uses_pinned_kdf() {
            warn!(
                mem_kib = self.kdf.mem_cost_kib(),
                iterations = self.kdf.time_cost(),
                parallelism = self.kdf.parallelism(),
                "authentication failed with non-default Argon2 parameters; a correct password only works with the parameters used to encrypt"
            );
        }
    }

    /// Fresh 256-bit key from the OS CSPRNG.
    pub fn generate_random_key(&self) -> Result<KeyMaterial> {
        let mut bytes = Zeroizing::new([0u8; KEY_LEN]);
        secure_random(&mut bytes[..])?;
        Ok(KeyMaterial::random(bytes))
    }

    /// Derives a key from `password`.
    ///
    /// Without a salt a new random one is generated (encryption); with a
    /// salt the derivation is reproduced (decryption).
    pub fn derive_key_from_password(
        &self,
        password: &str,
        salt: Option<&[u8; SALT_LEN]>,
    ) -> Result<KeyMaterial> {
        let salt = match salt {
            Some(salt) => *salt,
            None => {
                self.warn_unpinned("password-derived key");
                crypto::generate_salt()?
            }
        };
        let bytes = crypto::derive_key(password, &salt, self.kdf)?;
        debug!(
            mem_kib = self.kdf.mem_cost_kib(),
            iterations = self.kdf.time_cost(),
            "derived key from password"
        );
        Ok(KeyMaterial::derived(
            bytes,
            DerivationParams::new(salt, self.kdf),
        ))
    }

    /// Builds a key file record, wrapping the key under `password` if given.
    pub fn export_key_file(&self, key: &KeyMaterial, password: Option<&str>) -> Result<KeyRecord> {
        let Some(password) = password else {
            return Ok(KeyRecord::Plain {
                key: key_copy(key.as_bytes()),
            });
        };

        self.warn_unpinned("protected key file");
        let salt = crypto::generate_salt()?;
        let nonce = crypto::generate_nonce()?;
        let wrapping_key = crypto::derive_key(password, &salt, self.kdf)?;

        let mut wrapped_key = key_copy(key.as_bytes());
        let tag = wrapping_cipher(&wrapping_key)
            .encrypt_in_place_detached(
                Nonce::from_slice(&nonce),
                &wrap_aad(&salt),
                &mut wrapped_key[..],
            )
            .map_err(|_| Error::InvalidParameter("key wrapping failed".into()))?;

        let mut tag_bytes = [0u8; crypto::TAG_LEN];
        tag_bytes.copy_from_slice(&tag);

        Ok(KeyRecord::Wrapped {
            salt,
            nonce,
            tag: tag_bytes,
            wrapped_key: *wrapped_key,
        })
    }

    /// Recovers the key stored in `record`.
    ///
    /// # Errors
    ///
    /// - [`Error::MissingKey`] if the record is protected and no password was given
    /// - [`Error::WrongPassword`] if unwrapping fails authentication
    pub fn import_key_file(&self, record: &KeyRecord, password: Option<&str>) -> Result<KeyMaterial> {
        match record {
            KeyRecord::Plain { key } => {
                if password.is_some() {
                    warn!("key file is not password-protected; ignoring supplied password");
                }
                Ok(KeyMaterial::loaded(key.clone()))
            }
            KeyRecord::Wrapped {
                salt,
                nonce,
                tag,
                wrapped_key,
            } => {
                let password = password.ok_or_else(|| {
                    Error::MissingKey("key file is password-protected".into())
                })?;
                let wrapping_key = crypto::derive_key(password, salt, self.kdf)?;

                let mut key = key_copy(wrapped_key);
                wrapping_cipher(&wrapping_key)
                    .decrypt_in_place_detached(
                        Nonce::from_slice(nonce),
                        &wrap_aad(salt),
                        &mut key[..],
                        Tag::from_slice(tag),
                    )
                    .map_err(|_| {
                        self.hint_unpinned();
                        Error::WrongPassword
                    })?;

                Ok(KeyMaterial::loaded(key))
            }
        }
    }
}

/// Copies key bytes straight into a buffer that is wiped on drop.
fn key_copy(bytes: &[u8; KEY_LEN]) -> Zeroizing<[u8; KEY_LEN]> {
    let mut buf = Zeroizing::new([0u8; KEY_LEN]);
    buf.copy_from_slice(bytes);
    buf
}

fn wrapping_cipher(key: &[u8; KEY_LEN]) -> ChaCha20Poly1305 {
    ChaCha20Poly1305::new(Key::from_slice(key))
}

fn wrap_aad(salt: &[u8; SALT_LEN]) -> Vec<u8> {
    let mut aad = Vec::with_capacity(1 + SALT_LEN);
    aad.push(FLAG_WRAPPED);
    aad.extend_from_slice(salt);
    aad
}
