//! Chunked ChaCha20-Poly1305 (RFC 8439).
//!
//! The keystream and the Poly1305 authenticator are driven incrementally so
//! arbitrarily large payloads can be processed in fixed-size chunks, while
//! the output stays byte-identical to a one-shot AEAD call over the whole
//! payload: one nonce, one tag, ciphertext length equal to plaintext length.
//!
//! Decryption is split in two types. [`Authenticator`] consumes the entire
//! ciphertext and only hands out a [`Decryptor`] once the tag verifies, so
//! no plaintext can exist before authentication.

use chacha20::ChaCha20;
use chacha20::cipher::{KeyIvInit, StreamCipher, StreamCipherSeek};
use poly1305::Poly1305;
use poly1305::universal_hash::{KeyInit, UniversalHash};
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

use super::{DEFAULT_CHUNK_SIZE, KEY_LEN, MAX_PAYLOAD_LEN, NONCE_LEN, SALT_LEN, TAG_LEN};
use crate::error::{Error, Result};
use crate::key::KeyMaterial;

const POLY_BLOCK: usize = 16;
const CHACHA_BLOCK: u64 = 64;

/// Fill buffer with cryptographically secure random bytes
pub(crate) fn secure_random(buf: &mut [u8]) -> Result<()> {
    getrandom::fill(buf).map_err(|_| Error::Random)
}

/// Generate salt
pub fn generate_salt() -> Result<[u8; SALT_LEN]> {
    let mut salt = [0u8; SALT_LEN];
    secure_random(&mut salt)?;
    Ok(salt)
}

/// Generate a fresh random nonce. Called once per encryption.
pub fn generate_nonce() -> Result<[u8; NONCE_LEN]> {
    let mut nonce = [0u8; NONCE_LEN];
    secure_random(&mut nonce)?;
    Ok(nonce)
}

fn keystream(key: &KeyMaterial, nonce: &[u8; NONCE_LEN]) -> ChaCha20 {
    ChaCha20::new(
        chacha20::Key::from_slice(key.as_bytes()),
        chacha20::Nonce::from_slice(nonce),
    )
}

pub(crate) fn check_payload_len(len: u64) -> Result<()> {
    if len > MAX_PAYLOAD_LEN {
        return Err(Error::InvalidParameter(format!(
            "payload of {len} bytes exceeds the single-nonce limit of {MAX_PAYLOAD_LEN} bytes"
        )));
    }
    Ok(())
}

/// Poly1305 over `aad || pad16 || ciphertext || pad16 || len(aad) || len(ct)`,
/// fed with arbitrarily sized ciphertext pieces.
struct Mac {
    poly: Poly1305,
    tail: [u8; POLY_BLOCK],
    tail_len: usize,
    aad_len: u64,
    ct_len: u64,
}

impl Mac {
    /// Takes the one-time key from keystream block 0 and leaves the cipher
    /// positioned at block 1, where payload encryption starts.
    fn new(cipher: &mut ChaCha20, aad: &[u8]) -> Self {
        let mut mac_key = Zeroizing::new([0u8; KEY_LEN]);
        cipher.apply_keystream(&mut mac_key[..]);
        cipher.seek(CHACHA_BLOCK);

        let mut poly = Poly1305::new(poly1305::Key::from_slice(&mac_key[..]));
        poly.update_padded(aad);

        Self {
            poly,
            tail: [0u8; POLY_BLOCK],
            tail_len: 0,
            aad_len: aad.len() as u64,
            ct_len: 0,
        }
    }

    fn update(&mut self, mut data: &[u8]) {
        self.ct_len += data.len() as u64;

        if self.tail_len > 0 {
            let take = (POLY_BLOCK - self.tail_len).min(data.len());
            self.tail[self.tail_len..self.tail_len + take].copy_from_slice(&data[..take]);
            self.tail_len += take;
            data = &data[take..];

            if self.tail_len < POLY_BLOCK {
                return;
            }
            self.poly.update_padded(&self.tail);
            self.tail_len = 0;
        }

        // whole blocks only, so no padding is inserted mid-stream
        let whole = data.len() - data.len() % POLY_BLOCK;
        self.poly.update_padded(&data[..whole]);

        let rest = &data[whole..];
        self.tail[..rest.len()].copy_from_slice(rest);
        self.tail_len = rest.len();
    }

    fn finalize(mut self) -> [u8; TAG_LEN] {
        self.poly.update_padded(&self.tail[..self.tail_len]);

        let mut lengths = [0u8; POLY_BLOCK];
        lengths[..8].copy_from_slice(&self.aad_len.to_le_bytes());
        lengths[8..].copy_from_slice(&self.ct_len.to_le_bytes());
        self.poly.update_padded(&lengths);

        let mut tag = [0u8; TAG_LEN];
        tag.copy_from_slice(&self.poly.finalize());
        tag
    }
}

/// Encrypts one message chunk by chunk.
pub struct Encryptor {
    cipher: ChaCha20,
    mac: Mac,
}

impl Encryptor {
    pub fn new(key: &KeyMaterial, nonce: &[u8; NONCE_LEN], aad: &[u8]) -> Self {
        let mut cipher = keystream(key, nonce);
        let mac = Mac::new(&mut cipher, aad);
        Self { cipher, mac }
    }

    /// Encrypts `chunk` in place.
    pub fn encrypt_chunk(&mut self, chunk: &mut [u8]) -> Result<()> {
        self.cipher
            .try_apply_keystream(chunk)
            .map_err(|_| Error::InvalidParameter("payload exceeds keystream limit".into()))?;
        self.mac.update(chunk);
        Ok(())
    }

    pub fn finalize(self) -> [u8; TAG_LEN] {
        self.mac.finalize()
    }
}

/// First decryption pass: checks the tag over the whole ciphertext.
pub struct Authenticator {
    cipher: ChaCha20,
    mac: Mac,
}

impl Authenticator {
    pub fn new(key: &KeyMaterial, nonce: &[u8; NONCE_LEN], aad: &[u8]) -> Self {
        let mut cipher = keystream(key, nonce);
        let mac = Mac::new(&mut cipher, aad);
        Self { cipher, mac }
    }

    pub fn update(&mut self, ciphertext: &[u8]) {
        self.mac.update(ciphertext);
    }

    /// Compares tags in constant time. The returned [`Decryptor`] is the only
    /// way to obtain plaintext.
    pub fn verify(self, tag: &[u8; TAG_LEN]) -> Result<Decryptor> {
        let computed = self.mac.finalize();
        if bool::from(computed[..].ct_eq(&tag[..])) {
            Ok(Decryptor {
                cipher: self.cipher,
            })
        } else {
            Err(Error::AuthenticationFailed)
        }
    }
}

/// Second decryption pass over ciphertext that already authenticated.
pub struct Decryptor {
    cipher: ChaCha20,
}

impl Decryptor {
    /// Decrypts `chunk` in place.
    pub fn decrypt_chunk(&mut self, chunk: &mut [u8]) -> Result<()> {
        self.cipher
            .try_apply_keystream(chunk)
            .map_err(|_| Error::InvalidParameter("payload exceeds keystream limit".into()))
    }
}

/// Encrypt plaintext under a fresh random nonce.
///
/// Returns `(nonce, ciphertext, tag)`; the ciphertext has the same length as
/// the plaintext.
pub fn encrypt(
    plaintext: &[u8],
    key: &KeyMaterial,
    aad: &[u8],
) -> Result<([u8; NONCE_LEN], Vec<u8>, [u8; TAG_LEN])> {
    check_payload_len(plaintext.len() as u64)?;

    let nonce = generate_nonce()?;
    let mut encryptor = Encryptor::new(key, &nonce, aad);

    let mut ciphertext = plaintext.to_vec();
    for chunk in ciphertext.chunks_mut(DEFAULT_CHUNK_SIZE) {
        encryptor.encrypt_chunk(chunk)?;
    }

    Ok((nonce, ciphertext, encryptor.finalize()))
}

/// Decrypt ciphertext, authenticating all of it before any plaintext is
/// produced.
pub fn decrypt(
    nonce: &[u8; NONCE_LEN],
    ciphertext: &[u8],
    tag: &[u8; TAG_LEN],
    key: &KeyMaterial,
    aad: &[u8],
) -> Result<Zeroizing<Vec<u8>>> {
    check_payload_len(ciphertext.len() as u64)?;

    let mut authenticator = Authenticator::new(key, nonce, aad);
    for chunk in ciphertext.chunks(DEFAULT_CHUNK_SIZE) {
        authenticator.update(chunk);
    }
    let mut decryptor = authenticator.verify(tag)?;

    let mut plaintext = Zeroizing::new(ciphertext.to_vec());
    for chunk in plaintext.chunks_mut(DEFAULT_CHUNK_SIZE) {
        decryptor.decrypt_chunk(chunk)?;
    }
    Ok(plaintext)
}
