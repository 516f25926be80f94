//! Exportable key file format.
//!
//! ```text
//! WRAPPED_FLAG (1) | SALT (16)? | NONCE (12)? | TAG (16)? | KEY_OR_WRAPPED_KEY (32)
//! ```
//!
//! Salt, nonce and tag are present iff `WRAPPED_FLAG == 1`, so a reader can
//! tell from the first byte whether a password is needed.

use zeroize::Zeroizing;

use crate::crypto::{KEY_LEN, NONCE_LEN, SALT_LEN, TAG_LEN};
use crate::error::{Error, Result};

pub const FLAG_PLAIN: u8 = 0;
pub const FLAG_WRAPPED: u8 = 1;

pub const PLAIN_LEN: usize = 1 + KEY_LEN;
pub const WRAPPED_LEN: usize = 1 + SALT_LEN + NONCE_LEN + TAG_LEN + KEY_LEN;

/// A parsed key file.
#[derive(Clone, PartialEq, Eq)]
pub enum KeyRecord {
    /// Raw key bytes, unprotected.
    Plain { key: Zeroizing<[u8; KEY_LEN]> },
    /// Key encrypted under a password-derived wrapping key.
    Wrapped {
        salt: [u8; SALT_LEN],
        nonce: [u8; NONCE_LEN],
        tag: [u8; TAG_LEN],
        wrapped_key: [u8; KEY_LEN],
    },
}

impl KeyRecord {
    pub fn is_protected(&self) -> bool {
        matches!(self, KeyRecord::Wrapped { .. })
    }

    pub fn to_bytes(&self) -> Zeroizing<Vec<u8>> {
        match self {
            KeyRecord::Plain { key } => {
                let mut buf = Zeroizing::new(Vec::with_capacity(PLAIN_LEN));
                buf.push(FLAG_PLAIN);
                buf.extend_from_slice(&key[..]);
                buf
            }
            KeyRecord::Wrapped {
                salt,
                nonce,
                tag,
                wrapped_key,
            } => {
                let mut buf = Zeroizing::new(Vec::with_capacity(WRAPPED_LEN));
                buf.push(FLAG_WRAPPED);
                buf.extend_from_slice(salt);
                buf.extend_from_slice(nonce);
                buf.extend_from_slice(tag);
                buf.extend_from_slice(wrapped_key);
                buf
            }
        }
    }

    /// Parses a key file, requiring the exact length its flag implies.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let Some((&flag, body)) = data.split_first() else {
            return Err(Error::MalformedKeyFile("empty key file".into()));
        };

        match flag {
            FLAG_PLAIN => {
                if data.len() != PLAIN_LEN {
                    return Err(Error::MalformedKeyFile(format!(
                        "unprotected key file must be {PLAIN_LEN} bytes, got {}",
                        data.len()
                    )));
                }
                let mut key = Zeroizing::new([0u8; KEY_LEN]);
                key.copy_from_slice(body);
                Ok(KeyRecord::Plain { key })
            }
            FLAG_WRAPPED => {
                if data.len() != WRAPPED_LEN {
                    return Err(Error::MalformedKeyFile(format!(
                        "protected key file must be {WRAPPED_LEN} bytes, got {}",
                        data.len()
                    )));
                }
                let (salt, rest) = body.split_at(SALT_LEN);
                let (nonce, rest) = rest.split_at(NONCE_LEN);
                let (tag, wrapped_key) = rest.split_at(TAG_LEN);

                Ok(KeyRecord::Wrapped {
                    salt: salt.try_into().map_err(|_| truncated("salt"))?,
                    nonce: nonce.try_into().map_err(|_| truncated("nonce"))?,
                    tag: tag.try_into().map_err(|_| truncated("tag"))?,
                    wrapped_key: wrapped_key.try_into().map_err(|_| truncated("key"))?,
                })
            }
            other => Err(Error::MalformedKeyFile(format!(
                "unknown wrapped flag: {other}"
            ))),
        }
    }
}

fn truncated(field: &str) -> Error {
    Error::MalformedKeyFile(format!("truncated {field}"))
}

impl std::fmt::Debug for KeyRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyRecord")
            .field("protected", &self.is_protected())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_record_layout() {
        let record = KeyRecord::Plain {
            key: Zeroizing::new([9u8; KEY_LEN]),
        };
        let bytes = record.to_bytes();

        assert_eq!(bytes.len(), PLAIN_LEN);
        assert_eq!(bytes[0], FLAG_PLAIN);
        assert_eq!(KeyRecord::from_bytes(&bytes).unwrap(), record);
    }

    #[test]
    fn wrapped_record_layout() {
        let record = KeyRecord::Wrapped {
            salt: [1u8; SALT_LEN],
            nonce: [2u8; NONCE_LEN],
            tag: [3u8; TAG_LEN],
            wrapped_key: [4u8; KEY_LEN],
        };
        let bytes = record.to_bytes();

        assert_eq!(bytes.len(), WRAPPED_LEN);
        assert_eq!(bytes[0], FLAG_WRAPPED);
        assert_eq!(&bytes[1..17], &[1u8; 16]);
        assert_eq!(&bytes[17..29], &[2u8; 12]);
        assert_eq!(&bytes[29..45], &[3u8; 16]);
        assert_eq!(&bytes[45..], &[4u8; 32]);

        let parsed = KeyRecord::from_bytes(&bytes).unwrap();
        assert!(parsed.is_protected());
        assert_eq!(parsed, record);
    }

    #[test]
    fn malformed_records_fail() {
        assert!(matches!(KeyRecord::from_bytes(&[]), Err(Error::MalformedKeyFile(_))));
        assert!(matches!(KeyRecord::from_bytes(&[0u8; 10]), Err(Error::MalformedKeyFile(_))));
        assert!(matches!(KeyRecord::from_bytes(&[1u8; PLAIN_LEN]), Err(Error::MalformedKeyFile(_))));
        assert!(matches!(KeyRecord::from_bytes(&[0u8; WRAPPED_LEN]), Err(Error::MalformedKeyFile(_))));

        let mut bad_flag = vec![0u8; PLAIN_LEN];
        bad_flag[0] = 5;
        assert!(matches!(KeyRecord::from_bytes(&bad_flag), Err(Error::MalformedKeyFile(_))));
    }
}
