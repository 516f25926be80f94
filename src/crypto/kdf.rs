use argon2::{Algorithm, Argon2, Params, Version};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use super::{KEY_LEN, SALT_LEN};
use crate::error::{Error, Result};

/// Password hashing algorithm recorded alongside a derived key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KdfAlgorithm {
    Argon2id,
}

impl KdfAlgorithm {
    pub fn id(&self) -> u8 {
        match self {
            KdfAlgorithm::Argon2id => 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    mem_cost_kib: u32,
    time_cost: u32,
    parallelism: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            // default memory cost
            mem_cost_kib: 64 * 1024, // 64 MiB
            // default number of iterations
            time_cost: 3,
            // default number of threads
            parallelism: 1,
        }
    }
}

impl KdfParams {
    pub fn new(mem_cost_kib: u32, time_cost: u32, parallelism: u32) -> Result<Self> {
        let params = Self {
            mem_cost_kib,
            time_cost,
            parallelism,
        };
        params.validate()?;
        Ok(params)
    }

    pub fn mem_cost_kib(&self) -> u32 {
        self.mem_cost_kib
    }

    /// Argon2 iteration count.
    pub fn time_cost(&self) -> u32 {
        self.time_cost
    }

    pub fn parallelism(&self) -> u32 {
        self.parallelism
    }

    pub fn algorithm(&self) -> KdfAlgorithm {
        KdfAlgorithm::Argon2id
    }

    pub fn validate(&self) -> Result<()> {
        if self.mem_cost_kib < 8 {
            return Err(Error::InvalidParameter("argon2 memory cost too low".into()));
        }
        if self.time_cost < 1 {
            return Err(Error::InvalidParameter(
                "argon2 time cost must be >= 1".into(),
            ));
        }
        if self.parallelism < 1 {
            return Err(Error::InvalidParameter(
                "argon2 parallelism must be >= 1".into(),
            ));
        }
        if self.mem_cost_kib < 8 * self.parallelism {
            return Err(Error::InvalidParameter(
                "argon2 memory cost must be at least 8 * parallelism".into(),
            ));
        }
        Ok(())
    }
}

/// Stretch `password` into a 256-bit key with Argon2id.
///
/// Rejects an empty password with [`Error::WeakPassword`]; any other
/// password is accepted.
pub fn derive_key(
    password: &str,
    salt: &[u8; SALT_LEN],
    kdf: KdfParams,
) -> Result<Zeroizing<[u8; KEY_LEN]>> {
    if password.is_empty() {
        return Err(Error::WeakPassword);
    }
    kdf.validate()?;

    let params = Params::new(
        kdf.mem_cost_kib,
        kdf.time_cost,
        kdf.parallelism,
        Some(KEY_LEN),
    )
    .map_err(|e| Error::InvalidParameter(format!("failed to construct Argon2 params: {e}")))?;

    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

    let mut key = Zeroizing::new([0u8; KEY_LEN]);
    argon2
        .hash_password_into(password.as_bytes(), salt, &mut key[..])
        .map_err(|e| Error::InvalidParameter(format!("argon2 key derivation failed: {e}")))?;

    Ok(key)
}

#[cfg(test)]
pub(crate) fn test_params() -> KdfParams {
    KdfParams {
        mem_cost_kib: 64,
        time_cost: 1,
        parallelism: 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kdf_is_deterministic() {
        let salt = [42u8; 16];
        let kdf = test_params();

        let k1 = derive_key("password", &salt, kdf).unwrap();
        let k2 = derive_key("password", &salt, kdf).unwrap();

        assert_eq!(*k1, *k2);
    }

    #[test]
    fn kdf_salt_affects_output() {
        let kdf = test_params();

        let k1 = derive_key("pw", &[1u8; 16], kdf).unwrap();
        let k2 = derive_key("pw", &[2u8; 16], kdf).unwrap();

        assert_ne!(*k1, *k2);
    }

    #[test]
    fn kdf_params_affect_output() {
        let salt = [7u8; 16];

        let kdf1 = KdfParams::new(64, 1, 1).unwrap();
        let kdf2 = KdfParams::new(128, 1, 1).unwrap();

        let k1 = derive_key("pw", &salt, kdf1).unwrap();
        let k2 = derive_key("pw", &salt, kdf2).unwrap();

        assert_ne!(*k1, *k2);
    }

    #[test]
    fn empty_password_is_weak() {
        let err = derive_key("", &[0u8; 16], test_params()).unwrap_err();
        assert!(matches!(err, Error::WeakPassword));
    }

    #[test]
    fn kdf_invalid_params_fail_gracefully() {
        assert!(KdfParams::new(0, 0, 0).is_err());
        assert!(KdfParams::new(16, 1, 4).is_err());
    }

    #[test]
    fn default_params_are_valid() {
        let kdf = KdfParams::default();
        kdf.validate().unwrap();
        assert_eq!(kdf.algorithm(), KdfAlgorithm::Argon2id);
        assert_eq!(kdf.algorithm().id(), 1);
    }
}
