use thiserror::Error;

/// Errors produced by the encryption core.
///
/// Cryptographic failures are final for a given set of inputs. Only `Io`
/// may be worth retrying, and retrying is left to the caller.
#[derive(Debug, Error)]
pub enum Error {
    /// The container bytes are structurally invalid.
    #[error("malformed container: {0}")]
    MalformedContainer(String),

    /// The AEAD tag did not verify: wrong key or tampered data.
    #[error("authentication failed: wrong key or corrupted data")]
    AuthenticationFailed,

    /// The plaintext digest did not match after successful authentication.
    #[error("content digest mismatch after successful authentication")]
    DigestMismatch,

    /// A password-protected key file could not be unwrapped.
    #[error("wrong password for key file")]
    WrongPassword,

    #[error("password must not be empty")]
    WeakPassword,

    /// The key source cannot supply a key for this operation.
    #[error("missing key: {0}")]
    MissingKey(String),

    #[error("malformed key file: {0}")]
    MalformedKeyFile(String),

    #[error("invalid key length: expected 32 bytes, got {0}")]
    InvalidKeyLength(usize),

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("OS random generator unavailable")]
    Random,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_never_mentions_key_bytes() {
        let err = Error::InvalidKeyLength(16);
        assert_eq!(
            err.to_string(),
            "invalid key length: expected 32 bytes, got 16"
        );
    }

    #[test]
    fn io_errors_convert() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: Error = io.into();
        assert!(matches!(err, Error::Io(_)));
    }
}
