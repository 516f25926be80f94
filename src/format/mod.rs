//! Container format handling.
//!
//! Provides version-aware parsing and serialization of the encrypted
//! container, plus streaming readers for the header and trailer so large
//! containers can be validated without loading the ciphertext.

use std::io::Read;

use crate::crypto::{DIGEST_LEN, NONCE_LEN, SALT_LEN, TAG_LEN};
use crate::error::{Error, Result};
use crate::key::KeyOrigin;

pub mod keyfile;
pub mod v1;

pub use keyfile::KeyRecord;

/// Latest format version
pub const CURRENT_VERSION: u8 = v1::VERSION_V1;

/// Fixed part of the container header: everything a reader must see before
/// the ciphertext.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerHeader {
    version: u8,
    origin: KeyOrigin,
    salt: Option<[u8; SALT_LEN]>,
    nonce: [u8; NONCE_LEN],
    plaintext_length: u64,
}

impl ContainerHeader {
    /// Creates a current-version header. The salt must be present exactly
    /// when the key was password-derived.
    pub fn new(
        origin: KeyOrigin,
        salt: Option<[u8; SALT_LEN]>,
        nonce: [u8; NONCE_LEN],
        plaintext_length: u64,
    ) -> Result<Self> {
        if salt.is_some() != (origin == KeyOrigin::PasswordDerived) {
            return Err(Error::InvalidParameter(
                "salt must be present iff the key is password-derived".into(),
            ));
        }
        Ok(Self {
            version: CURRENT_VERSION,
            origin,
            salt,
            nonce,
            plaintext_length,
        })
    }

    pub fn version(&self) -> u8 {
        self.version
    }

    pub fn origin(&self) -> KeyOrigin {
        self.origin
    }

    pub fn salt(&self) -> Option<&[u8; SALT_LEN]> {
        self.salt.as_ref()
    }

    pub fn nonce(&self) -> &[u8; NONCE_LEN] {
        &self.nonce
    }

    pub fn plaintext_length(&self) -> u64 {
        self.plaintext_length
    }

    /// Serialized size of this header in bytes.
    pub fn encoded_len(&self) -> usize {
        v1::header_len(self.origin)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        v1::encode_header(self)
    }

    /// AEAD associated data for a container with this header.
    ///
    /// Fails with [`Error::InvalidParameter`] if the filename is empty or
    /// longer than the format can encode.
    pub fn associated_data(&self, original_filename: Option<&str>) -> Result<Vec<u8>> {
        associated_data(
            self.origin,
            self.salt.as_ref(),
            self.plaintext_length,
            original_filename,
        )
    }
}

/// Everything stored after the ciphertext.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Trailer {
    tag: [u8; TAG_LEN],
    content_digest: [u8; DIGEST_LEN],
    original_filename: Option<String>,
}

impl Trailer {
    pub fn new(
        tag: [u8; TAG_LEN],
        content_digest: [u8; DIGEST_LEN],
        original_filename: Option<String>,
    ) -> Result<Self> {
        if let Some(name) = &original_filename {
            v1::check_filename(name)?;
        }
        Ok(Self {
            tag,
            content_digest,
            original_filename,
        })
    }

    pub fn tag(&self) -> &[u8; TAG_LEN] {
        &self.tag
    }

    pub fn content_digest(&self) -> &[u8; DIGEST_LEN] {
        &self.content_digest
    }

    pub fn original_filename(&self) -> Option<&str> {
        self.original_filename.as_deref()
    }

    pub fn encoded_len(&self) -> usize {
        v1::trailer_len(self.original_filename())
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        v1::encode_trailer(self)
    }
}

/// A complete, immutable encrypted artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedContainer {
    header: ContainerHeader,
    ciphertext: Vec<u8>,
    trailer: Trailer,
}

impl EncryptedContainer {
    pub fn new(header: ContainerHeader, ciphertext: Vec<u8>, trailer: Trailer) -> Result<Self> {
        if ciphertext.len() as u64 != header.plaintext_length() {
            return Err(Error::InvalidParameter(format!(
                "ciphertext is {} bytes but header declares {}",
                ciphertext.len(),
                header.plaintext_length()
            )));
        }
        Ok(Self {
            header,
            ciphertext,
            trailer,
        })
    }

    pub fn header(&self) -> &ContainerHeader {
        &self.header
    }

    pub fn ciphertext(&self) -> &[u8] {
        &self.ciphertext
    }

    pub fn trailer(&self) -> &Trailer {
        &self.trailer
    }

    pub fn version(&self) -> u8 {
        self.header.version()
    }

    pub fn tag(&self) -> &[u8; TAG_LEN] {
        self.trailer.tag()
    }

    pub fn content_digest(&self) -> &[u8; DIGEST_LEN] {
        self.trailer.content_digest()
    }

    pub fn original_filename(&self) -> Option<&str> {
        self.trailer.original_filename()
    }

    /// AEAD associated data binding the header and the filename.
    pub fn associated_data(&self) -> Result<Vec<u8>> {
        self.header.associated_data(self.original_filename())
    }
}

/// AEAD associated data for a current-version container.
///
/// Covers every header field except the nonce, which the AEAD already
/// binds, plus the serialized filename field. Needs no nonce, so it can be
/// built before encryption picks one.
pub fn associated_data(
    origin: KeyOrigin,
    salt: Option<&[u8; SALT_LEN]>,
    plaintext_length: u64,
    original_filename: Option<&str>,
) -> Result<Vec<u8>> {
    v1::associated_data(origin, salt, plaintext_length, original_filename)
}

/// Parses a container and returns an EncryptedContainer.
///
/// Automatically dispatches to the appropriate version parser.
///
/// # Errors
///
/// Returns [`Error::MalformedContainer`] if:
/// - The data is empty or truncated
/// - The version is unsupported
/// - Length fields disagree with the payload size
pub fn parse(data: &[u8]) -> Result<EncryptedContainer> {
    let Some(&version) = data.first() else {
        return Err(Error::MalformedContainer("empty container".into()));
    };

    match version {
        v1::VERSION_V1 => v1::parse(data),
        _ => Err(unsupported(version)),
    }
}

/// Serializes an EncryptedContainer to bytes.
///
/// # Errors
///
/// Returns an error if the version is unsupported.
pub fn serialize(container: &EncryptedContainer) -> Result<Vec<u8>> {
    match container.version() {
        v1::VERSION_V1 => Ok(v1::serialize(container)),
        version => Err(unsupported(version)),
    }
}

/// Reads and validates a header from the start of a container stream.
pub fn read_header<R: Read>(reader: &mut R) -> Result<ContainerHeader> {
    let [version] = read_array::<_, 1>(reader, "format version")?;
    match version {
        v1::VERSION_V1 => v1::read_header(reader),
        _ => Err(unsupported(version)),
    }
}

/// Reads the trailer that follows the ciphertext and checks that nothing
/// follows it.
pub fn read_trailer<R: Read>(reader: &mut R, version: u8) -> Result<Trailer> {
    match version {
        v1::VERSION_V1 => v1::read_trailer(reader),
        _ => Err(unsupported(version)),
    }
}

fn unsupported(version: u8) -> Error {
    Error::MalformedContainer(format!("unsupported format version: {version}"))
}

pub(crate) fn read_array<R: Read, const N: usize>(
    reader: &mut R,
    field: &str,
) -> Result<[u8; N]> {
    let mut buf = [0u8; N];
    reader.read_exact(&mut buf).map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            Error::MalformedContainer(format!("truncated {field}"))
        } else {
            Error::Io(e)
        }
    })?;
    Ok(buf)
}
