//! Container format v1.
//!
//! All integers little-endian:
//! ```text
//! VERSION (1) | ORIGIN (1) | SALT (16, iff ORIGIN == 1) | NONCE (12) | PLAINTEXT_LEN (8)
//! | CIPHERTEXT (PLAINTEXT_LEN) | TAG (16) | DIGEST (32) | NAME_LEN (2) | NAME (NAME_LEN)
//! ```
//!
//! The payload is a single ChaCha20-Poly1305 message; chunking during
//! processing leaves no trace in the layout. `NAME_LEN == 0` means no
//! original filename was recorded.

use std::io::Read;

use super::{ContainerHeader, EncryptedContainer, Trailer, read_array};
use crate::crypto::{DIGEST_LEN, NONCE_LEN, SALT_LEN, TAG_LEN};
use crate::error::{Error, Result};
use crate::key::KeyOrigin;

/// Current file format version.
pub const VERSION_V1: u8 = 1;

const VER_LEN: usize = 1;
const ORIGIN_LEN: usize = 1;
const LENGTH_LEN: usize = 8;
const NAME_LEN_LEN: usize = 2;

/// Smallest possible trailer: tag, digest, and an empty name.
pub const MIN_TRAILER_LEN: usize = TAG_LEN + DIGEST_LEN + NAME_LEN_LEN;

pub fn header_len(origin: KeyOrigin) -> usize {
    let salt = if origin == KeyOrigin::PasswordDerived {
        SALT_LEN
    } else {
        0
    };
    VER_LEN + ORIGIN_LEN + salt + NONCE_LEN + LENGTH_LEN
}

pub fn trailer_len(original_filename: Option<&str>) -> usize {
    MIN_TRAILER_LEN + original_filename.map_or(0, str::len)
}

pub(crate) fn check_filename(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::InvalidParameter(
            "original filename must not be empty when present".into(),
        ));
    }
    if name.len() > u16::MAX as usize {
        return Err(Error::InvalidParameter(format!(
            "original filename is {} bytes, limit is {}",
            name.len(),
            u16::MAX
        )));
    }
    Ok(())
}

fn encode_filename(buf: &mut Vec<u8>, name: Option<&str>) {
    // callers bound the length with check_filename
    let name = name.unwrap_or("");
    buf.extend_from_slice(&(name.len() as u16).to_le_bytes());
    buf.extend_from_slice(name.as_bytes());
}

pub(super) fn encode_header(header: &ContainerHeader) -> Vec<u8> {
    let mut buf = Vec::with_capacity(header_len(header.origin()));

    buf.push(header.version());
    buf.push(header.origin().flag());
    if let Some(salt) = header.salt() {
        buf.extend_from_slice(salt);
    }
    buf.extend_from_slice(header.nonce());
    buf.extend_from_slice(&header.plaintext_length().to_le_bytes());

    buf
}

pub(super) fn encode_trailer(trailer: &Trailer) -> Vec<u8> {
    let mut buf = Vec::with_capacity(trailer.encoded_len());

    buf.extend_from_slice(trailer.tag());
    buf.extend_from_slice(trailer.content_digest());
    encode_filename(&mut buf, trailer.original_filename());

    buf
}

pub(super) fn associated_data(
    origin: KeyOrigin,
    salt: Option<&[u8; SALT_LEN]>,
    plaintext_length: u64,
    original_filename: Option<&str>,
) -> Result<Vec<u8>> {
    if let Some(name) = original_filename {
        check_filename(name)?;
    }

    let mut aad = Vec::with_capacity(header_len(origin) + trailer_len(original_filename));

    aad.push(VERSION_V1);
    aad.push(origin.flag());
    if let Some(salt) = salt {
        aad.extend_from_slice(salt);
    }
    aad.extend_from_slice(&plaintext_length.to_le_bytes());
    encode_filename(&mut aad, original_filename);

    Ok(aad)
}

/// Reads the v1 header fields following the version byte.
pub(super) fn read_header<R: Read>(reader: &mut R) -> Result<ContainerHeader> {
    let [flag] = read_array::<_, ORIGIN_LEN>(reader, "origin flag")?;
    let origin = KeyOrigin::from_flag(flag)
        .ok_or_else(|| Error::MalformedContainer(format!("unknown origin flag: {flag}")))?;

    let salt = if origin == KeyOrigin::PasswordDerived {
        Some(read_array::<_, SALT_LEN>(reader, "salt")?)
    } else {
        None
    };
    let nonce = read_array::<_, NONCE_LEN>(reader, "nonce")?;
    let plaintext_length = u64::from_le_bytes(read_array::<_, LENGTH_LEN>(reader, "plaintext length")?);

    Ok(ContainerHeader {
        version: VERSION_V1,
        origin,
        salt,
        nonce,
        plaintext_length,
    })
}

/// Reads a v1 trailer and requires the stream to end right after it.
pub(super) fn read_trailer<R: Read>(reader: &mut R) -> Result<Trailer> {
    let tag = read_array::<_, TAG_LEN>(reader, "auth tag")?;
    let content_digest = read_array::<_, DIGEST_LEN>(reader, "content digest")?;
    let name_len = u16::from_le_bytes(read_array::<_, NAME_LEN_LEN>(reader, "filename length")?);

    let mut name = vec![0u8; name_len as usize];
    reader.read_exact(&mut name).map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            Error::MalformedContainer("truncated original filename".into())
        } else {
            Error::Io(e)
        }
    })?;

    let mut extra = [0u8; 1];
    if reader.read(&mut extra)? != 0 {
        return Err(Error::MalformedContainer(
            "trailing bytes after container".into(),
        ));
    }

    let original_filename = if name.is_empty() {
        None
    } else {
        Some(String::from_utf8(name).map_err(|_| {
            Error::MalformedContainer("original filename is not valid UTF-8".into())
        })?)
    };

    Ok(Trailer {
        tag,
        content_digest,
        original_filename,
    })
}

/// Parses a complete v1 container.
///
/// # Errors
///
/// Returns [`Error::MalformedContainer`] if any field is truncated, the
/// declared plaintext length disagrees with the payload, or bytes remain
/// after the trailer.
pub fn parse(data: &[u8]) -> Result<EncryptedContainer> {
    let mut reader = data;

    let [version] = read_array::<_, VER_LEN>(&mut reader, "format version")?;
    if version != VERSION_V1 {
        return Err(Error::MalformedContainer(format!(
            "wrong version for v1 parser: {version}"
        )));
    }
    let header = read_header(&mut reader)?;

    // `reader` now points at the ciphertext
    let declared = header.plaintext_length();
    let available = (reader.len().saturating_sub(MIN_TRAILER_LEN)) as u64;
    if reader.len() < MIN_TRAILER_LEN || declared > available {
        return Err(Error::MalformedContainer(format!(
            "declared plaintext length {declared} exceeds available payload"
        )));
    }

    let (ciphertext, mut rest) = reader.split_at(declared as usize);
    let trailer = read_trailer(&mut rest)?;

    EncryptedContainer::new(header, ciphertext.to_vec(), trailer)
}

/// Serializes an EncryptedContainer to v1 format bytes.
pub fn serialize(container: &EncryptedContainer) -> Vec<u8> {
    let header = container.header();
    let trailer = container.trailer();

    let mut buf = Vec::with_capacity(
        header.encoded_len() + container.ciphertext().len() + trailer.encoded_len(),
    );
    buf.extend_from_slice(&encode_header(header));
    buf.extend_from_slice(container.ciphertext());
    buf.extend_from_slice(&encode_trailer(trailer));

    buf
}
