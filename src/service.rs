//! The façade front ends call: key resolution, hashing, encryption and
//! packaging composed into whole-file operations.
//!
//! Every operation is all-or-nothing. Encryption either returns a complete
//! container or nothing; decryption authenticates the whole ciphertext
//! before producing plaintext and verifies the digest before releasing it.
//! File outputs are staged and only renamed into place on success.

use std::fs::File;
use std::io::{self, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use chrono::Local;
use serde::Serialize;
use tracing::{debug, info};
use zeroize::Zeroizing;

use crate::config::Config;
use crate::crypto::digest::{digests_match, to_hex};
use crate::crypto::{self, Authenticator, DIGEST_LEN, Decryptor, Digester, Encryptor};
use crate::error::{Error, Result};
use crate::format::{self, ContainerHeader, EncryptedContainer, KeyRecord, Trailer, v1};
use crate::key::{KeyMaterial, KeyOrigin, KeySource};
use crate::keys::KeyManager;
use crate::storage::Storage;

/// Output of an in-memory encryption.
#[derive(Debug)]
pub struct Sealed {
    pub container: EncryptedContainer,
    /// Set when the key source was [`KeySource::Generate`]; the caller must
    /// keep it to decrypt later.
    pub generated_key: Option<KeyMaterial>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Encrypt,
    Decrypt,
}

/// What a file operation did, for display by the front end.
#[derive(Debug, Serialize)]
pub struct Summary {
    operation: Operation,
    input: PathBuf,
    output: PathBuf,
    original_filename: Option<String>,
    plaintext_length: u64,
    content_digest: String,
    origin: KeyOrigin,
    completed_at: String,
    #[serde(skip)]
    generated_key: Option<KeyMaterial>,
}

impl Summary {
    pub fn operation(&self) -> Operation {
        self.operation
    }

    pub fn input(&self) -> &Path {
        &self.input
    }

    pub fn output(&self) -> &Path {
        &self.output
    }

    pub fn original_filename(&self) -> Option<&str> {
        self.original_filename.as_deref()
    }

    pub fn plaintext_length(&self) -> u64 {
        self.plaintext_length
    }

    /// Hex SHA-256 of the plaintext.
    pub fn content_digest(&self) -> &str {
        &self.content_digest
    }

    pub fn origin(&self) -> KeyOrigin {
        self.origin
    }

    pub fn completed_at(&self) -> &str {
        &self.completed_at
    }

    pub fn generated_key(&self) -> Option<&KeyMaterial> {
        self.generated_key.as_ref()
    }

    pub fn take_generated_key(&mut self) -> Option<KeyMaterial> {
        self.generated_key.take()
    }
}

/// Container metadata readable without a key.
#[derive(Debug, Clone, Serialize)]
pub struct ContainerInfo {
    pub format_version: u8,
    pub origin: KeyOrigin,
    pub password_protected: bool,
    pub plaintext_length: u64,
    pub content_digest: String,
    pub original_filename: Option<String>,
    pub container_size: u64,
}

#[derive(Debug, Clone)]
pub struct EncryptionService {
    keys: KeyManager,
    chunk_size: usize,
}

impl Default for EncryptionService {
    fn default() -> Self {
        Self::new(&Config::default())
    }
}

impl EncryptionService {
    pub fn new(config: &Config) -> Self {
        Self {
            keys: KeyManager::new(config.kdf),
            chunk_size: config.chunk_size.max(64),
        }
    }

    pub fn key_manager(&self) -> &KeyManager {
        &self.keys
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    // ------------------------------------------------------------------
    // key operations
    // ------------------------------------------------------------------

    pub fn generate_key(&self) -> Result<KeyMaterial> {
        self.keys.generate_random_key()
    }

    /// Writes `key` to `path` as a key file, password-wrapped if `password`
    /// is given.
    pub fn export_key(&self, key: &KeyMaterial, path: &Path, password: Option<&str>) -> Result<()> {
        let record = self.keys.export_key_file(key, password)?;
        Storage::new(path).save(&record.to_bytes())?;
        info!(path = %path.display(), protected = record.is_protected(), "exported key file");
        Ok(())
    }

    pub fn import_key(&self, path: &Path, password: Option<&str>) -> Result<KeyMaterial> {
        let data = Zeroizing::new(Storage::new(path).load()?);
        let record = KeyRecord::from_bytes(&data)?;
        let key = self.keys.import_key_file(&record, password)?;
        debug!(path = %path.display(), protected = record.is_protected(), "imported key file");
        Ok(key)
    }

    fn resolve_for_encrypt(&self, source: &KeySource) -> Result<(KeyMaterial, bool)> {
        match source {
            KeySource::Generate => Ok((self.keys.generate_random_key()?, true)),
            KeySource::Password(password) => {
                Ok((self.keys.derive_key_from_password(password, None)?, false))
            }
            KeySource::Key(key) => Ok((key.clone(), false)),
            KeySource::KeyFile { path, password } => {
                Ok((self.import_key(path, password.as_deref().map(String::as_str))?, false))
            }
        }
    }

    fn resolve_for_decrypt(&self, source: &KeySource, header: &ContainerHeader) -> Result<KeyMaterial> {
        match source {
            KeySource::Generate => Err(Error::MissingKey(
                "a generated key cannot decrypt an existing container".into(),
            )),
            KeySource::Password(password) => {
                let salt = header.salt().ok_or_else(|| {
                    Error::MissingKey(format!(
                        "container key is {}, not password-derived; supply the key or key file",
                        header.origin()
                    ))
                })?;
                self.keys.derive_key_from_password(password, Some(salt))
            }
            KeySource::Key(key) => Ok(key.clone()),
            KeySource::KeyFile { path, password } => {
                self.import_key(path, password.as_deref().map(String::as_str))
            }
        }
    }

    fn explain_auth_failure(&self, origin: KeyOrigin, err: Error) -> Error {
        if matches!(err, Error::AuthenticationFailed) && origin == KeyOrigin::PasswordDerived {
            self.keys.hint_unpinned();
        }
        err
    }

    // ------------------------------------------------------------------
    // in-memory operations
    // ------------------------------------------------------------------

    /// Encrypts `plaintext` into a container.
    pub fn seal(
        &self,
        plaintext: &[u8],
        original_filename: Option<&str>,
        source: &KeySource,
    ) -> Result<Sealed> {
        let plaintext_length = plaintext.len() as u64;
        crypto::aead::check_payload_len(plaintext_length)?;
        if let Some(name) = original_filename {
            v1::check_filename(name)?;
        }

        let (key, generated) = self.resolve_for_encrypt(source)?;
        debug!(stage = "key_resolved", origin = %key.origin(), source = source.describe());

        let content_digest = crypto::digest(plaintext);
        debug!(stage = "hashed", bytes = plaintext_length);

        let aad = format::associated_data(
            key.origin(),
            key.salt(),
            plaintext_length,
            original_filename,
        )?;
        let (nonce, ciphertext, tag) = crypto::encrypt(plaintext, &key, &aad)?;
        debug!(stage = "ciphered");

        let header = ContainerHeader::new(key.origin(), key.salt().copied(), nonce, plaintext_length)?;
        let trailer = Trailer::new(tag, content_digest, original_filename.map(String::from))?;
        let container = EncryptedContainer::new(header, ciphertext, trailer)?;
        debug!(stage = "packaged");

        Ok(Sealed {
            container,
            generated_key: generated.then_some(key),
        })
    }

    /// Decrypts a container. Plaintext is returned only after both the AEAD
    /// tag and the content digest check out.
    pub fn open(&self, container: &EncryptedContainer, source: &KeySource) -> Result<Zeroizing<Vec<u8>>> {
        let header = container.header();
        debug!(stage = "parsed", version = header.version(), origin = %header.origin());

        let key = self.resolve_for_decrypt(source, header)?;
        debug!(stage = "key_resolved", source = source.describe());

        let plaintext = crypto::decrypt(
            header.nonce(),
            container.ciphertext(),
            container.tag(),
            &key,
            &container.associated_data()?,
        )
        .map_err(|e| self.explain_auth_failure(header.origin(), e))?;
        debug!(stage = "authenticated");

        if !crypto::verify(&plaintext, container.content_digest()) {
            return Err(Error::DigestMismatch);
        }
        debug!(stage = "digest_verified");

        Ok(plaintext)
    }

    /// [`seal`](Self::seal) followed by serialization.
    pub fn seal_bytes(
        &self,
        plaintext: &[u8],
        original_filename: Option<&str>,
        source: &KeySource,
    ) -> Result<(Vec<u8>, Option<KeyMaterial>)> {
        let sealed = self.seal(plaintext, original_filename, source)?;
        Ok((format::serialize(&sealed.container)?, sealed.generated_key))
    }

    /// Parses container bytes and opens them. Structure is validated before
    /// any key is resolved.
    pub fn open_bytes(&self, data: &[u8], source: &KeySource) -> Result<Zeroizing<Vec<u8>>> {
        let container = format::parse(data)?;
        self.open(&container, source)
    }

    // ------------------------------------------------------------------
    // file operations
    // ------------------------------------------------------------------

    /// Streams `path_in` into a container at `path_out`.
    pub fn encrypt_file(&self, path_in: &Path, path_out: &Path, source: &KeySource) -> Result<Summary> {
        let mut input = File::open(path_in)?;
        let plaintext_length = input.metadata()?.len();
        crypto::aead::check_payload_len(plaintext_length)?;

        let original_filename = path_in
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .filter(|n| !n.is_empty());

        let (key, generated) = self.resolve_for_encrypt(source)?;
        debug!(stage = "key_resolved", origin = %key.origin(), source = source.describe());

        let nonce = crypto::generate_nonce()?;
        let header = ContainerHeader::new(key.origin(), key.salt().copied(), nonce, plaintext_length)?;
        let aad = header.associated_data(original_filename.as_deref())?;

        let mut staged = Storage::new(path_out).stage()?;
        staged.write_all(&header.to_bytes())?;

        let mut encryptor = Encryptor::new(&key, header.nonce(), &aad);
        let mut digester = Digester::new();
        let written = self.encrypt_chunks(&mut input, &mut staged, &mut encryptor, &mut digester)?;
        if written != plaintext_length {
            return Err(Error::Io(io::Error::other(format!(
                "input changed during encryption: expected {plaintext_length} bytes, read {written}"
            ))));
        }
        let content_digest = digester.finalize();
        let tag = encryptor.finalize();
        debug!(stage = "ciphered", bytes = written);

        let trailer = Trailer::new(tag, content_digest, original_filename.clone())?;
        staged.write_all(&trailer.to_bytes())?;
        staged.commit()?;
        debug!(stage = "packaged");

        info!(
            input = %path_in.display(),
            output = %path_out.display(),
            bytes = plaintext_length,
            origin = %key.origin(),
            "encrypted file"
        );

        Ok(Summary {
            operation: Operation::Encrypt,
            input: path_in.to_path_buf(),
            output: path_out.to_path_buf(),
            original_filename,
            plaintext_length,
            content_digest: to_hex(&content_digest),
            origin: key.origin(),
            completed_at: Local::now().to_rfc3339(),
            generated_key: generated.then_some(key),
        })
    }

    /// Decrypts the container at `path_in` into `path_out`.
    ///
    /// Nothing appears at `path_out` unless authentication and the digest
    /// check both pass.
    pub fn decrypt_file(&self, path_in: &Path, path_out: &Path, source: &KeySource) -> Result<Summary> {
        let mut input = File::open(path_in)?;
        let (header, trailer) = read_layout(&mut input)?;
        debug!(stage = "parsed", version = header.version(), origin = %header.origin());

        let key = self.resolve_for_decrypt(source, &header)?;
        debug!(stage = "key_resolved", source = source.describe());

        let body_start = header.encoded_len() as u64;
        let plaintext_length = header.plaintext_length();
        let aad = header.associated_data(trailer.original_filename())?;

        input.seek(SeekFrom::Start(body_start))?;
        let mut authenticator = Authenticator::new(&key, header.nonce(), &aad);
        self.authenticate_chunks(&mut (&mut input).take(plaintext_length), &mut authenticator, plaintext_length)?;
        let mut decryptor = authenticator
            .verify(trailer.tag())
            .map_err(|e| self.explain_auth_failure(header.origin(), e))?;
        debug!(stage = "authenticated");

        input.seek(SeekFrom::Start(body_start))?;
        let mut staged = Storage::new(path_out).stage()?;
        let content_digest = self.decrypt_chunks(
            &mut (&mut input).take(plaintext_length),
            &mut staged,
            &mut decryptor,
            plaintext_length,
        )?;

        // dropping `staged` removes the unverified plaintext
        if !digests_match(&content_digest, trailer.content_digest()) {
            return Err(Error::DigestMismatch);
        }
        staged.commit()?;
        debug!(stage = "digest_verified");

        info!(
            input = %path_in.display(),
            output = %path_out.display(),
            bytes = plaintext_length,
            "decrypted file"
        );

        Ok(Summary {
            operation: Operation::Decrypt,
            input: path_in.to_path_buf(),
            output: path_out.to_path_buf(),
            original_filename: trailer.original_filename().map(String::from),
            plaintext_length,
            content_digest: to_hex(&content_digest),
            origin: header.origin(),
            completed_at: Local::now().to_rfc3339(),
            generated_key: None,
        })
    }

    /// Reads container metadata without decrypting anything.
    pub fn inspect(&self, path: &Path) -> Result<ContainerInfo> {
        let mut input = File::open(path)?;
        let container_size = input.metadata()?.len();
        let (header, trailer) = read_layout(&mut input)?;

        Ok(ContainerInfo {
            format_version: header.version(),
            origin: header.origin(),
            password_protected: header.salt().is_some(),
            plaintext_length: header.plaintext_length(),
            content_digest: to_hex(trailer.content_digest()),
            original_filename: trailer.original_filename().map(String::from),
            container_size,
        })
    }

    /// SHA-256 of a plaintext file, for auditing against a container's
    /// recorded digest without the key.
    pub fn digest_file(&self, path: &Path) -> Result<[u8; DIGEST_LEN]> {
        let mut input = File::open(path)?;
        let mut digester = Digester::new();
        let mut buf = vec![0u8; self.chunk_size];
        loop {
            let n = read_full(&mut input, &mut buf)?;
            if n == 0 {
                break;
            }
            digester.update(&buf[..n]);
        }
        Ok(digester.finalize())
    }

    pub fn verify_file(&self, path: &Path, expected: &[u8; DIGEST_LEN]) -> Result<bool> {
        Ok(digests_match(&self.digest_file(path)?, expected))
    }

    // ------------------------------------------------------------------
    // chunk loops
    // ------------------------------------------------------------------

    fn encrypt_chunks<R: Read, W: Write>(
        &self,
        reader: &mut R,
        writer: &mut W,
        encryptor: &mut Encryptor,
        digester: &mut Digester,
    ) -> Result<u64> {
        let mut buf = Zeroizing::new(vec![0u8; self.chunk_size]);
        let mut total = 0u64;

        loop {
            let n = read_full(reader, &mut buf)?;
            if n == 0 {
                break;
            }
            let chunk = &mut buf[..n];
            digester.update(chunk);
            encryptor.encrypt_chunk(chunk)?;
            writer.write_all(chunk)?;
            total += n as u64;
        }

        Ok(total)
    }

    fn authenticate_chunks<R: Read>(
        &self,
        reader: &mut R,
        authenticator: &mut Authenticator,
        expected: u64,
    ) -> Result<()> {
        let mut buf = vec![0u8; self.chunk_size];
        let mut total = 0u64;

        loop {
            let n = read_full(reader, &mut buf)?;
            if n == 0 {
                break;
            }
            authenticator.update(&buf[..n]);
            total += n as u64;
        }

        if total != expected {
            return Err(Error::MalformedContainer("truncated ciphertext".into()));
        }
        Ok(())
    }

    fn decrypt_chunks<R: Read, W: Write>(
        &self,
        reader: &mut R,
        writer: &mut W,
        decryptor: &mut Decryptor,
        expected: u64,
    ) -> Result<[u8; DIGEST_LEN]> {
        let mut buf = Zeroizing::new(vec![0u8; self.chunk_size]);
        let mut digester = Digester::new();
        let mut total = 0u64;

        loop {
            let n = read_full(reader, &mut buf)?;
            if n == 0 {
                break;
            }
            let chunk = &mut buf[..n];
            decryptor.decrypt_chunk(chunk)?;
            digester.update(chunk);
            writer.write_all(chunk)?;
            total += n as u64;
        }

        if total != expected {
            return Err(Error::MalformedContainer("truncated ciphertext".into()));
        }
        Ok(digester.finalize())
    }
}

/// Validates the whole container layout: header, declared length against
/// the real size, and a trailer that ends exactly at end of file.
fn read_layout(input: &mut File) -> Result<(ContainerHeader, Trailer)> {
    let file_len = input.metadata()?.len();
    input.seek(SeekFrom::Start(0))?;

    let header = format::read_header(&mut BufReader::new(&mut *input))?;
    let body_start = header.encoded_len() as u64;

    let trailer_start = body_start
        .checked_add(header.plaintext_length())
        .filter(|start| {
            start
                .checked_add(v1::MIN_TRAILER_LEN as u64)
                .is_some_and(|end| end <= file_len)
        })
        .ok_or_else(|| {
            Error::MalformedContainer(format!(
                "declared plaintext length {} inconsistent with container size {file_len}",
                header.plaintext_length()
            ))
        })?;

    input.seek(SeekFrom::Start(trailer_start))?;
    let trailer = format::read_trailer(&mut BufReader::new(&mut *input), header.version())?;

    Ok((header, trailer))
}

/// Reads until `buf` is full or the reader is exhausted.
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::KdfParams;
    use crate::crypto::kdf::test_params;
    use std::fs;
    use tempfile::tempdir;

    fn service() -> EncryptionService {
        EncryptionService::new(&Config {
            chunk_size: 64,
            kdf: test_params(),
        })
    }

    fn dir_entries(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    // --------------------------------------------------
    // IN-MEMORY
    // --------------------------------------------------

    #[test]
    fn seal_open_roundtrip_with_password() {
        let svc = service();
        let sealed = svc
            .seal(b"hello", Some("hello.txt"), &KeySource::password("pw1"))
            .unwrap();

        assert!(sealed.generated_key.is_none());
        assert_eq!(sealed.container.header().origin(), KeyOrigin::PasswordDerived);
        assert!(sealed.container.header().salt().is_some());

        let plaintext = svc.open(&sealed.container, &KeySource::password("pw1")).unwrap();
        assert_eq!(&plaintext[..], b"hello");
    }

    #[test]
    fn wrong_password_fails_authentication() {
        let svc = service();
        let sealed = svc.seal(b"hello", None, &KeySource::password("pw1")).unwrap();

        let err = svc.open(&sealed.container, &KeySource::password("pw2")).unwrap_err();
        assert!(matches!(err, Error::AuthenticationFailed));
    }

    #[test]
    fn generated_key_is_returned_and_decrypts() {
        let svc = service();
        let sealed = svc.seal(b"data", None, &KeySource::Generate).unwrap();
        let key = sealed.generated_key.clone().unwrap();

        assert_eq!(sealed.container.header().origin(), KeyOrigin::RandomlyGenerated);
        assert!(sealed.container.header().salt().is_none());

        let plaintext = svc.open(&sealed.container, &KeySource::Key(key)).unwrap();
        assert_eq!(&plaintext[..], b"data");
    }

    #[test]
    fn wrong_key_fails_authentication() {
        let svc = service();
        let sealed = svc.seal(b"data", None, &KeySource::Generate).unwrap();
        let other = svc.generate_key().unwrap();

        assert!(matches!(
            svc.open(&sealed.container, &KeySource::Key(other)),
            Err(Error::AuthenticationFailed)
        ));
    }

    #[test]
    fn password_cannot_open_random_key_container() {
        let svc = service();
        let sealed = svc.seal(b"data", None, &KeySource::Generate).unwrap();

        assert!(matches!(
            svc.open(&sealed.container, &KeySource::password("pw")),
            Err(Error::MissingKey(_))
        ));
        assert!(matches!(
            svc.open(&sealed.container, &KeySource::Generate),
            Err(Error::MissingKey(_))
        ));
    }

    #[test]
    fn empty_password_is_weak() {
        assert!(matches!(
            service().seal(b"x", None, &KeySource::password("")),
            Err(Error::WeakPassword)
        ));
    }

    #[test]
    fn empty_plaintext_roundtrip() {
        let svc = service();
        let (bytes, key) = svc.seal_bytes(b"", None, &KeySource::Generate).unwrap();
        let container = format::parse(&bytes).unwrap();
        assert_eq!(container.header().plaintext_length(), 0);

        let plaintext = svc.open_bytes(&bytes, &KeySource::Key(key.unwrap())).unwrap();
        assert!(plaintext.is_empty());
    }

    #[test]
    fn same_plaintext_twice_differs() {
        let svc = service();
        let key = svc.generate_key().unwrap();
        let a = svc.seal(b"same", None, &KeySource::Key(key.clone())).unwrap();
        let b = svc.seal(b"same", None, &KeySource::Key(key)).unwrap();

        assert_ne!(a.container.header().nonce(), b.container.header().nonce());
        assert_ne!(a.container.ciphertext(), b.container.ciphertext());
        assert_eq!(a.container.content_digest(), b.container.content_digest());
    }

    #[test]
    fn tampered_bytes_fail_authentication() {
        let svc = service();
        let key = svc.generate_key().unwrap();
        let (bytes, _) = svc
            .seal_bytes(b"payload", Some("p.bin"), &KeySource::Key(key.clone()))
            .unwrap();

        // ciphertext starts after the 22-byte header; tag follows the 7 bytes
        for offset in [22, 28, 29, 44] {
            let mut bad = bytes.clone();
            bad[offset] ^= 0x80;
            assert!(matches!(
                svc.open_bytes(&bad, &KeySource::Key(key.clone())),
                Err(Error::AuthenticationFailed)
            ));
        }

        // filename is covered by the associated data
        let mut renamed = bytes.clone();
        let last = renamed.len() - 1;
        renamed[last] = b'x';
        assert!(matches!(
            svc.open_bytes(&renamed, &KeySource::Key(key.clone())),
            Err(Error::AuthenticationFailed)
        ));

        // random -> loaded keeps the same layout, so only the AEAD can notice
        let mut relabeled = bytes.clone();
        assert_eq!(relabeled[1], KeyOrigin::RandomlyGenerated.flag());
        relabeled[1] = KeyOrigin::LoadedFromFile.flag();
        assert_eq!(
            format::parse(&relabeled).unwrap().header().origin(),
            KeyOrigin::LoadedFromFile
        );
        assert!(matches!(
            svc.open_bytes(&relabeled, &KeySource::Key(key)),
            Err(Error::AuthenticationFailed)
        ));
    }

    #[test]
    fn kdf_parameters_must_match_to_open() {
        let sealer = service();
        let sealed = sealer.seal(b"hello", None, &KeySource::password("pw")).unwrap();

        let other = EncryptionService::new(&Config {
            chunk_size: 64,
            kdf: KdfParams::new(128, 1, 1).unwrap(),
        });
        assert!(!other.key_manager().uses_pinned_kdf());
        assert!(matches!(
            other.open(&sealed.container, &KeySource::password("pw")),
            Err(Error::AuthenticationFailed)
        ));

        let plaintext = sealer.open(&sealed.container, &KeySource::password("pw")).unwrap();
        assert_eq!(&plaintext[..], b"hello");
    }

    #[test]
    fn overlong_filename_is_rejected_before_encryption() {
        let long = "f".repeat(u16::MAX as usize + 1);
        assert!(matches!(
            service().seal(b"data", Some(&long), &KeySource::Generate),
            Err(Error::InvalidParameter(_))
        ));
        assert!(matches!(
            service().seal(b"data", Some(""), &KeySource::Generate),
            Err(Error::InvalidParameter(_))
        ));
    }

    #[test]
    fn corrupted_digest_is_reported_distinctly() {
        let svc = service();
        let key = svc.generate_key().unwrap();
        let (mut bytes, _) = svc.seal_bytes(b"payload", None, &KeySource::Key(key.clone())).unwrap();

        // digest sits after header (22), ciphertext (7) and tag (16)
        bytes[22 + 7 + 16] ^= 0x01;

        assert!(matches!(
            svc.open_bytes(&bytes, &KeySource::Key(key)),
            Err(Error::DigestMismatch)
        ));
    }

    #[test]
    fn unknown_version_fails_before_key_resolution() {
        let svc = service();
        let (mut bytes, _) = svc.seal_bytes(b"x", None, &KeySource::password("pw")).unwrap();
        bytes[0] = 0xEE;

        // a missing key file would fail with Io if resolution ran first
        let source = KeySource::KeyFile {
            path: PathBuf::from("/nonexistent/key"),
            password: None,
        };
        assert!(matches!(
            svc.open_bytes(&bytes, &source),
            Err(Error::MalformedContainer(_))
        ));
    }

    // --------------------------------------------------
    // FILES
    // --------------------------------------------------

    #[test]
    fn file_roundtrip_across_many_chunks() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("report.pdf");
        let sealed = dir.path().join("report.pdf.sealed");
        let output = dir.path().join("restored.pdf");

        let data: Vec<u8> = (0..10_000u32).map(|i| (i * 7 % 256) as u8).collect();
        fs::write(&input, &data).unwrap();

        let svc = service();
        let enc = svc
            .encrypt_file(&input, &sealed, &KeySource::password("pw"))
            .unwrap();
        assert_eq!(enc.operation(), Operation::Encrypt);
        assert_eq!(enc.plaintext_length(), 10_000);
        assert_eq!(enc.original_filename(), Some("report.pdf"));
        assert_eq!(enc.content_digest(), to_hex(&crypto::digest(&data)));

        let dec = svc
            .decrypt_file(&sealed, &output, &KeySource::password("pw"))
            .unwrap();
        assert_eq!(dec.operation(), Operation::Decrypt);
        assert_eq!(dec.content_digest(), enc.content_digest());
        assert_eq!(fs::read(&output).unwrap(), data);
    }

    #[test]
    fn file_container_matches_in_memory_codec() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("notes.txt");
        let sealed = dir.path().join("notes.sealed");
        fs::write(&input, b"streamed and parsed").unwrap();

        let svc = service();
        let key = svc.generate_key().unwrap();
        svc.encrypt_file(&input, &sealed, &KeySource::Key(key.clone()))
            .unwrap();

        let bytes = fs::read(&sealed).unwrap();
        let container = format::parse(&bytes).unwrap();
        assert_eq!(container.original_filename(), Some("notes.txt"));

        let plaintext = svc.open(&container, &KeySource::Key(key)).unwrap();
        assert_eq!(&plaintext[..], b"streamed and parsed");
    }

    #[test]
    fn zero_byte_file_roundtrip() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("empty");
        let sealed = dir.path().join("empty.sealed");
        let output = dir.path().join("empty.out");
        fs::write(&input, b"").unwrap();

        let svc = service();
        let mut enc = svc.encrypt_file(&input, &sealed, &KeySource::Generate).unwrap();
        assert_eq!(enc.plaintext_length(), 0);
        let key = enc.take_generated_key().unwrap();

        assert_eq!(svc.inspect(&sealed).unwrap().plaintext_length, 0);

        svc.decrypt_file(&sealed, &output, &KeySource::Key(key)).unwrap();
        assert_eq!(fs::read(&output).unwrap(), b"");
    }

    #[test]
    fn failed_decrypt_leaves_no_output() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("in.txt");
        let sealed = dir.path().join("in.sealed");
        let output = dir.path().join("out.txt");
        fs::write(&input, b"confidential").unwrap();

        let svc = service();
        svc.encrypt_file(&input, &sealed, &KeySource::password("right"))
            .unwrap();

        let err = svc
            .decrypt_file(&sealed, &output, &KeySource::password("wrong"))
            .unwrap_err();
        assert!(matches!(err, Error::AuthenticationFailed));
        assert_eq!(dir_entries(dir.path()), vec!["in.sealed", "in.txt"]);
    }

    #[test]
    fn digest_mismatch_leaves_no_output() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("in.txt");
        let sealed = dir.path().join("in.sealed");
        let output = dir.path().join("out.txt");
        fs::write(&input, b"confidential").unwrap();

        let svc = service();
        let key = svc.generate_key().unwrap();
        svc.encrypt_file(&input, &sealed, &KeySource::Key(key.clone()))
            .unwrap();

        let mut bytes = fs::read(&sealed).unwrap();
        let digest_at = 22 + 12 + 16;
        bytes[digest_at] ^= 0xFF;
        fs::write(&sealed, &bytes).unwrap();

        let err = svc
            .decrypt_file(&sealed, &output, &KeySource::Key(key))
            .unwrap_err();
        assert!(matches!(err, Error::DigestMismatch));
        assert!(!output.exists());
        assert_eq!(dir_entries(dir.path()), vec!["in.sealed", "in.txt"]);
    }

    #[test]
    fn truncated_file_is_malformed() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("in.txt");
        let sealed = dir.path().join("in.sealed");
        fs::write(&input, b"some content here").unwrap();

        let svc = service();
        let key = svc.generate_key().unwrap();
        svc.encrypt_file(&input, &sealed, &KeySource::Key(key.clone()))
            .unwrap();

        let bytes = fs::read(&sealed).unwrap();
        fs::write(&sealed, &bytes[..bytes.len() - 3]).unwrap();

        assert!(matches!(
            svc.decrypt_file(&sealed, &dir.path().join("out"), &KeySource::Key(key)),
            Err(Error::MalformedContainer(_))
        ));
    }

    #[test]
    fn unknown_version_file_is_malformed() {
        let dir = tempdir().unwrap();
        let sealed = dir.path().join("bad.sealed");
        fs::write(&sealed, [9u8; 100]).unwrap();

        let svc = service();
        assert!(matches!(svc.inspect(&sealed), Err(Error::MalformedContainer(_))));
        assert!(matches!(
            svc.decrypt_file(&sealed, &dir.path().join("out"), &KeySource::password("pw")),
            Err(Error::MalformedContainer(_))
        ));
    }

    #[test]
    fn inspect_reports_metadata() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("photo.jpg");
        let sealed = dir.path().join("photo.sealed");
        fs::write(&input, b"jpeg bytes").unwrap();

        let svc = service();
        svc.encrypt_file(&input, &sealed, &KeySource::password("pw"))
            .unwrap();

        let info = svc.inspect(&sealed).unwrap();
        assert_eq!(info.format_version, format::CURRENT_VERSION);
        assert_eq!(info.origin, KeyOrigin::PasswordDerived);
        assert!(info.password_protected);
        assert_eq!(info.plaintext_length, 10);
        assert_eq!(info.original_filename.as_deref(), Some("photo.jpg"));
        assert_eq!(info.container_size, fs::metadata(&sealed).unwrap().len());

        let expected = crypto::digest::from_hex(&info.content_digest).unwrap();
        assert!(svc.verify_file(&input, &expected).unwrap());
    }

    // --------------------------------------------------
    // KEY FILES
    // --------------------------------------------------

    #[test]
    fn exported_key_file_decrypts() {
        let dir = tempdir().unwrap();
        let key_path = dir.path().join("keys").join("file.key");
        let input = dir.path().join("in.txt");
        let sealed = dir.path().join("in.sealed");
        let output = dir.path().join("out.txt");
        fs::write(&input, b"shared secret").unwrap();

        let svc = service();
        let key = svc.generate_key().unwrap();
        svc.export_key(&key, &key_path, Some("wrap")).unwrap();

        let source = KeySource::KeyFile {
            path: key_path.clone(),
            password: Some(Zeroizing::new("wrap".to_string())),
        };
        let enc = svc.encrypt_file(&input, &sealed, &source).unwrap();
        assert_eq!(enc.origin(), KeyOrigin::LoadedFromFile);

        svc.decrypt_file(&sealed, &output, &KeySource::Key(key)).unwrap();
        assert_eq!(fs::read(&output).unwrap(), b"shared secret");

        let wrong = KeySource::KeyFile {
            path: key_path,
            password: Some(Zeroizing::new("nope".to_string())),
        };
        assert!(matches!(
            svc.decrypt_file(&sealed, &output, &wrong),
            Err(Error::WrongPassword)
        ));
    }

    #[test]
    fn unprotected_key_file_roundtrip() {
        let dir = tempdir().unwrap();
        let key_path = dir.path().join("plain.key");

        let svc = service();
        let key = svc.generate_key().unwrap();
        svc.export_key(&key, &key_path, None).unwrap();

        assert_eq!(fs::read(&key_path).unwrap().len(), format::keyfile::PLAIN_LEN);
        let imported = svc.import_key(&key_path, None).unwrap();
        assert_eq!(imported.as_bytes(), key.as_bytes());
    }

    #[test]
    fn protected_key_file_without_password_is_missing_key() {
        let dir = tempdir().unwrap();
        let key_path = dir.path().join("wrapped.key");

        let svc = service();
        let key = svc.generate_key().unwrap();
        svc.export_key(&key, &key_path, Some("pw")).unwrap();

        assert!(matches!(
            svc.import_key(&key_path, None),
            Err(Error::MissingKey(_))
        ));
    }

    #[test]
    fn garbage_key_file_is_malformed() {
        let dir = tempdir().unwrap();
        let key_path = dir.path().join("bad.key");
        fs::write(&key_path, b"not a key").unwrap();

        assert!(matches!(
            service().import_key(&key_path, None),
            Err(Error::MalformedKeyFile(_))
        ));
    }

    #[test]
    fn operations_run_in_parallel() {
        let svc = service();
        let handles: Vec<_> = (0..4u8)
            .map(|i| {
                let svc = svc.clone();
                std::thread::spawn(move || {
                    let data = vec![i; 1000];
                    let sealed = svc.seal(&data, None, &KeySource::Generate).unwrap();
                    let key = sealed.generated_key.clone().unwrap();
                    let plaintext = svc.open(&sealed.container, &KeySource::Key(key)).unwrap();
                    assert_eq!(&plaintext[..], &data[..]);
                })
            })
            .collect();

        for h in handles {
            h.join().unwrap();
        }
    }
}
