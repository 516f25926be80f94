//! Crash-safe output files.
//!
//! Every file the core produces (containers, decrypted plaintext, key files)
//! is written to a temporary sibling first and renamed into place only once
//! complete, so a failed or cancelled operation never leaves a partial file
//! at the destination.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::crypto::aead::secure_random;
use crate::error::{Error, Result};

/// A destination path that is only ever replaced atomically.
#[derive(Clone, Debug)]
pub struct Storage {
    path: PathBuf,
}

impl Storage {
    /// Creates a new Storage instance with the given path.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Loads the entire file into memory.
    pub fn load(&self) -> Result<Vec<u8>> {
        Ok(fs::read(&self.path)?)
    }

    /// Writes `data` in one go using [`Storage::stage`].
    pub fn save(&self, data: &[u8]) -> Result<()> {
        let mut staged = self.stage()?;
        staged.write_all(data)?;
        staged.commit()
    }

    /// Opens a temporary file next to the destination.
    ///
    /// Creates parent directories if they don't exist. The temporary file is
    /// removed when the returned [`StagedFile`] is dropped without
    /// [`StagedFile::commit`].
    pub fn stage(&self) -> Result<StagedFile> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let tmp_path = self.random_tmp_path()?;

        // fail if exists
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&tmp_path)?;

        Ok(StagedFile {
            writer: Some(BufWriter::new(file)),
            tmp_path,
            target: self.path.clone(),
            committed: false,
        })
    }

    /// Generates a unique temporary file path in the same directory.
    ///
    /// Format: `filename.tmp.<randomhex>`
    fn random_tmp_path(&self) -> Result<PathBuf> {
        let mut buf = [0u8; 8]; // 64 bit entropy
        secure_random(&mut buf)?;

        let file_name = self
            .path
            .file_name()
            .ok_or_else(|| {
                Error::InvalidParameter(format!(
                    "output path has no file name: {}",
                    self.path.display()
                ))
            })?
            .to_string_lossy();

        let tmp_name = format!("{}.tmp.{}", file_name, hex::encode(buf));

        Ok(self.path.with_file_name(tmp_name))
    }
}

/// An in-progress output file. Dropping it discards everything written.
pub struct StagedFile {
    writer: Option<BufWriter<File>>,
    tmp_path: PathBuf,
    target: PathBuf,
    committed: bool,
}

impl StagedFile {
    /// Flushes, syncs, and atomically moves the file into place, then syncs
    /// the parent directory so the rename is persisted.
    pub fn commit(mut self) -> Result<()> {
        let Some(writer) = self.writer.take() else {
            return Err(Error::InvalidParameter("staged file already closed".into()));
        };
        let file = writer.into_inner().map_err(|e| e.into_error())?;
        file.sync_all()?; //fsync file
        drop(file);

        atomic_replace(&self.tmp_path, &self.target)?;
        self.committed = true;

        // fsync directory
        #[cfg(not(target_os = "windows"))]
        if let Some(parent) = self.target.parent() {
            let dir = if parent.as_os_str().is_empty() {
                File::open(".")?
            } else {
                File::open(parent)?
            };
            dir.sync_all()?;
        }

        Ok(())
    }
}

impl Write for StagedFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.writer.as_mut() {
            Some(w) => w.write(buf),
            None => Err(io::Error::other("staged file already closed")),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.writer.as_mut() {
            Some(w) => w.flush(),
            None => Ok(()),
        }
    }
}

impl Drop for StagedFile {
    fn drop(&mut self) {
        drop(self.writer.take());
        if !self.committed {
            let _ = fs::remove_file(&self.tmp_path);
        }
    }
}

/// Atomically replaces the target file with the temporary file.
///
/// Uses Windows `ReplaceFileW` API with `REPLACEFILE_WRITE_THROUGH` flag
/// when the target already exists.
#[cfg(target_os = "windows")]
fn atomic_replace(tmp_path: &Path, target: &Path) -> Result<()> {
    use std::ffi::OsStr;
    use std::os::windows::ffi::OsStrExt;
    use windows_sys::Win32::Storage::FileSystem::{REPLACEFILE_WRITE_THROUGH, ReplaceFileW};

    if !target.exists() {
        if let Err(e) = fs::rename(tmp_path, target) {
            let _ = fs::remove_file(tmp_path);
            return Err(e.into());
        }
        return Ok(());
    }

    fn to_wide(s: &OsStr) -> Vec<u16> {
        s.encode_wide().chain(std::iter::once(0)).collect()
    }

    let target_w = to_wide(target.as_os_str());
    let tmp_w = to_wide(tmp_path.as_os_str());

    // SAFETY:
    // - Strings are valid UTF-16 and null-terminated
    // - Pointers remain valid during the call
    // - Windows does not retain the pointers after return
    let result = unsafe {
        ReplaceFileW(
            target_w.as_ptr(),
            tmp_w.as_ptr(),
            std::ptr::null(),
            REPLACEFILE_WRITE_THROUGH,
            std::ptr::null(),
            std::ptr::null(),
        )
    };

    if result == 0 {
        let err = io::Error::last_os_error();
        let _ = fs::remove_file(tmp_path);
        return Err(err.into());
    }

    Ok(())
}

/// Atomically replaces the target file with the temporary file.
///
/// On Unix, `rename()` is atomic when both paths are on the same filesystem.
#[cfg(not(target_os = "windows"))]
fn atomic_replace(tmp_path: &Path, target: &Path) -> Result<()> {
    if let Err(e) = fs::rename(tmp_path, target) {
        let _ = fs::remove_file(tmp_path);
        return Err(e.into());
    }
    Ok(())
}
