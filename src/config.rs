//! Runtime configuration loaded from a JSON file.

use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::crypto::{DEFAULT_CHUNK_SIZE, KdfParams};
use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Plaintext bytes processed per chunk when streaming files.
    pub chunk_size: usize,
    /// Argon2id parameters for password-derived and wrapping keys. Containers
    /// do not record these, so decryption must use the same values.
    pub kdf: KdfParams,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            kdf: KdfParams::default(),
        }
    }
}

impl Config {
    /// Loads `path`, falling back to defaults when the file does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }

        let raw = std::fs::read(path)?;
        let config: Config = serde_json::from_slice(&raw)
            .map_err(|e| Error::Config(format!("{}: {e}", path.display())))?;
        config.validate()?;

        debug!(path = %path.display(), chunk_size = config.chunk_size, "loaded config");
        Ok(config)
    }

    /// Loads the config from `path`, or from [`default_config_path`].
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) => Self::load(p),
            None => Self::load(&default_config_path()?),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.chunk_size < 64 || self.chunk_size % 64 != 0 {
            return Err(Error::Config(format!(
                "chunk_size must be a positive multiple of 64, got {}",
                self.chunk_size
            )));
        }
        self.kdf
            .validate()
            .map_err(|e| Error::Config(format!("kdf: {e}")))
    }
}

pub fn default_config_path() -> Result<PathBuf> {
    let project_dirs = ProjectDirs::from("", "", "sealfile")
        .ok_or_else(|| Error::Config("could not determine platform directories".into()))?;

    Ok(project_dirs.config_dir().join("config.json"))
}
