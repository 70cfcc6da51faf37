//! Volume configuration
//!
//! ```yaml
//! mode: cbc-essiv
//! key:
//!   source: env
//!   var: CRYPTBDEV_KEY
//! ```
//!
//! `CRYPTBDEV_MODE` and `CRYPTBDEV_KEY` override whatever a file says.

use crate::error::{EncryptionError, Result};
use crate::key::{VolumeKey, KEY_ENV_VAR};
use crate::mode::IvMode;
use serde::{Deserialize, Serialize};
use std::path::Path;
use zeroize::Zeroize;

/// Environment variable selecting the IV mode
pub const MODE_ENV_VAR: &str = "CRYPTBDEV_MODE";

/// Where the volume key comes from
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(tag = "source", rename_all = "kebab-case")]
pub enum KeySource {
    /// Fresh random key (scratch volumes only)
    #[default]
    Generate,
    /// Hex-encoded key inline
    Hex { value: String },
    /// Hex-encoded key in an environment variable
    Env { var: String },
}

impl KeySource {
    pub fn resolve(&self) -> Result<VolumeKey> {
        match self {
            KeySource::Generate => Ok(VolumeKey::generate()),
            KeySource::Hex { value } => VolumeKey::from_hex(value),
            KeySource::Env { var } => VolumeKey::from_env(var),
        }
    }

    /// Whether the key will be the same next time the volume is opened.
    pub fn is_persistent(&self) -> bool {
        !matches!(self, KeySource::Generate)
    }
}

impl Drop for KeySource {
    fn drop(&mut self) {
        if let KeySource::Hex { value } = self {
            value.zeroize();
        }
    }
}

impl std::fmt::Debug for KeySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KeySource::Generate => f.write_str("Generate"),
            KeySource::Hex { .. } => f.debug_struct("Hex").field("value", &"[REDACTED]").finish(),
            KeySource::Env { var } => f.debug_struct("Env").field("var", var).finish(),
        }
    }
}

/// Settings needed to open an encrypted volume
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct CryptConfig {
    pub mode: IvMode,
    pub key: KeySource,
}

impl CryptConfig {
    pub fn new(mode: IvMode, key: KeySource) -> Self {
        Self { mode, key }
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            EncryptionError::InvalidConfiguration(format!(
                "cannot read {}: {e}",
                path.display()
            ))
        })?;
        Self::from_yaml_str(&text)
    }

    /// Defaults with environment overrides applied.
    pub fn from_env() -> Result<Self> {
        Self::default().with_env_overrides()
    }

    /// Apply `CRYPTBDEV_MODE` / `CRYPTBDEV_KEY` when they are set.
    pub fn with_env_overrides(mut self) -> Result<Self> {
        if let Ok(mode) = std::env::var(MODE_ENV_VAR) {
            self.mode = mode.parse()?;
        }
        if std::env::var_os(KEY_ENV_VAR).is_some() {
            self.key = KeySource::Env {
                var: KEY_ENV_VAR.to_string(),
            };
        }
        Ok(self)
    }

    pub fn resolve_key(&self) -> Result<VolumeKey> {
        self.key.resolve()
    }
}
