//! Signer configuration.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{SignerError, SignerResult};
use crate::provider::{MAX_KEY_BITS, MIN_KEY_BITS};

/// Container name used when none is configured.
pub const DEFAULT_CONTAINER_NAME: &str = "license++sign";

/// Key length used when none is configured.
pub const DEFAULT_KEY_BITS: u32 = 2048;

/// Settings for opening a [`LicenseSigner`](crate::LicenseSigner).
///
/// Every field is optional in TOML:
///
/// ```toml
/// container_name = "license++sign"
/// key_bits = 2048
/// provider_root = "/var/lib/licsign/containers"
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SignerConfig {
    /// Name of the key container to open or create.
    pub container_name: String,
    /// RSA modulus length for generated key pairs.
    pub key_bits: u32,
    /// Directory the software provider keeps containers in.
    pub provider_root: PathBuf,
}

impl Default for SignerConfig {
    fn default() -> Self {
        Self {
            container_name: DEFAULT_CONTAINER_NAME.to_string(),
            key_bits: DEFAULT_KEY_BITS,
            provider_root: default_provider_root(),
        }
    }
}

impl SignerConfig {
    /// Parses and validates a TOML document.
    pub fn from_toml_str(s: &str) -> SignerResult<Self> {
        let config: Self = toml::from_str(s).map_err(|e| SignerError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a TOML file.
    pub fn load(path: &Path) -> SignerResult<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    /// Checks the container name and key length.
    pub fn validate(&self) -> SignerResult<()> {
        if self.container_name.trim().is_empty() {
            return Err(SignerError::Config("container_name must not be empty".into()));
        }
        if !(MIN_KEY_BITS..=MAX_KEY_BITS).contains(&self.key_bits) || self.key_bits % 16 != 0 {
            return Err(SignerError::Config(format!(
                "key_bits must be a multiple of 16 between {MIN_KEY_BITS} and {MAX_KEY_BITS}, got {}",
                self.key_bits
            )));
        }
        Ok(())
    }
}

/// Platform data directory for containers, falling back to the working directory.
fn default_provider_root() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("licsign")
        .join("containers")
}
