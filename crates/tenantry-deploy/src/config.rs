//! Deployer configuration.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use tenantry_core::error::{ConfigError, Error};
use tenantry_core::{KEY_LEN, Result};

/// Environment variable overriding [`DeployConfig::batch_size`].
pub const ENV_BATCH_SIZE: &str = "TENANTRY_BATCH_SIZE";

/// Environment variable holding the base64 column encryption key.
pub const ENV_ENCRYPTION_KEY: &str = "TENANTRY_ENCRYPTION_KEY";

/// Default maximum number of rows per multi-row INSERT.
pub const DEFAULT_BATCH_SIZE: usize = 1000;

/// Configuration for a [`Deployer`](crate::Deployer).
#[derive(Clone)]
pub struct DeployConfig {
    /// Maximum rows per INSERT statement and ids per orphan DELETE.
    pub batch_size: usize,
    /// Key for encrypted columns (32 bytes for AES-256-GCM).
    pub encryption_key: Option<Vec<u8>>,
    /// Reject records whose required fields are missing or empty.
    pub validate_required: bool,
}

impl std::fmt::Debug for DeployConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeployConfig")
            .field("batch_size", &self.batch_size)
            .field(
                "encryption_key",
                &self.encryption_key.as_ref().map(|_| "<redacted>"),
            )
            .field("validate_required", &self.validate_required)
            .finish()
    }
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            encryption_key: None,
            validate_required: true,
        }
    }
}

impl DeployConfig {
    /// Create the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the batch size (builder pattern). Zero is raised to one.
    #[must_use]
    pub fn batch_size(mut self, size: usize) -> Self {
        self.batch_size = size.max(1);
        self
    }

    /// Set the column encryption key (builder pattern).
    #[must_use]
    pub fn encryption_key(mut self, key: impl Into<Vec<u8>>) -> Self {
        self.encryption_key = Some(key.into());
        self
    }

    /// Enable or disable required-field validation (builder pattern).
    #[must_use]
    pub fn validate_required(mut self, value: bool) -> Self {
        self.validate_required = value;
        self
    }

    /// Defaults overridden by `TENANTRY_BATCH_SIZE` and `TENANTRY_ENCRYPTION_KEY`.
    #[allow(clippy::result_large_err)]
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an injectable variable source.
    #[allow(clippy::result_large_err)]
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(raw) = lookup(ENV_BATCH_SIZE) {
            let size: usize = raw.trim().parse().map_err(|_| {
                Error::Config(ConfigError::new(format!(
                    "{} must be a positive integer, got `{}`",
                    ENV_BATCH_SIZE, raw
                )))
            })?;
            config = config.batch_size(size);
        }

        if let Some(raw) = lookup(ENV_ENCRYPTION_KEY) {
            let key = BASE64.decode(raw.trim()).map_err(|e| {
                Error::Config(ConfigError::new(format!(
                    "{} is not valid base64: {}",
                    ENV_ENCRYPTION_KEY, e
                )))
            })?;
            if key.len() != KEY_LEN {
                return Err(Error::Config(ConfigError::new(format!(
                    "{} must decode to {} bytes, got {}",
                    ENV_ENCRYPTION_KEY,
                    KEY_LEN,
                    key.len()
                ))));
            }
            config.encryption_key = Some(key);
        }

        tracing::debug!(
            batch_size = config.batch_size,
            has_key = config.encryption_key.is_some(),
            "Loaded deploy configuration"
        );
        Ok(config)
    }
}
