//! Host configuration.
//!
//! Loaded from an optional TOML file, then overridden from `KEYSTEAD_*`
//! environment variables:
//!
//! ```toml
//! data_dir = "/var/lib/keystead"
//! vault_file = "vault.db"
//! kdf_iterations = 600000
//! publish_timeout_secs = 10
//! publish_enabled = true
//! offer_biometrics = true
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use keystead_vault::VaultOptions;
use keystead_vault::crypto::DEFAULT_KDF_ITERATIONS;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::orchestrator::OrchestratorSettings;

pub const ENV_DATA_DIR: &str = "KEYSTEAD_DATA_DIR";
pub const ENV_KDF_ITERATIONS: &str = "KEYSTEAD_KDF_ITERATIONS";
pub const ENV_PUBLISH_TIMEOUT_SECS: &str = "KEYSTEAD_PUBLISH_TIMEOUT_SECS";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvisionConfig {
    /// Directory holding the vault, the device key and the profile outbox.
    pub data_dir: PathBuf,
    /// Vault file name, relative to `data_dir`.
    pub vault_file: String,
    /// PBKDF2 iterations for newly written credentials.
    pub kdf_iterations: u32,
    pub publish_timeout_secs: u64,
    pub publish_enabled: bool,
    pub offer_biometrics: bool,
}

impl Default for ProvisionConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            vault_file: "vault.db".into(),
            kdf_iterations: DEFAULT_KDF_ITERATIONS,
            publish_timeout_secs: 10,
            publish_enabled: true,
            offer_biometrics: true,
        }
    }
}

impl ProvisionConfig {
    /// Load from `path`. A missing file, or no path at all, yields defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let Some(path) = path else {
            return Ok(Self::default());
        };

        match std::fs::read_to_string(path) {
            Ok(raw) => Self::from_toml_str(&raw),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "config file not found, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(ConfigError::Read {
                path: path.display().to_string(),
                reason: e.to_string(),
            }),
        }
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        toml::from_str(raw).map_err(|e| ConfigError::Parse {
            reason: e.to_string(),
        })
    }

    /// Apply `KEYSTEAD_*` overrides. `lookup` is usually
    /// `|key| std::env::var(key).ok()`.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dir) = lookup(ENV_DATA_DIR) {
            self.data_dir = PathBuf::from(dir);
        }
        if let Some(raw) = lookup(ENV_KDF_ITERATIONS) {
            self.kdf_iterations = parse_number(ENV_KDF_ITERATIONS, &raw)?;
        }
        if let Some(raw) = lookup(ENV_PUBLISH_TIMEOUT_SECS) {
            self.publish_timeout_secs = parse_number(ENV_PUBLISH_TIMEOUT_SECS, &raw)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.kdf_iterations == 0 {
            return Err(invalid("kdf_iterations", "must be greater than zero"));
        }
        if self.publish_timeout_secs == 0 {
            return Err(invalid("publish_timeout_secs", "must be greater than zero"));
        }
        if self.vault_file.trim().is_empty() {
            return Err(invalid("vault_file", "must not be empty"));
        }
        Ok(())
    }

    pub fn vault_path(&self) -> PathBuf {
        self.data_dir.join(&self.vault_file)
    }

    pub fn device_key_path(&self) -> PathBuf {
        keystead_vault::FileDeviceKey::default_path(&self.data_dir)
    }

    pub fn outbox_dir(&self) -> PathBuf {
        self.data_dir.join("outbox")
    }

    pub fn vault_options(&self) -> VaultOptions {
        VaultOptions {
            kdf_iterations: self.kdf_iterations,
        }
    }

    pub fn orchestrator_settings(&self) -> OrchestratorSettings {
        OrchestratorSettings {
            publish_timeout: Duration::from_secs(self.publish_timeout_secs),
            offer_biometrics: self.offer_biometrics,
        }
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
        key: key.to_string(),
        reason: e.to_string(),
    })
}

fn invalid(key: &str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        key: key.to_string(),
        reason: reason.to_string(),
    }
}
