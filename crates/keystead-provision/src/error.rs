//! Provisioning error types.
//!
//! Errors split into two families:
//!
//! - **Fatal**: [`ProvisionError`]. Returned as the `Err` of
//!   `create_account`; no success report exists.
//! - **Non-fatal**: [`SeedError`], [`PublishError`],
//!   [`BiometricEnrollError`]. Carried inside the success report so callers
//!   can show a degraded account.

use std::time::Duration;

use keystead_vault::VaultError;

use crate::machine::ProvisioningState;

// ---------------------------------------------------------------------------
// Fatal
// ---------------------------------------------------------------------------

/// Failure that aborts account creation.
#[derive(Debug, thiserror::Error)]
pub enum ProvisionError {
    /// Input rejected before any side effect.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// No keypair could be generated.
    #[error("key generation failed: {0}")]
    KeyGeneration(#[from] KeyError),

    /// Identity credentials could not be persisted.
    #[error("failed to persist identity: {0}")]
    Vault(#[from] VaultError),

    /// The state machine reached a step without the data it needs.
    #[error("invalid provisioning state: {state}")]
    InvalidState { state: ProvisioningState },
}

/// Precondition failures, checked before any keys are generated.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("username is required")]
    EmptyUsername,

    #[error("password is required")]
    EmptyPassword,
}

/// Keypair generation or use failed.
#[derive(Debug, thiserror::Error)]
pub enum KeyError {
    /// The system entropy source failed.
    #[error("entropy source unavailable: {reason}")]
    Entropy { reason: String },

    /// Key material could not be parsed.
    #[error("invalid key material: {reason}")]
    InvalidKey { reason: String },
}

// ---------------------------------------------------------------------------
// Non-fatal
// ---------------------------------------------------------------------------

/// Wallet seed provisioning failed.
#[derive(Debug, thiserror::Error)]
pub enum SeedError {
    /// The wallet collaborator could not produce a seed.
    #[error("seed derivation failed: {0}")]
    Derivation(#[from] DeriverError),

    /// Reading or writing the seed credential failed. Includes the
    /// wrong-password case, see [`SeedError::is_authentication`].
    #[error("seed storage failed: {0}")]
    Vault(#[from] VaultError),
}

impl SeedError {
    /// Whether the password does not open an existing seed.
    pub fn is_authentication(&self) -> bool {
        matches!(self, Self::Vault(e) if e.is_authentication())
    }
}

/// Error reported by a [`WalletSeedDeriver`](crate::collaborators::WalletSeedDeriver).
#[derive(Debug, thiserror::Error)]
#[error("{reason}")]
pub struct DeriverError {
    pub reason: String,
}

impl DeriverError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Publishing the public profile failed.
#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    /// The publisher did not finish within the configured bound.
    #[error("publish timed out after {after:?}")]
    Timeout { after: Duration },

    /// The publisher refused or failed to deliver the profile.
    #[error("publish rejected: {reason}")]
    Rejected { reason: String },

    /// The profile document could not be signed.
    #[error("failed to sign profile: {0}")]
    Signing(#[from] KeyError),

    #[error("publish io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("publish serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Biometric enrollment failed after the user agreed to it.
#[derive(Debug, thiserror::Error)]
pub enum BiometricEnrollError {
    /// The biometric prompt itself failed.
    #[error("biometric prompt failed: {reason}")]
    Prompt { reason: String },

    /// Storing the biometric-gated password copy failed.
    #[error("failed to store biometric credential: {0}")]
    Vault(#[from] VaultError),
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Configuration loading or validation failed.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {reason}")]
    Read { path: String, reason: String },

    #[error("failed to parse config: {reason}")]
    Parse { reason: String },

    #[error("invalid config value `{key}`: {reason}")]
    Invalid { key: String, reason: String },
}

/// Convenience alias for fatal provisioning results.
pub type Result<T> = std::result::Result<T, ProvisionError>;
