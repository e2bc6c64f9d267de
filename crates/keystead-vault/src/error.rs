//! Vault error types.
//!
//! Every public API in this crate returns [`VaultError`]. Callers rely on the
//! split between "absent" (an `Ok(None)` from `retrieve`) and
//! [`VaultError::Authentication`] to decide whether to create a secret or
//! re-prompt for a password, so the two must never be merged.

/// Unified error type for the Keystead credential vault.
#[derive(Debug, thiserror::Error)]
pub enum VaultError {
    // -- Crypto errors ------------------------------------------------------
    /// Encryption failed (e.g. invalid key length, ring internal error).
    #[error("encryption failed: {reason}")]
    EncryptionFailed { reason: String },

    /// Low-level decryption failure. The store maps this to
    /// [`VaultError::Authentication`] for named credentials.
    #[error("decryption failed: {reason}")]
    DecryptionFailed { reason: String },

    /// Key derivation failed (zero iterations, no entropy for a salt).
    #[error("key derivation failed: {reason}")]
    KeyDerivationFailed { reason: String },

    // -- Credential errors --------------------------------------------------
    /// The unlock secret does not open an existing credential.
    #[error("authentication failed for credential `{name}`")]
    Authentication { name: String },

    /// An insert-only write found the credential already present.
    #[error("credential already exists: `{name}`")]
    AlreadyExists { name: String },

    /// Writing a credential to storage failed. Nothing was persisted.
    #[error("failed to write credential `{name}`: {reason}")]
    Write { name: String, reason: String },

    /// Reading a credential from storage failed.
    #[error("failed to read credential `{name}`: {reason}")]
    Read { name: String, reason: String },

    /// A stored record has malformed encryption parameters.
    #[error("credential `{name}` is corrupted: {reason}")]
    Corrupted { name: String, reason: String },

    /// Credential names must be non-empty.
    #[error("invalid credential name: {reason}")]
    InvalidName { reason: String },

    // -- Device key errors --------------------------------------------------
    /// The device key could not be loaded or created.
    #[error("device key unavailable: {reason}")]
    DeviceKeyUnavailable { reason: String },

    // -- Store errors -------------------------------------------------------
    /// Database schema migration failed.
    #[error("migration failed: {reason}")]
    MigrationFailed { reason: String },

    // -- Underlying errors --------------------------------------------------
    /// SQLite error from `rusqlite` outside a credential read or write.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// I/O error from the filesystem (device key file operations, etc.).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    // -- Generic ------------------------------------------------------------
    /// Catch-all for unexpected internal errors. Prefer a typed variant.
    #[error("internal vault error: {0}")]
    Internal(String),
}

impl VaultError {
    /// Whether this error means "wrong password for an existing credential".
    pub fn is_authentication(&self) -> bool {
        matches!(self, Self::Authentication { .. })
    }
}

/// Convenience alias used throughout the vault crate.
pub type Result<T> = std::result::Result<T, VaultError>;
