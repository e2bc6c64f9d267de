//! SQLite-backed store of named, password-encrypted credentials.
//!
//! [`SecretVault`] owns the at-rest representation of every credential. Each
//! record is sealed under a key derived from the caller's unlock secret and
//! a per-record salt, so the vault itself never holds a master key.
//!
//! # Schema
//!
//! - `credentials`: one row per credential name: ciphertext plus the
//!   parameters needed to re-derive its key (`kdf`, `iterations`, `salt`,
//!   `nonce`).
//! - `preferences`: non-secret boolean flags (biometric unlock).
//!
//! # Atomicity
//!
//! Every write is a single `BEGIN IMMEDIATE` transaction on a connection
//! guarded by a mutex. A credential is therefore either absent or fully
//! written, and writes to the same name never interleave, whether they come
//! from this process or another one sharing the file.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, TransactionBehavior, params};

use crate::crypto;
use crate::error::{Result, VaultError};
use crate::secret::SecretBytes;

/// Well-known credential names.
pub mod names {
    pub const PASSWORD: &str = "password";
    pub const PRIVATE_KEY: &str = "privateKey";
    pub const PUBLIC_KEY: &str = "publicKey";
    pub const WALLET_SEED: &str = "walletSeed";
    pub const BIOMETRIC_PASSWORD: &str = "biometricPassword";
}

const PREF_BIOMETRIC_ENABLED: &str = "biometric_enabled";

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Tunables for newly written credentials.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VaultOptions {
    /// PBKDF2 iterations recorded with each new credential. Existing
    /// credentials keep the count they were written with.
    pub kdf_iterations: u32,
}

impl Default for VaultOptions {
    fn default() -> Self {
        Self {
            kdf_iterations: crypto::DEFAULT_KDF_ITERATIONS,
        }
    }
}

/// Parameters needed to re-derive a credential's key from its unlock secret.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptionParams {
    pub kdf: String,
    pub iterations: u32,
    pub salt: Vec<u8>,
    pub nonce: Vec<u8>,
}

/// A stored credential exactly as it sits at rest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    pub name: String,
    pub ciphertext: Vec<u8>,
    pub params: EncryptionParams,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Credential metadata without ciphertext, for listings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialSummary {
    pub name: String,
    pub kdf: String,
    pub iterations: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum WriteMode {
    Upsert,
    InsertNew,
}

/// Output of sealing a plaintext, computed before the connection is locked.
struct Sealed {
    ciphertext: Vec<u8>,
    nonce: [u8; crypto::NONCE_LEN_BYTES],
    salt: [u8; crypto::SALT_LEN],
    iterations: u32,
}

// ---------------------------------------------------------------------------
// SecretVault
// ---------------------------------------------------------------------------

/// Encrypted credential vault backed by SQLite.
///
/// Cloning is cheap; clones share one connection.
///
/// ```rust,no_run
/// # use keystead_vault::{SecretVault, VaultOptions};
/// # fn example() -> keystead_vault::Result<()> {
/// let vault = SecretVault::open("data/vault.db", VaultOptions::default())?;
///
/// vault.store("privateKey", b"key material", b"correcthorse")?;
/// let secret = vault.retrieve("privateKey", b"correcthorse")?;
/// assert!(secret.is_some());
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct SecretVault {
    conn: Arc<Mutex<Connection>>,
    options: VaultOptions,
}

impl SecretVault {
    /// Open (or create) a vault database at `path`.
    ///
    /// Runs schema migrations automatically.
    pub fn open(path: impl AsRef<Path>, options: VaultOptions) -> Result<Self> {
        let path = path.as_ref();
        tracing::info!(path = %path.display(), "opening vault database");

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        Self::configure_connection(&conn, true)?;

        let vault = Self::from_connection(conn, options)?;
        tracing::info!("vault database ready");
        Ok(vault)
    }

    /// Open an in-memory vault (useful for testing).
    pub fn open_in_memory(options: VaultOptions) -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::configure_connection(&conn, false)?;
        Self::from_connection(conn, options)
    }

    fn from_connection(conn: Connection, options: VaultOptions) -> Result<Self> {
        if options.kdf_iterations == 0 {
            return Err(VaultError::KeyDerivationFailed {
                reason: "iteration count must be non-zero".into(),
            });
        }

        Self::run_migrations(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            options,
        })
    }

    /// The options applied to new writes.
    pub fn options(&self) -> VaultOptions {
        self.options
    }

    fn configure_connection(conn: &Connection, on_disk: bool) -> Result<()> {
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        if on_disk {
            conn.pragma_update(None, "journal_mode", "WAL")?;
        }
        // FULL: a committed credential survives power loss.
        conn.pragma_update(None, "synchronous", "FULL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        Ok(())
    }

    fn run_migrations(conn: &Connection) -> Result<()> {
        tracing::debug!("running vault schema migrations");

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS credentials (
                name        TEXT PRIMARY KEY,
                ciphertext  BLOB NOT NULL,
                nonce       BLOB NOT NULL,
                salt        BLOB NOT NULL,
                kdf         TEXT NOT NULL,
                iterations  INTEGER NOT NULL CHECK(iterations > 0),
                created_at  INTEGER NOT NULL,
                updated_at  INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS preferences (
                key    TEXT PRIMARY KEY,
                value  INTEGER NOT NULL
            );",
        )
        .map_err(|e| VaultError::MigrationFailed {
            reason: e.to_string(),
        })?;

        tracing::debug!("vault schema migrations complete");
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| VaultError::Internal(format!("vault mutex poisoned: {e}")))
    }

    // -- Credential operations ----------------------------------------------

    /// Encrypt `plaintext` under a key derived from `secret` and write it as
    /// credential `name`, replacing any previous value atomically.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::Write`] if the write fails; in that case the
    /// previous value (or absence) is unchanged.
    pub fn store(&self, name: &str, plaintext: &[u8], secret: &[u8]) -> Result<()> {
        self.write(name, plaintext, secret, WriteMode::Upsert)
    }

    /// Like [`store`](Self::store), but never replaces an existing credential.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::AlreadyExists`] if `name` is already stored.
    pub fn store_new(&self, name: &str, plaintext: &[u8], secret: &[u8]) -> Result<()> {
        self.write(name, plaintext, secret, WriteMode::InsertNew)
    }

    fn write(&self, name: &str, plaintext: &[u8], secret: &[u8], mode: WriteMode) -> Result<()> {
        validate_name(name)?;

        // Key derivation is the slow part; do it before taking the lock.
        let sealed = self.seal(name, plaintext, secret)?;
        let now = Utc::now().timestamp();
        let write_err = |e: rusqlite::Error| VaultError::Write {
            name: name.to_string(),
            reason: e.to_string(),
        };

        let mut conn = self.lock()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(write_err)?;

        if mode == WriteMode::InsertNew {
            let exists: bool = tx
                .query_row(
                    "SELECT EXISTS(SELECT 1 FROM credentials WHERE name = ?1)",
                    params![name],
                    |row| row.get(0),
                )
                .map_err(write_err)?;

            if exists {
                return Err(VaultError::AlreadyExists {
                    name: name.to_string(),
                });
            }
        }

        tx.execute(
            "INSERT INTO credentials (name, ciphertext, nonce, salt, kdf, iterations, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)
             ON CONFLICT(name) DO UPDATE SET
                ciphertext = excluded.ciphertext,
                nonce      = excluded.nonce,
                salt       = excluded.salt,
                kdf        = excluded.kdf,
                iterations = excluded.iterations,
                updated_at = excluded.updated_at",
            params![
                name,
                sealed.ciphertext,
                sealed.nonce.as_slice(),
                sealed.salt.as_slice(),
                crypto::KDF_PBKDF2_SHA256,
                sealed.iterations,
                now,
            ],
        )
        .map_err(write_err)?;

        tx.commit().map_err(write_err)?;

        tracing::info!(name, iterations = sealed.iterations, "stored credential");
        Ok(())
    }

    fn seal(&self, name: &str, plaintext: &[u8], secret: &[u8]) -> Result<Sealed> {
        let iterations = self.options.kdf_iterations;
        let salt = crypto::random_salt()?;
        let key = crypto::derive_key(secret, &salt, iterations)?;
        let (nonce, ciphertext) = crypto::encrypt(plaintext, key.as_slice(), name.as_bytes())?;

        Ok(Sealed {
            ciphertext,
            nonce,
            salt,
            iterations,
        })
    }

    /// Decrypt credential `name` with `secret`.
    ///
    /// Returns `Ok(None)` when no such credential exists.
    ///
    /// # Errors
    ///
    /// - [`VaultError::Authentication`] when the credential exists but
    ///   `secret` does not open it.
    /// - [`VaultError::Read`] on storage failure.
    /// - [`VaultError::Corrupted`] when the stored parameters are malformed.
    pub fn retrieve(&self, name: &str, secret: &[u8]) -> Result<Option<SecretBytes>> {
        let Some(credential) = self.credential(name)? else {
            tracing::debug!(name, "credential absent");
            return Ok(None);
        };

        let nonce = credential.nonce_array()?;
        let key = crypto::derive_key(secret, &credential.params.salt, credential.params.iterations)?;

        let plaintext = crypto::decrypt(&nonce, &credential.ciphertext, key.as_slice(), name.as_bytes())
            .map_err(|_| {
                tracing::warn!(name, "credential authentication failed");
                VaultError::Authentication {
                    name: name.to_string(),
                }
            })?;

        tracing::debug!(name, "retrieved credential");
        Ok(Some(plaintext.into()))
    }

    /// Whether credential `name` exists. Never decrypts.
    pub fn has(&self, name: &str) -> Result<bool> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM credentials WHERE name = ?1)",
            params![name],
            |row| row.get(0),
        )
        .map_err(|e| VaultError::Read {
            name: name.to_string(),
            reason: e.to_string(),
        })
    }

    /// The raw stored record for `name`, if any.
    pub fn credential(&self, name: &str) -> Result<Option<Credential>> {
        let read_err = |e: rusqlite::Error| VaultError::Read {
            name: name.to_string(),
            reason: e.to_string(),
        };

        let row = {
            let conn = self.lock()?;
            conn.query_row(
                "SELECT name, ciphertext, nonce, salt, kdf, iterations, created_at, updated_at
                 FROM credentials WHERE name = ?1",
                params![name],
                |row| {
                    Ok(CredentialRow {
                        name: row.get(0)?,
                        ciphertext: row.get(1)?,
                        nonce: row.get(2)?,
                        salt: row.get(3)?,
                        kdf: row.get(4)?,
                        iterations: row.get(5)?,
                        created_at: row.get(6)?,
                        updated_at: row.get(7)?,
                    })
                },
            )
            .optional()
            .map_err(read_err)?
        };

        row.map(CredentialRow::into_credential).transpose()
    }

    /// List stored credentials without decrypting them, ordered by name.
    pub fn list(&self) -> Result<Vec<CredentialSummary>> {
        let read_err = |e: rusqlite::Error| VaultError::Read {
            name: "*".to_string(),
            reason: e.to_string(),
        };

        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT name, kdf, iterations, created_at, updated_at
                 FROM credentials ORDER BY name",
            )
            .map_err(read_err)?;

        let rows = stmt
            .query_map([], |row| {
                Ok(CredentialSummary {
                    name: row.get(0)?,
                    kdf: row.get(1)?,
                    iterations: row.get(2)?,
                    created_at: timestamp(row.get(3)?),
                    updated_at: timestamp(row.get(4)?),
                })
            })
            .map_err(read_err)?;

        let summaries = rows.collect::<std::result::Result<Vec<_>, _>>().map_err(read_err)?;

        tracing::debug!(count = summaries.len(), "listed credentials");
        Ok(summaries)
    }

    // -- Preferences --------------------------------------------------------

    /// Record whether biometric unlock was enabled by the user.
    pub fn set_biometric_enabled(&self, enabled: bool) -> Result<()> {
        self.set_flag(PREF_BIOMETRIC_ENABLED, enabled)
    }

    /// Whether biometric unlock was enabled. Defaults to `false`.
    pub fn biometric_enabled(&self) -> Result<bool> {
        Ok(self.flag(PREF_BIOMETRIC_ENABLED)?.unwrap_or(false))
    }

    fn set_flag(&self, key: &str, value: bool) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO preferences (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )
        .map_err(|e| VaultError::Write {
            name: key.to_string(),
            reason: e.to_string(),
        })?;

        tracing::debug!(key, value, "updated preference");
        Ok(())
    }

    fn flag(&self, key: &str) -> Result<Option<bool>> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT value FROM preferences WHERE key = ?1",
            params![key],
            |row| row.get(0),
        )
        .optional()
        .map_err(|e| VaultError::Read {
            name: key.to_string(),
            reason: e.to_string(),
        })
    }
}

fn validate_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(VaultError::InvalidName {
            reason: "credential name must not be empty".into(),
        });
    }
    Ok(())
}

fn timestamp(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).unwrap_or_default()
}

impl Credential {
    fn nonce_array(&self) -> Result<[u8; crypto::NONCE_LEN_BYTES]> {
        <[u8; crypto::NONCE_LEN_BYTES]>::try_from(self.params.nonce.as_slice()).map_err(|_| {
            VaultError::Corrupted {
                name: self.name.clone(),
                reason: format!(
                    "stored nonce is {} bytes, expected {}",
                    self.params.nonce.len(),
                    crypto::NONCE_LEN_BYTES
                ),
            }
        })
    }
}

// ---------------------------------------------------------------------------
// Internal row type (keeps rusqlite details out of the public API)
// ---------------------------------------------------------------------------

struct CredentialRow {
    name: String,
    ciphertext: Vec<u8>,
    nonce: Vec<u8>,
    salt: Vec<u8>,
    kdf: String,
    iterations: i64,
    created_at: i64,
    updated_at: i64,
}

impl CredentialRow {
    fn into_credential(self) -> Result<Credential> {
        if self.kdf != crypto::KDF_PBKDF2_SHA256 {
            return Err(VaultError::Corrupted {
                name: self.name,
                reason: format!("unsupported kdf `{}`", self.kdf),
            });
        }

        let iterations = u32::try_from(self.iterations)
            .ok()
            .filter(|n| *n > 0)
            .ok_or_else(|| VaultError::Corrupted {
                name: self.name.clone(),
                reason: format!("invalid iteration count {}", self.iterations),
            })?;

        Ok(Credential {
            name: self.name,
            ciphertext: self.ciphertext,
            params: EncryptionParams {
                kdf: self.kdf,
                iterations,
                salt: self.salt,
                nonce: self.nonce,
            },
            created_at: timestamp(self.created_at),
            updated_at: timestamp(self.updated_at),
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
