//! Device-bound secret for credentials that are not protected by the user's
//! password.
//!
//! The `password` and `publicKey` credentials must be readable without the
//! password itself, so they are sealed under a per-installation device key
//! instead. A [`DeviceKeyProvider`] hands that key to the vault:
//!
//! - [`FileDeviceKey`] keeps a random 256-bit key in a file, wrapped with a
//!   key derived from machine-specific data (hostname, username) and an
//!   application salt.
//! - [`StaticDeviceKey`] holds a key in memory, for tests and embedders that
//!   obtain the key from their own platform keystore.
//!
//! The file-based provider is weaker than an OS keystore: anyone with access
//! to the same machine account can re-derive the wrapping key. The key file
//! is written with mode 0600 on Unix.

use std::path::{Path, PathBuf};

use crate::crypto;
use crate::error::{Result, VaultError};
use crate::secret::SecretBytes;

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Source of the device key.
pub trait DeviceKeyProvider: Send + Sync {
    /// Return the device key, creating and persisting one on first use.
    fn load_or_create(&self) -> Result<SecretBytes>;

    /// Whether a device key has already been created.
    fn exists(&self) -> Result<bool>;
}

// ---------------------------------------------------------------------------
// In-memory provider
// ---------------------------------------------------------------------------

/// Device key held in memory.
#[derive(Debug, Clone)]
pub struct StaticDeviceKey(SecretBytes);

impl StaticDeviceKey {
    pub fn new(key: SecretBytes) -> Self {
        Self(key)
    }

    /// Generate a fresh random key.
    pub fn generate() -> Result<Self> {
        Ok(Self(crypto::random_bytes(crypto::KEY_LEN)?.into()))
    }
}

impl DeviceKeyProvider for StaticDeviceKey {
    fn load_or_create(&self) -> Result<SecretBytes> {
        Ok(self.0.clone())
    }

    fn exists(&self) -> Result<bool> {
        Ok(true)
    }
}

// ---------------------------------------------------------------------------
// File-based provider
// ---------------------------------------------------------------------------

/// Application salt mixed into the machine-derived wrapping key. Changing it
/// invalidates every existing device key file.
const APP_SALT: &[u8; crypto::SALT_LEN] = b"keystead-device-key-v1\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00";

/// PBKDF2 iterations for the wrapping key.
const WRAP_KDF_ITERATIONS: u32 = 100_000;

/// Associated data bound to the wrapped key.
const WRAP_AAD: &[u8] = b"keystead-device-key";

/// Device key stored in a file, wrapped with a machine-derived key.
///
/// File layout (binary):
/// ```text
/// [12 bytes: AES-256-GCM nonce]
/// [48 bytes: AES-256-GCM ciphertext of the 32-byte key + 16-byte tag]
/// ```
pub struct FileDeviceKey {
    key_file: PathBuf,
}

impl FileDeviceKey {
    /// Create a provider that keeps its key at `key_file`. The file is
    /// created on the first [`load_or_create`](DeviceKeyProvider::load_or_create).
    pub fn new(key_file: impl Into<PathBuf>) -> Self {
        Self {
            key_file: key_file.into(),
        }
    }

    /// Default key file location: `<data_dir>/device.key`.
    pub fn default_path(data_dir: &Path) -> PathBuf {
        data_dir.join("device.key")
    }

    /// Derive the wrapping key from hostname, username and [`APP_SALT`].
    fn wrapping_key(&self) -> Result<zeroize::Zeroizing<[u8; crypto::KEY_LEN]>> {
        let hostname = Self::hostname();
        let username = std::env::var("USER")
            .or_else(|_| std::env::var("USERNAME"))
            .unwrap_or_else(|_| "unknown-user".into());

        let mut material = Vec::with_capacity(hostname.len() + username.len() + APP_SALT.len());
        material.extend_from_slice(hostname.as_bytes());
        material.extend_from_slice(username.as_bytes());
        material.extend_from_slice(APP_SALT);

        crypto::derive_key(&material, APP_SALT, WRAP_KDF_ITERATIONS)
    }

    fn hostname() -> String {
        #[cfg(unix)]
        {
            std::fs::read_to_string("/etc/hostname")
                .map(|s| s.trim().to_string())
                .or_else(|_| std::env::var("HOSTNAME"))
                .or_else(|_| std::env::var("HOST"))
                .unwrap_or_else(|_| "unknown-host".into())
        }

        #[cfg(not(unix))]
        {
            std::env::var("COMPUTERNAME")
                .or_else(|_| std::env::var("HOSTNAME"))
                .unwrap_or_else(|_| "unknown-host".into())
        }
    }

    fn read(&self) -> Result<SecretBytes> {
        let data = std::fs::read(&self.key_file)?;

        if data.len() != crypto::NONCE_LEN_BYTES + crypto::KEY_LEN + crypto::TAG_LEN {
            return Err(VaultError::DeviceKeyUnavailable {
                reason: format!(
                    "device key file {} has unexpected size {}",
                    self.key_file.display(),
                    data.len()
                ),
            });
        }

        let (nonce_bytes, ciphertext) = data.split_at(crypto::NONCE_LEN_BYTES);
        let mut nonce = [0u8; crypto::NONCE_LEN_BYTES];
        nonce.copy_from_slice(nonce_bytes);

        let wrapping_key = self.wrapping_key()?;
        let key = crypto::decrypt(&nonce, ciphertext, wrapping_key.as_slice(), WRAP_AAD).map_err(|_| {
            VaultError::DeviceKeyUnavailable {
                reason: "device key file cannot be unwrapped on this machine".into(),
            }
        })?;

        tracing::debug!(path = %self.key_file.display(), "loaded device key");
        Ok(key.into())
    }

    fn create(&self) -> Result<SecretBytes> {
        let key = crypto::random_bytes(crypto::KEY_LEN)?;
        let wrapping_key = self.wrapping_key()?;
        let (nonce, ciphertext) = crypto::encrypt(&key, wrapping_key.as_slice(), WRAP_AAD)?;

        let mut data = Vec::with_capacity(crypto::NONCE_LEN_BYTES + ciphertext.len());
        data.extend_from_slice(&nonce);
        data.extend_from_slice(&ciphertext);

        if let Some(parent) = self.key_file.parent() {
            std::fs::create_dir_all(parent)?;
        }

        // Each writer gets its own temp file; the key file is then published
        // with a hard link, which fails if another writer got there first.
        let temp_path = self.unique_temp_path()?;
        let published = self.publish(&temp_path, &data);
        let _ = std::fs::remove_file(&temp_path);

        match published {
            Ok(()) => {
                tracing::info!(path = %self.key_file.display(), "created device key");
                Ok(key.into())
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                tracing::debug!(path = %self.key_file.display(), "device key created concurrently; using existing key");
                self.read()
            }
            Err(e) => Err(e.into()),
        }
    }

    fn publish(&self, temp_path: &Path, data: &[u8]) -> std::io::Result<()> {
        std::fs::write(temp_path, data)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(temp_path, std::fs::Permissions::from_mode(0o600))?;
        }

        std::fs::hard_link(temp_path, &self.key_file)
    }

    fn unique_temp_path(&self) -> Result<PathBuf> {
        let suffix: String = crypto::random_bytes(8)?
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect();
        Ok(self
            .key_file
            .with_extension(format!("key.{}.{suffix}.tmp", std::process::id())))
    }
}

impl DeviceKeyProvider for FileDeviceKey {
    fn load_or_create(&self) -> Result<SecretBytes> {
        if self.key_file.exists() {
            self.read()
        } else {
            self.create()
        }
    }

    fn exists(&self) -> Result<bool> {
        Ok(self.key_file.exists())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
