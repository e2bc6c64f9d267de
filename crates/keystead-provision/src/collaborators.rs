//! Interfaces to the collaborators the provisioning pipeline consumes, plus
//! the default implementations used by the CLI host.
//!
//! Every collaborator is an async trait object so hosts can plug in their
//! own wallet library, profile publisher, biometric sensor and dialog layer.

use std::path::PathBuf;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use keystead_vault::{SecretBytes, crypto};
use serde::{Deserialize, Serialize};

use crate::error::{BiometricEnrollError, DeriverError, PublishError};
use crate::identity::Identity;

// ---------------------------------------------------------------------------
// Supporting types
// ---------------------------------------------------------------------------

/// Opaque wallet seed material.
#[derive(Debug, Clone)]
pub struct WalletSeed(SecretBytes);

impl WalletSeed {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(SecretBytes::new(bytes))
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

/// Public profile published alongside a new identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub display_name: String,
    pub handle: String,
}

impl Profile {
    /// Profile for a freshly created account: the username serves as both
    /// display name and handle.
    pub fn for_username(username: &str) -> Self {
        Self {
            display_name: username.to_string(),
            handle: username.to_string(),
        }
    }
}

/// Result of a biometric enrollment prompt.
#[derive(Debug, Clone)]
pub enum Enrollment {
    /// The user enrolled; the secret unlocks biometric-gated credentials.
    Accepted(SecretBytes),
    /// The user cancelled at the sensor prompt.
    Declined,
}

/// A yes/no question shown to the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub title: String,
    pub description: String,
}

impl Prompt {
    /// The biometric opt-in question asked after account creation.
    pub fn biometric_opt_in() -> Self {
        Self {
            title: "Easy login".into(),
            description: "Would you like to use biometrics to login?".into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// Source of wallet seeds.
#[async_trait]
pub trait WalletSeedDeriver: Send + Sync {
    /// Produce a new seed, independent of every previous one.
    async fn generate(&self) -> Result<WalletSeed, DeriverError>;
}

/// Best-effort publication of a new identity's public profile.
#[async_trait]
pub trait IdentityPublisher: Send + Sync {
    async fn publish(&self, identity: &Identity, profile: &Profile) -> Result<(), PublishError>;
}

/// Platform biometric sensor.
#[async_trait]
pub trait BiometricCapability: Send + Sync {
    async fn is_available(&self) -> bool;

    async fn prompt_enroll(&self) -> Result<Enrollment, BiometricEnrollError>;
}

/// Dialog layer for yes/no questions.
#[async_trait]
pub trait UserConfirmationDialog: Send + Sync {
    async fn confirm(&self, prompt: &Prompt) -> bool;
}

// ---------------------------------------------------------------------------
// Default implementations
// ---------------------------------------------------------------------------

/// Seed entropy length, matching a 24-word mnemonic.
pub const DEFAULT_SEED_LEN: usize = 32;

/// Seeds drawn directly from the system CSPRNG.
#[derive(Debug, Clone)]
pub struct RandomSeedDeriver {
    len: usize,
}

impl RandomSeedDeriver {
    pub fn new(len: usize) -> Self {
        Self { len }
    }
}

impl Default for RandomSeedDeriver {
    fn default() -> Self {
        Self::new(DEFAULT_SEED_LEN)
    }
}

#[async_trait]
impl WalletSeedDeriver for RandomSeedDeriver {
    async fn generate(&self) -> Result<WalletSeed, DeriverError> {
        if self.len == 0 {
            return Err(DeriverError::new("seed length must be non-zero"));
        }
        let bytes = crypto::random_bytes(self.len).map_err(|e| DeriverError::new(e.to_string()))?;
        Ok(WalletSeed(bytes.into()))
    }
}

/// Signed profile document written by [`OutboxPublisher`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileDocument {
    /// Base64 Ed25519 public key of the author.
    pub public_key: String,
    /// Unix seconds.
    pub created_at: i64,
    /// JSON-encoded [`Profile`]; the exact bytes that were signed.
    pub content: String,
    /// Base64 Ed25519 signature over `content`.
    pub signature: String,
}

impl ProfileDocument {
    /// Whether `signature` is valid for `content` under `public_key`.
    pub fn verify(&self) -> bool {
        let (Ok(public_key), Ok(signature)) =
            (STANDARD.decode(&self.public_key), STANDARD.decode(&self.signature))
        else {
            return false;
        };
        Identity::verify_signature(&public_key, self.content.as_bytes(), &signature)
    }
}

/// Temp documents older than this are leftovers of a cancelled publish.
const STALE_TEMP_AGE: Duration = Duration::from_secs(60);

/// Publisher that signs the profile and drops it into a local outbox
/// directory, one file per identity, for a relay client to pick up.
///
/// Documents are written to `<name>.json.tmp` and renamed into place. A
/// publish cancelled by the orchestrator's timeout can leave the temp file
/// behind; each publish removes such files once they are a minute old.
#[derive(Debug, Clone)]
pub struct OutboxPublisher {
    dir: PathBuf,
}

impl OutboxPublisher {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Path of the document for `public_key`.
    pub fn document_path(&self, public_key: &[u8]) -> PathBuf {
        self.dir
            .join(format!("{}.json", URL_SAFE_NO_PAD.encode(public_key)))
    }

    /// Remove stale `*.json.tmp` files. Returns how many were removed.
    pub async fn sweep_stale_temps(&self) -> std::io::Result<usize> {
        let mut removed = 0;
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e),
        };

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if !path.to_string_lossy().ends_with(".json.tmp") {
                continue;
            }
            let modified = entry.metadata().await?.modified()?;
            let age = SystemTime::now()
                .duration_since(modified)
                .unwrap_or_default();
            if age >= STALE_TEMP_AGE {
                tokio::fs::remove_file(&path).await?;
                tracing::debug!(path = %path.display(), "removed stale outbox temp file");
                removed += 1;
            }
        }
        Ok(removed)
    }
}

#[async_trait]
impl IdentityPublisher for OutboxPublisher {
    async fn publish(&self, identity: &Identity, profile: &Profile) -> Result<(), PublishError> {
        let content = serde_json::to_string(profile)?;
        let signature = identity.sign(content.as_bytes())?;

        let document = ProfileDocument {
            public_key: STANDARD.encode(identity.public_key()),
            created_at: chrono::Utc::now().timestamp(),
            content,
            signature: STANDARD.encode(signature),
        };

        tokio::fs::create_dir_all(&self.dir).await?;
        if let Err(e) = self.sweep_stale_temps().await {
            tracing::warn!(error = %e, "failed to sweep outbox temp files");
        }

        let path = self.document_path(identity.public_key());
        let temp_path = path.with_extension("json.tmp");
        tokio::fs::write(&temp_path, serde_json::to_vec_pretty(&document)?).await?;
        tokio::fs::rename(&temp_path, &path).await?;

        tracing::info!(path = %path.display(), handle = %profile.handle, "queued profile document");
        Ok(())
    }
}

/// Biometric capability for hosts without a sensor.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoBiometrics;

#[async_trait]
impl BiometricCapability for NoBiometrics {
    async fn is_available(&self) -> bool {
        false
    }

    async fn prompt_enroll(&self) -> Result<Enrollment, BiometricEnrollError> {
        Ok(Enrollment::Declined)
    }
}

/// Dialog that answers "no" to everything, for headless runs.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysDecline;

#[async_trait]
impl UserConfirmationDialog for AlwaysDecline {
    async fn confirm(&self, _prompt: &Prompt) -> bool {
        false
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
