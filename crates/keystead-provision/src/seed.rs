//! Idempotent wallet seed provisioning.
//!
//! A store holds at most one wallet seed. [`SeedProvisioner::ensure_seed`]
//! creates it only when the vault reports it absent; a wrong password
//! surfaces as an authentication error instead of producing a duplicate.

use std::sync::Arc;

use keystead_vault::{Password, SecretVault, VaultError, names};

use crate::blocking::vault_task;
use crate::collaborators::WalletSeedDeriver;
use crate::error::SeedError;

/// Outcome of a successful [`SeedProvisioner::ensure_seed`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeedStatus {
    /// `true` if this call generated and stored the seed.
    pub created: bool,
}

/// Ensures exactly one wallet seed exists in a vault.
#[derive(Clone)]
pub struct SeedProvisioner {
    vault: SecretVault,
    deriver: Arc<dyn WalletSeedDeriver>,
}

impl SeedProvisioner {
    pub fn new(vault: SecretVault, deriver: Arc<dyn WalletSeedDeriver>) -> Self {
        Self { vault, deriver }
    }

    /// Make sure a seed readable with `password` exists.
    ///
    /// # Errors
    ///
    /// - [`SeedError::Vault`] wrapping [`VaultError::Authentication`] when a
    ///   seed exists but `password` does not open it. No seed is generated.
    /// - [`SeedError::Derivation`] when the deriver fails.
    /// - [`SeedError::Vault`] on storage failure.
    pub async fn ensure_seed(&self, password: &Password) -> Result<SeedStatus, SeedError> {
        if self.existing_seed(password).await? {
            tracing::info!("wallet seed already present");
            return Ok(SeedStatus { created: false });
        }

        let seed = self.deriver.generate().await?;

        let vault = self.vault.clone();
        let secret = password.clone();
        let stored = vault_task(move || {
            vault.store_new(names::WALLET_SEED, seed.as_bytes(), secret.as_bytes())
        })
        .await;

        match stored {
            Ok(()) => {
                tracing::info!("created wallet seed");
                Ok(SeedStatus { created: true })
            }
            Err(VaultError::AlreadyExists { .. }) => {
                // Another provisioner stored a seed after our check. Keep
                // theirs, but only if this password opens it.
                tracing::warn!("wallet seed appeared concurrently; keeping existing seed");
                if self.existing_seed(password).await? {
                    Ok(SeedStatus { created: false })
                } else {
                    Err(SeedError::Vault(VaultError::Internal(
                        "wallet seed vanished after a concurrent write".into(),
                    )))
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    /// `Ok(true)` if a seed exists and opens with `password`.
    async fn existing_seed(&self, password: &Password) -> Result<bool, SeedError> {
        let vault = self.vault.clone();
        let secret = password.clone();
        let seed = vault_task(move || vault.retrieve(names::WALLET_SEED, secret.as_bytes())).await?;
        Ok(seed.is_some())
    }
}
