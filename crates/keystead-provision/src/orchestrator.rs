//! The `create_account` pipeline.
//!
//! [`ProvisioningOrchestrator`] drives [`ProvisioningState`] from `Start` to
//! `Complete`, running one collaborator per transition. Key generation and
//! identity persistence abort the flow on failure; seed provisioning,
//! profile publication and biometric enrollment record a typed outcome in
//! the [`ProvisioningReport`] and let the flow continue.
//!
//! Nothing is rolled back across steps: if the caller drops the future
//! midway, credentials already written stay valid.

use std::sync::Arc;
use std::time::Duration;

use keystead_vault::{DeviceKeyProvider, Password, SecretVault, names};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::blocking::vault_task;
use crate::collaborators::{
    AlwaysDecline, BiometricCapability, Enrollment, IdentityPublisher, NoBiometrics, Profile,
    Prompt, RandomSeedDeriver, UserConfirmationDialog, WalletSeedDeriver,
};
use crate::error::{
    BiometricEnrollError, ProvisionError, PublishError, Result, SeedError, ValidationError,
};
use crate::identity::{Ed25519KeyGenerator, Identity, KeyGenerator};
use crate::machine::ProvisioningState;
use crate::seed::SeedProvisioner;

/// Default bound on the publish step.
pub const DEFAULT_PUBLISH_TIMEOUT: Duration = Duration::from_secs(10);

// ---------------------------------------------------------------------------
// Step outcomes
// ---------------------------------------------------------------------------

/// What happened in the wallet seed step.
#[derive(Debug)]
pub enum SeedOutcome {
    Created,
    Existing,
    Failed(SeedError),
}

/// What happened in the profile publication step.
#[derive(Debug)]
pub enum PublishOutcome {
    Published,
    /// No publisher configured.
    Skipped,
    Failed(PublishError),
}

/// What happened in the biometric opt-in step.
#[derive(Debug)]
pub enum BiometricOutcome {
    /// The host does not offer biometrics, or offering is disabled.
    Unavailable,
    /// The user said no in the dialog or at the sensor.
    Declined,
    /// The password was copied under the biometric unlock secret.
    Enrolled,
    Failed(BiometricEnrollError),
}

/// A non-fatal failure recorded during a successful run.
#[derive(Debug)]
pub enum StepWarning<'a> {
    Seed(&'a SeedError),
    Publish(&'a PublishError),
    Biometric(&'a BiometricEnrollError),
}

impl std::fmt::Display for StepWarning<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Seed(e) => write!(f, "wallet unavailable: {e}"),
            Self::Publish(e) => write!(f, "profile not published: {e}"),
            Self::Biometric(e) => write!(f, "biometric unlock not enabled: {e}"),
        }
    }
}

/// Result of a successful `create_account`.
#[derive(Debug)]
pub struct ProvisioningReport {
    pub identity: Identity,
    /// Every state the run passed through, `Start` to `Complete`.
    pub trace: Vec<ProvisioningState>,
    pub seed: SeedOutcome,
    pub publish: PublishOutcome,
    pub biometric: BiometricOutcome,
}

impl ProvisioningReport {
    pub fn final_state(&self) -> ProvisioningState {
        self.trace
            .last()
            .copied()
            .unwrap_or(ProvisioningState::Start)
    }

    /// Non-fatal failures, in step order.
    pub fn warnings(&self) -> Vec<StepWarning<'_>> {
        let mut warnings = Vec::new();
        if let SeedOutcome::Failed(e) = &self.seed {
            warnings.push(StepWarning::Seed(e));
        }
        if let PublishOutcome::Failed(e) = &self.publish {
            warnings.push(StepWarning::Publish(e));
        }
        if let BiometricOutcome::Failed(e) = &self.biometric {
            warnings.push(StepWarning::Biometric(e));
        }
        warnings
    }

    /// Whether the account was created without some best-effort feature.
    pub fn is_degraded(&self) -> bool {
        !self.warnings().is_empty()
    }
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

/// Behavioural knobs for the best-effort steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrchestratorSettings {
    pub publish_timeout: Duration,
    pub offer_biometrics: bool,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            publish_timeout: DEFAULT_PUBLISH_TIMEOUT,
            offer_biometrics: true,
        }
    }
}

/// Sequences key generation, credential storage, seed provisioning,
/// publication and biometric opt-in.
pub struct ProvisioningOrchestrator {
    vault: SecretVault,
    device_key: Arc<dyn DeviceKeyProvider>,
    key_generator: Arc<dyn KeyGenerator>,
    seeds: SeedProvisioner,
    publisher: Option<Arc<dyn IdentityPublisher>>,
    biometrics: Arc<dyn BiometricCapability>,
    dialog: Arc<dyn UserConfirmationDialog>,
    settings: OrchestratorSettings,
    /// Serializes `create_account` calls on this orchestrator.
    in_flight: Mutex<()>,
}

/// Data accumulated while a run moves through the states.
struct Run<'a> {
    username: &'a str,
    password: &'a Password,
    identity: Option<Identity>,
    seed: Option<SeedOutcome>,
    publish: Option<PublishOutcome>,
    biometric: Option<BiometricOutcome>,
}

impl ProvisioningOrchestrator {
    /// Create an orchestrator with Ed25519 keys, random wallet seeds, no
    /// publisher and no biometrics. Use the `with_*` methods to plug in
    /// host collaborators.
    pub fn new(vault: SecretVault, device_key: Arc<dyn DeviceKeyProvider>) -> Self {
        let seeds = SeedProvisioner::new(vault.clone(), Arc::new(RandomSeedDeriver::default()));
        Self {
            vault,
            device_key,
            key_generator: Arc::new(Ed25519KeyGenerator::new()),
            seeds,
            publisher: None,
            biometrics: Arc::new(NoBiometrics),
            dialog: Arc::new(AlwaysDecline),
            settings: OrchestratorSettings::default(),
            in_flight: Mutex::new(()),
        }
    }

    pub fn with_key_generator(mut self, generator: Arc<dyn KeyGenerator>) -> Self {
        self.key_generator = generator;
        self
    }

    pub fn with_seed_deriver(mut self, deriver: Arc<dyn WalletSeedDeriver>) -> Self {
        self.seeds = SeedProvisioner::new(self.vault.clone(), deriver);
        self
    }

    pub fn with_publisher(mut self, publisher: Arc<dyn IdentityPublisher>) -> Self {
        self.publisher = Some(publisher);
        self
    }

    pub fn with_biometrics(
        mut self,
        capability: Arc<dyn BiometricCapability>,
        dialog: Arc<dyn UserConfirmationDialog>,
    ) -> Self {
        self.biometrics = capability;
        self.dialog = dialog;
        self
    }

    pub fn with_settings(mut self, settings: OrchestratorSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn vault(&self) -> &SecretVault {
        &self.vault
    }

    /// Create a new account for `username` protected by `password`.
    ///
    /// # Errors
    ///
    /// - [`ProvisionError::Validation`] for an empty username or password,
    ///   before any key is generated or anything is written.
    /// - [`ProvisionError::KeyGeneration`] if no keypair can be produced.
    /// - [`ProvisionError::Vault`] if the identity credentials cannot be
    ///   persisted.
    ///
    /// Every other failure is reported inside the returned report.
    pub async fn create_account(
        &self,
        username: &str,
        password: &Password,
    ) -> Result<ProvisioningReport> {
        let username = username.trim();
        validate(username, password)?;

        let _guard = self.in_flight.lock().await;
        info!(username, "creating account");

        let mut run = Run {
            username,
            password,
            identity: None,
            seed: None,
            publish: None,
            biometric: None,
        };

        let mut state = ProvisioningState::Start;
        let mut trace = vec![state];
        while !state.is_terminal() {
            state = self.step(state, &mut run).await?;
            tracing::debug!(%state, "provisioning advanced");
            trace.push(state);
        }

        let (Some(identity), Some(seed), Some(publish), Some(biometric)) =
            (run.identity, run.seed, run.publish, run.biometric)
        else {
            return Err(ProvisionError::InvalidState { state });
        };
        let report = ProvisioningReport {
            identity,
            trace,
            seed,
            publish,
            biometric,
        };

        info!(degraded = report.is_degraded(), "account created");
        Ok(report)
    }

    /// Run the step leaving `state` and return the next state.
    async fn step(&self, state: ProvisioningState, run: &mut Run<'_>) -> Result<ProvisioningState> {
        match state {
            ProvisioningState::Start => {
                run.identity = Some(self.key_generator.generate_keypair()?);
            }
            ProvisioningState::KeysGenerated => {
                let identity = run
                    .identity
                    .as_ref()
                    .ok_or(ProvisionError::InvalidState { state })?;
                self.persist_identity(identity, run.password).await?;
            }
            ProvisioningState::IdentityPersisted => {
                run.seed = Some(self.ensure_seed(run.password).await);
            }
            ProvisioningState::SeedEnsured => {
                let identity = run
                    .identity
                    .as_ref()
                    .ok_or(ProvisionError::InvalidState { state })?;
                run.publish = Some(self.publish(identity, run.username).await);
            }
            ProvisioningState::IdentityPublished => {
                run.biometric = Some(self.offer_biometrics(run.password).await);
            }
            ProvisioningState::BiometricOffered | ProvisioningState::Complete => {}
        }
        Ok(state.next())
    }

    async fn persist_identity(&self, identity: &Identity, password: &Password) -> Result<()> {
        let vault = self.vault.clone();
        let device_key = Arc::clone(&self.device_key);
        let password = password.clone();
        let identity = identity.clone();

        vault_task(move || {
            let device = device_key.load_or_create()?;
            vault.store(names::PASSWORD, password.as_bytes(), device.as_bytes())?;
            vault.store(
                names::PRIVATE_KEY,
                identity.private_key().as_bytes(),
                password.as_bytes(),
            )?;
            vault.store(names::PUBLIC_KEY, identity.public_key(), device.as_bytes())
        })
        .await?;

        info!("identity credentials persisted");
        Ok(())
    }

    async fn ensure_seed(&self, password: &Password) -> SeedOutcome {
        match self.seeds.ensure_seed(password).await {
            Ok(status) if status.created => SeedOutcome::Created,
            Ok(_) => SeedOutcome::Existing,
            Err(e) => {
                warn!(error = %e, authentication = e.is_authentication(), "wallet seed provisioning failed");
                SeedOutcome::Failed(e)
            }
        }
    }

    async fn publish(&self, identity: &Identity, username: &str) -> PublishOutcome {
        let Some(publisher) = &self.publisher else {
            tracing::debug!("no publisher configured; skipping profile publication");
            return PublishOutcome::Skipped;
        };

        let profile = Profile::for_username(username);
        let after = self.settings.publish_timeout;

        match tokio::time::timeout(after, publisher.publish(identity, &profile)).await {
            Ok(Ok(())) => {
                info!(handle = %profile.handle, "profile published");
                PublishOutcome::Published
            }
            Ok(Err(e)) => {
                warn!(error = %e, "profile publication failed");
                PublishOutcome::Failed(e)
            }
            Err(_) => {
                warn!(timeout = ?after, "profile publication timed out");
                PublishOutcome::Failed(PublishError::Timeout { after })
            }
        }
    }

    async fn offer_biometrics(&self, password: &Password) -> BiometricOutcome {
        if !self.settings.offer_biometrics || !self.biometrics.is_available().await {
            return BiometricOutcome::Unavailable;
        }

        if !self.dialog.confirm(&Prompt::biometric_opt_in()).await {
            info!("user declined biometric unlock");
            return BiometricOutcome::Declined;
        }

        let unlock_secret = match self.biometrics.prompt_enroll().await {
            Ok(Enrollment::Accepted(secret)) => secret,
            Ok(Enrollment::Declined) => {
                info!("biometric enrollment cancelled at sensor");
                return BiometricOutcome::Declined;
            }
            Err(e) => {
                warn!(error = %e, "biometric enrollment failed");
                return BiometricOutcome::Failed(e);
            }
        };

        let vault = self.vault.clone();
        let password = password.clone();
        let stored = vault_task(move || {
            vault.store(
                names::BIOMETRIC_PASSWORD,
                password.as_bytes(),
                unlock_secret.as_bytes(),
            )?;
            vault.set_biometric_enabled(true)
        })
        .await;

        match stored {
            Ok(()) => {
                info!("biometric unlock enabled");
                BiometricOutcome::Enrolled
            }
            Err(e) => {
                warn!(error = %e, "failed to store biometric credential");
                BiometricOutcome::Failed(BiometricEnrollError::Vault(e))
            }
        }
    }
}

fn validate(username: &str, password: &Password) -> std::result::Result<(), ValidationError> {
    if username.is_empty() {
        return Err(ValidationError::EmptyUsername);
    }
    if password.is_empty() {
        return Err(ValidationError::EmptyPassword);
    }
    Ok(())
}
