//! Account provisioning for Keystead.
//!
//! [`ProvisioningOrchestrator::create_account`] turns a username and password
//! into a persisted identity:
//!
//! 1. generate an Ed25519 keypair ([`identity`]),
//! 2. store the password, private key and public key in the vault,
//! 3. make sure a wallet seed exists ([`seed`]),
//! 4. publish a signed profile, bounded by a timeout,
//! 5. offer biometric unlock.
//!
//! Steps 1 and 2 are fatal on failure. Steps 3 to 5 are best-effort; their
//! outcomes are returned in the [`ProvisioningReport`].

mod blocking;
pub mod collaborators;
pub mod config;
pub mod error;
pub mod identity;
pub mod machine;
pub mod orchestrator;
pub mod seed;

pub use collaborators::{
    AlwaysDecline, BiometricCapability, Enrollment, IdentityPublisher, NoBiometrics,
    OutboxPublisher, Profile, ProfileDocument, Prompt, RandomSeedDeriver, UserConfirmationDialog,
    WalletSeed, WalletSeedDeriver,
};
pub use config::ProvisionConfig;
pub use error::{
    BiometricEnrollError, ConfigError, DeriverError, KeyError, ProvisionError, PublishError,
    Result, SeedError, ValidationError,
};
pub use identity::{Ed25519KeyGenerator, Identity, KeyGenerator, verify_keypair};
pub use machine::ProvisioningState;
pub use orchestrator::{
    BiometricOutcome, OrchestratorSettings, ProvisioningOrchestrator, ProvisioningReport,
    PublishOutcome, SeedOutcome, StepWarning,
};
pub use seed::{SeedProvisioner, SeedStatus};
