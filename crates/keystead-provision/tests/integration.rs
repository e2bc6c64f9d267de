//! End-to-end tests for `create_account` against an on-disk vault with
//! scripted collaborators.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use keystead_provision::{
    BiometricCapability, BiometricEnrollError, BiometricOutcome, Ed25519KeyGenerator, Enrollment,
    Identity, IdentityPublisher, KeyError, KeyGenerator, OrchestratorSettings, OutboxPublisher,
    Profile, ProfileDocument, Prompt, ProvisionError, ProvisioningOrchestrator, ProvisioningState,
    PublishError, PublishOutcome, SeedOutcome, UserConfirmationDialog, ValidationError,
    verify_keypair,
};
use keystead_vault::{
    DeviceKeyProvider, FileDeviceKey, Password, SecretBytes, SecretVault, VaultError,
    VaultOptions, names,
};

const TEST_OPTIONS: VaultOptions = VaultOptions { kdf_iterations: 1_000 };

struct Fixture {
    dir: tempfile::TempDir,
    vault: SecretVault,
    device_key: Arc<FileDeviceKey>,
}

impl Fixture {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let vault = SecretVault::open(dir.path().join("vault.db"), TEST_OPTIONS).unwrap();
        let device_key = Arc::new(FileDeviceKey::new(FileDeviceKey::default_path(dir.path())));
        Self {
            dir,
            vault,
            device_key,
        }
    }

    fn orchestrator(&self) -> ProvisioningOrchestrator {
        ProvisioningOrchestrator::new(self.vault.clone(), self.device_key.clone())
    }
}

// ---------------------------------------------------------------------------
// Fakes
// ---------------------------------------------------------------------------

#[derive(Default)]
struct CountingKeyGenerator {
    calls: AtomicUsize,
}

impl KeyGenerator for CountingKeyGenerator {
    fn generate_keypair(&self) -> Result<Identity, KeyError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ed25519KeyGenerator::new().generate_keypair()
    }
}

struct FailingKeyGenerator;

impl KeyGenerator for FailingKeyGenerator {
    fn generate_keypair(&self) -> Result<Identity, KeyError> {
        Err(KeyError::Entropy {
            reason: "entropy pool exhausted".into(),
        })
    }
}

struct BrokenDeviceKey;

impl DeviceKeyProvider for BrokenDeviceKey {
    fn load_or_create(&self) -> keystead_vault::Result<SecretBytes> {
        Err(VaultError::DeviceKeyUnavailable {
            reason: "keystore locked".into(),
        })
    }

    fn exists(&self) -> keystead_vault::Result<bool> {
        Ok(false)
    }
}

struct SlowPublisher {
    delay: Duration,
}

#[async_trait]
impl IdentityPublisher for SlowPublisher {
    async fn publish(&self, _identity: &Identity, _profile: &Profile) -> Result<(), PublishError> {
        tokio::time::sleep(self.delay).await;
        Ok(())
    }
}

struct RejectingPublisher;

#[async_trait]
impl IdentityPublisher for RejectingPublisher {
    async fn publish(&self, _identity: &Identity, _profile: &Profile) -> Result<(), PublishError> {
        Err(PublishError::Rejected {
            reason: "relay offline".into(),
        })
    }
}

enum Sensor {
    Enrolls(&'static [u8]),
    Cancels,
    Fails,
}

struct ScriptedBiometrics {
    available: bool,
    sensor: Sensor,
    prompted: AtomicBool,
}

impl ScriptedBiometrics {
    fn new(available: bool, sensor: Sensor) -> Arc<Self> {
        Arc::new(Self {
            available,
            sensor,
            prompted: AtomicBool::new(false),
        })
    }
}

#[async_trait]
impl BiometricCapability for ScriptedBiometrics {
    async fn is_available(&self) -> bool {
        self.available
    }

    async fn prompt_enroll(&self) -> Result<Enrollment, BiometricEnrollError> {
        self.prompted.store(true, Ordering::SeqCst);
        match self.sensor {
            Sensor::Enrolls(secret) => Ok(Enrollment::Accepted(SecretBytes::new(secret.to_vec()))),
            Sensor::Cancels => Ok(Enrollment::Declined),
            Sensor::Fails => Err(BiometricEnrollError::Prompt {
                reason: "sensor error".into(),
            }),
        }
    }
}

struct RecordingDialog {
    answer: bool,
    asked: std::sync::Mutex<Vec<Prompt>>,
}

impl RecordingDialog {
    fn answering(answer: bool) -> Arc<Self> {
        Arc::new(Self {
            answer,
            asked: std::sync::Mutex::new(Vec::new()),
        })
    }

    fn asked(&self) -> Vec<Prompt> {
        self.asked.lock().unwrap().clone()
    }
}

#[async_trait]
impl UserConfirmationDialog for RecordingDialog {
    async fn confirm(&self, prompt: &Prompt) -> bool {
        self.asked.lock().unwrap().push(prompt.clone());
        self.answer
    }
}

// ═══════════════════════════════════════════════════════════════════════
//  Happy path
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn create_account_persists_identity_and_seed() {
    let fx = Fixture::new();
    let password = Password::from("correcthorse");

    let report = fx
        .orchestrator()
        .create_account("alice", &password)
        .await
        .unwrap();

    assert!(verify_keypair(&report.identity));
    assert!(matches!(report.seed, SeedOutcome::Created));
    assert!(!report.is_degraded());

    for name in [
        names::PASSWORD,
        names::PRIVATE_KEY,
        names::PUBLIC_KEY,
        names::WALLET_SEED,
    ] {
        assert!(fx.vault.has(name).unwrap(), "{name} missing");
    }

    let private = fx
        .vault
        .retrieve(names::PRIVATE_KEY, password.as_bytes())
        .unwrap()
        .unwrap();
    assert_eq!(&private, report.identity.private_key());

    let device = fx.device_key.load_or_create().unwrap();
    let public = fx
        .vault
        .retrieve(names::PUBLIC_KEY, device.as_bytes())
        .unwrap()
        .unwrap();
    assert_eq!(public.as_bytes(), report.identity.public_key());

    let stored_password = fx
        .vault
        .retrieve(names::PASSWORD, device.as_bytes())
        .unwrap()
        .unwrap();
    assert_eq!(stored_password.as_bytes(), b"correcthorse");
}

#[tokio::test]
async fn report_traces_every_state_in_order() {
    let fx = Fixture::new();
    let report = fx
        .orchestrator()
        .create_account("alice", &Password::from("correcthorse"))
        .await
        .unwrap();

    assert_eq!(
        report.trace,
        vec![
            ProvisioningState::Start,
            ProvisioningState::KeysGenerated,
            ProvisioningState::IdentityPersisted,
            ProvisioningState::SeedEnsured,
            ProvisioningState::IdentityPublished,
            ProvisioningState::BiometricOffered,
            ProvisioningState::Complete,
        ]
    );
    assert_eq!(report.final_state(), ProvisioningState::Complete);
}

#[tokio::test]
async fn username_whitespace_is_trimmed_for_profile() {
    let fx = Fixture::new();
    let outbox = OutboxPublisher::new(fx.dir.path().join("outbox"));
    let orchestrator = fx.orchestrator().with_publisher(Arc::new(outbox.clone()));

    let report = orchestrator
        .create_account("  alice  ", &Password::from("correcthorse"))
        .await
        .unwrap();
    assert!(matches!(report.publish, PublishOutcome::Published));

    let raw = std::fs::read(outbox.document_path(report.identity.public_key())).unwrap();
    let document: ProfileDocument = serde_json::from_slice(&raw).unwrap();
    let profile: Profile = serde_json::from_str(&document.content).unwrap();
    assert_eq!(profile.handle, "alice");
    assert!(document.verify());
}

// ═══════════════════════════════════════════════════════════════════════
//  Validation and fatal steps
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn empty_inputs_touch_nothing() {
    let fx = Fixture::new();
    let generator = Arc::new(CountingKeyGenerator::default());
    let orchestrator = fx.orchestrator().with_key_generator(generator.clone());

    let err = orchestrator
        .create_account("", &Password::from("correcthorse"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ProvisionError::Validation(ValidationError::EmptyUsername)
    ));

    let err = orchestrator
        .create_account("alice", &Password::from(""))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ProvisionError::Validation(ValidationError::EmptyPassword)
    ));

    assert_eq!(generator.calls.load(Ordering::SeqCst), 0);
    assert!(fx.vault.list().unwrap().is_empty());
    assert!(!fx.device_key.exists().unwrap());
}

#[tokio::test]
async fn key_generation_failure_is_fatal_and_writes_nothing() {
    let fx = Fixture::new();
    let err = fx
        .orchestrator()
        .with_key_generator(Arc::new(FailingKeyGenerator))
        .create_account("alice", &Password::from("correcthorse"))
        .await
        .unwrap_err();

    assert!(matches!(err, ProvisionError::KeyGeneration(_)));
    assert!(fx.vault.list().unwrap().is_empty());
}

#[tokio::test]
async fn identity_persistence_failure_is_fatal() {
    let fx = Fixture::new();
    let err = ProvisioningOrchestrator::new(fx.vault.clone(), Arc::new(BrokenDeviceKey))
        .create_account("alice", &Password::from("correcthorse"))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        ProvisionError::Vault(VaultError::DeviceKeyUnavailable { .. })
    ));
    assert!(!fx.vault.has(names::WALLET_SEED).unwrap());
}

// ═══════════════════════════════════════════════════════════════════════
//  Wallet seed
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn second_account_reuses_existing_seed() {
    let fx = Fixture::new();
    let orchestrator = fx.orchestrator();
    let password = Password::from("correcthorse");

    orchestrator.create_account("alice", &password).await.unwrap();
    let before = fx.vault.credential(names::WALLET_SEED).unwrap().unwrap();

    let report = orchestrator.create_account("alice", &password).await.unwrap();
    let after = fx.vault.credential(names::WALLET_SEED).unwrap().unwrap();

    assert!(matches!(report.seed, SeedOutcome::Existing));
    assert_eq!(before.ciphertext, after.ciphertext);
    assert_eq!(before.params.nonce, after.params.nonce);
}

#[tokio::test]
async fn wrong_password_for_existing_seed_is_reported_not_replaced() {
    let fx = Fixture::new();
    let orchestrator = fx.orchestrator();

    orchestrator
        .create_account("alice", &Password::from("correcthorse"))
        .await
        .unwrap();
    let before = fx.vault.credential(names::WALLET_SEED).unwrap().unwrap();

    let report = orchestrator
        .create_account("alice", &Password::from("wrongpass"))
        .await
        .unwrap();

    match &report.seed {
        SeedOutcome::Failed(e) => assert!(e.is_authentication()),
        other => panic!("expected authentication failure, got {other:?}"),
    }
    assert!(report.is_degraded());
    assert_eq!(report.final_state(), ProvisioningState::Complete);

    let after = fx.vault.credential(names::WALLET_SEED).unwrap().unwrap();
    assert_eq!(before.ciphertext, after.ciphertext);
}

// ═══════════════════════════════════════════════════════════════════════
//  Publication
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn publish_timeout_is_not_fatal() {
    let fx = Fixture::new();
    let orchestrator = fx
        .orchestrator()
        .with_publisher(Arc::new(SlowPublisher {
            delay: Duration::from_secs(5),
        }))
        .with_settings(OrchestratorSettings {
            publish_timeout: Duration::from_millis(50),
            offer_biometrics: true,
        });

    let report = orchestrator
        .create_account("alice", &Password::from("correcthorse"))
        .await
        .unwrap();

    assert!(matches!(
        report.publish,
        PublishOutcome::Failed(PublishError::Timeout { .. })
    ));
    assert_eq!(report.warnings().len(), 1);
    assert!(fx.vault.has(names::PRIVATE_KEY).unwrap());
}

#[tokio::test]
async fn rejected_publish_is_a_warning() {
    let fx = Fixture::new();
    let report = fx
        .orchestrator()
        .with_publisher(Arc::new(RejectingPublisher))
        .create_account("alice", &Password::from("correcthorse"))
        .await
        .unwrap();

    let warnings: Vec<String> = report.warnings().iter().map(ToString::to_string).collect();
    assert_eq!(warnings, vec!["profile not published: publish rejected: relay offline"]);
}

// ═══════════════════════════════════════════════════════════════════════
//  Biometrics
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn accepted_biometrics_store_password_copy() {
    let fx = Fixture::new();
    let sensor = ScriptedBiometrics::new(true, Sensor::Enrolls(b"unlock-secret"));
    let dialog = RecordingDialog::answering(true);

    let report = fx
        .orchestrator()
        .with_biometrics(sensor.clone(), dialog.clone())
        .create_account("alice", &Password::from("correcthorse"))
        .await
        .unwrap();

    assert!(matches!(report.biometric, BiometricOutcome::Enrolled));
    assert_eq!(dialog.asked(), vec![Prompt::biometric_opt_in()]);
    assert!(fx.vault.biometric_enabled().unwrap());

    let copy = fx
        .vault
        .retrieve(names::BIOMETRIC_PASSWORD, b"unlock-secret")
        .unwrap()
        .unwrap();
    assert_eq!(copy.as_bytes(), b"correcthorse");
}

#[tokio::test]
async fn declined_dialog_skips_sensor() {
    let fx = Fixture::new();
    let sensor = ScriptedBiometrics::new(true, Sensor::Enrolls(b"unlock-secret"));

    let report = fx
        .orchestrator()
        .with_biometrics(sensor.clone(), RecordingDialog::answering(false))
        .create_account("alice", &Password::from("correcthorse"))
        .await
        .unwrap();

    assert!(matches!(report.biometric, BiometricOutcome::Declined));
    assert!(!sensor.prompted.load(Ordering::SeqCst));
    assert!(!fx.vault.has(names::BIOMETRIC_PASSWORD).unwrap());
    assert!(!fx.vault.biometric_enabled().unwrap());
}

#[tokio::test]
async fn cancelled_sensor_counts_as_declined() {
    let fx = Fixture::new();
    let report = fx
        .orchestrator()
        .with_biometrics(
            ScriptedBiometrics::new(true, Sensor::Cancels),
            RecordingDialog::answering(true),
        )
        .create_account("alice", &Password::from("correcthorse"))
        .await
        .unwrap();

    assert!(matches!(report.biometric, BiometricOutcome::Declined));
    assert!(!report.is_degraded());
}

#[tokio::test]
async fn unavailable_sensor_never_prompts() {
    let fx = Fixture::new();
    let dialog = RecordingDialog::answering(true);

    let report = fx
        .orchestrator()
        .with_biometrics(ScriptedBiometrics::new(false, Sensor::Cancels), dialog.clone())
        .create_account("alice", &Password::from("correcthorse"))
        .await
        .unwrap();

    assert!(matches!(report.biometric, BiometricOutcome::Unavailable));
    assert!(dialog.asked().is_empty());
}

#[tokio::test]
async fn sensor_failure_is_reported_and_flow_completes() {
    let fx = Fixture::new();
    let report = fx
        .orchestrator()
        .with_biometrics(
            ScriptedBiometrics::new(true, Sensor::Fails),
            RecordingDialog::answering(true),
        )
        .create_account("alice", &Password::from("correcthorse"))
        .await
        .unwrap();

    assert!(matches!(
        report.biometric,
        BiometricOutcome::Failed(BiometricEnrollError::Prompt { .. })
    ));
    assert_eq!(report.final_state(), ProvisioningState::Complete);
    assert!(fx.vault.has(names::PRIVATE_KEY).unwrap());
}

// ═══════════════════════════════════════════════════════════════════════
//  Concurrency
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_calls_share_one_seed() {
    let fx = Fixture::new();
    let orchestrator = Arc::new(fx.orchestrator());
    let password = Password::from("correcthorse");

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let orchestrator = Arc::clone(&orchestrator);
            let password = password.clone();
            tokio::spawn(async move { orchestrator.create_account("alice", &password).await })
        })
        .collect();

    let mut created = 0;
    for handle in handles {
        let report = handle.await.unwrap().unwrap();
        if matches!(report.seed, SeedOutcome::Created) {
            created += 1;
        }
    }

    assert_eq!(created, 1);
    let listed = fx.vault.list().unwrap();
    assert_eq!(
        listed.iter().filter(|c| c.name == names::WALLET_SEED).count(),
        1
    );
}
