//! Password-encrypted credential vault for Keystead.
//!
//! This crate is the trust boundary for all credential material produced
//! during account creation: the identity private key, the wallet seed, the
//! password itself and its biometric-gated copy. Nothing leaves it
//! unencrypted at rest.
//!
//! # Modules
//!
//! - [`crypto`]: AES-256-GCM sealing, PBKDF2 key derivation, randomness.
//! - [`store`]: [`SecretVault`], the SQLite-backed credential store.
//! - [`device_key`]: the per-installation key for credentials that are
//!   not protected by the password.
//! - [`secret`]: zeroizing, redacted wrappers for passwords and secrets.
//! - [`error`]: unified error types.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use keystead_vault::{SecretVault, VaultOptions, names};
//!
//! # fn example() -> keystead_vault::Result<()> {
//! let vault = SecretVault::open("data/vault.db", VaultOptions::default())?;
//!
//! vault.store(names::WALLET_SEED, b"seed bytes", b"correcthorse")?;
//!
//! match vault.retrieve(names::WALLET_SEED, b"wrong") {
//!     Err(e) if e.is_authentication() => println!("wrong password"),
//!     Ok(None) => println!("no seed yet"),
//!     Ok(Some(seed)) => println!("seed has {} bytes", seed.len()),
//!     Err(e) => return Err(e),
//! }
//! # Ok(())
//! # }
//! ```

pub mod crypto;
pub mod device_key;
pub mod error;
pub mod secret;
pub mod store;

pub use device_key::{DeviceKeyProvider, FileDeviceKey, StaticDeviceKey};
pub use error::{Result, VaultError};
pub use secret::{Password, SecretBytes};
pub use store::{Credential, CredentialSummary, EncryptionParams, SecretVault, VaultOptions, names};
