//! AES-256-GCM encryption and PBKDF2 key derivation using the `ring` crate.
//!
//! Every credential in the vault is sealed with its own key:
//!
//! - **Key derivation**: PBKDF2-HMAC-SHA256 over the unlock secret (a user
//!   password, the device key, or a biometric unlock secret) and a fresh
//!   random salt.
//! - **Encryption**: AES-256-GCM with a random 96-bit nonce. The credential
//!   name is bound as associated data, so a ciphertext copied under another
//!   name fails authentication.
//! - **Randomness**: `ring`'s `SystemRandom`. Failure to obtain entropy is an
//!   error, never a silent fallback.

use std::num::NonZeroU32;

use ring::aead::{self, Aad, BoundKey, NONCE_LEN, Nonce, NonceSequence, OpeningKey, SealingKey, UnboundKey};
use ring::pbkdf2;
use ring::rand::{SecureRandom, SystemRandom};
use zeroize::Zeroizing;

use crate::error::{Result, VaultError};

/// Length of the AES-256-GCM key in bytes.
pub const KEY_LEN: usize = 32;

/// Length of the AES-256-GCM nonce in bytes (96 bits).
pub const NONCE_LEN_BYTES: usize = NONCE_LEN;

/// Length of the PBKDF2 salt in bytes.
pub const SALT_LEN: usize = 32;

/// Length of the GCM authentication tag appended to every ciphertext.
pub const TAG_LEN: usize = 16;

/// Identifier written next to each credential so readers know how to
/// re-derive its key.
pub const KDF_PBKDF2_SHA256: &str = "pbkdf2-hmac-sha256";

/// Default PBKDF2 iteration count (OWASP 2023 guidance for HMAC-SHA256).
pub const DEFAULT_KDF_ITERATIONS: u32 = 600_000;

static PBKDF2_ALG: pbkdf2::Algorithm = pbkdf2::PBKDF2_HMAC_SHA256;

static AEAD_ALG: &aead::Algorithm = &aead::AES_256_GCM;

// ---------------------------------------------------------------------------
// Nonce handling
// ---------------------------------------------------------------------------

/// Yields exactly one nonce, then errors. Each sealing or opening key is
/// bound to a single operation.
struct SingleNonce(Option<[u8; NONCE_LEN_BYTES]>);

impl SingleNonce {
    fn new(bytes: [u8; NONCE_LEN_BYTES]) -> Self {
        Self(Some(bytes))
    }
}

impl NonceSequence for SingleNonce {
    fn advance(&mut self) -> std::result::Result<Nonce, ring::error::Unspecified> {
        self.0
            .take()
            .map(Nonce::assume_unique_for_key)
            .ok_or(ring::error::Unspecified)
    }
}

// ---------------------------------------------------------------------------
// Encryption
// ---------------------------------------------------------------------------

/// Encrypt `plaintext` with AES-256-GCM under `key`, authenticating `aad`.
///
/// Returns `(nonce, ciphertext)`; the ciphertext carries the 128-bit tag.
///
/// # Errors
///
/// Returns [`VaultError::EncryptionFailed`] if the key length is wrong, the
/// nonce cannot be generated, or `ring` reports a failure.
pub fn encrypt(plaintext: &[u8], key: &[u8], aad: &[u8]) -> Result<([u8; NONCE_LEN_BYTES], Vec<u8>)> {
    if key.len() != KEY_LEN {
        return Err(VaultError::EncryptionFailed {
            reason: format!("key must be {} bytes, got {}", KEY_LEN, key.len()),
        });
    }

    let mut nonce_bytes = [0u8; NONCE_LEN_BYTES];
    SystemRandom::new()
        .fill(&mut nonce_bytes)
        .map_err(|_| VaultError::EncryptionFailed {
            reason: "failed to generate random nonce".into(),
        })?;

    let unbound_key = UnboundKey::new(AEAD_ALG, key).map_err(|_| VaultError::EncryptionFailed {
        reason: "failed to create AES-256-GCM key".into(),
    })?;

    let mut sealing_key = SealingKey::new(unbound_key, SingleNonce::new(nonce_bytes));

    let mut in_out = plaintext.to_vec();
    sealing_key
        .seal_in_place_append_tag(Aad::from(aad), &mut in_out)
        .map_err(|_| VaultError::EncryptionFailed {
            reason: "seal_in_place failed".into(),
        })?;

    tracing::trace!(
        plaintext_len = plaintext.len(),
        ciphertext_len = in_out.len(),
        "encrypted data"
    );

    Ok((nonce_bytes, in_out))
}

/// Decrypt `ciphertext` (tag included) with `nonce`, `key` and the same
/// `aad` that was used to seal it.
///
/// # Errors
///
/// Returns [`VaultError::DecryptionFailed`] if the key is wrong, the
/// ciphertext or associated data were tampered with, or the nonce differs.
pub fn decrypt(
    nonce: &[u8; NONCE_LEN_BYTES],
    ciphertext: &[u8],
    key: &[u8],
    aad: &[u8],
) -> Result<Zeroizing<Vec<u8>>> {
    if key.len() != KEY_LEN {
        return Err(VaultError::DecryptionFailed {
            reason: format!("key must be {} bytes, got {}", KEY_LEN, key.len()),
        });
    }

    let unbound_key = UnboundKey::new(AEAD_ALG, key).map_err(|_| VaultError::DecryptionFailed {
        reason: "failed to create AES-256-GCM key".into(),
    })?;

    let mut opening_key = OpeningKey::new(unbound_key, SingleNonce::new(*nonce));

    let mut in_out = Zeroizing::new(ciphertext.to_vec());
    let plaintext_len = opening_key
        .open_in_place(Aad::from(aad), &mut in_out)
        .map_err(|_| VaultError::DecryptionFailed {
            reason: "authentication failed: wrong key or corrupted data".into(),
        })?
        .len();

    in_out.truncate(plaintext_len);

    tracing::trace!(
        ciphertext_len = ciphertext.len(),
        plaintext_len,
        "decrypted data"
    );

    Ok(in_out)
}

// ---------------------------------------------------------------------------
// Key derivation
// ---------------------------------------------------------------------------

/// Derive a 256-bit key from `secret` and `salt` with PBKDF2-HMAC-SHA256.
///
/// # Errors
///
/// Returns [`VaultError::KeyDerivationFailed`] when `iterations` is zero.
pub fn derive_key(secret: &[u8], salt: &[u8], iterations: u32) -> Result<Zeroizing<[u8; KEY_LEN]>> {
    let iterations = NonZeroU32::new(iterations).ok_or_else(|| VaultError::KeyDerivationFailed {
        reason: "iteration count must be non-zero".into(),
    })?;

    let mut key = Zeroizing::new([0u8; KEY_LEN]);
    pbkdf2::derive(PBKDF2_ALG, iterations, salt, secret, &mut key[..]);

    tracing::debug!(iterations = iterations.get(), "derived key via PBKDF2");
    Ok(key)
}

// ---------------------------------------------------------------------------
// Random bytes
// ---------------------------------------------------------------------------

/// Generate a fresh random PBKDF2 salt.
///
/// # Errors
///
/// Returns [`VaultError::KeyDerivationFailed`] if the system CSPRNG fails.
pub fn random_salt() -> Result<[u8; SALT_LEN]> {
    let mut salt = [0u8; SALT_LEN];
    SystemRandom::new()
        .fill(&mut salt)
        .map_err(|_| VaultError::KeyDerivationFailed {
            reason: "failed to generate random salt".into(),
        })?;
    Ok(salt)
}

/// Generate `len` cryptographically secure random bytes.
///
/// # Errors
///
/// Returns [`VaultError::Internal`] if the system CSPRNG fails.
pub fn random_bytes(len: usize) -> Result<Zeroizing<Vec<u8>>> {
    let mut buf = Zeroizing::new(vec![0u8; len]);
    SystemRandom::new()
        .fill(&mut buf)
        .map_err(|_| VaultError::Internal("failed to generate random bytes".into()))?;
    Ok(buf)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encrypt_decrypt_roundtrip() {
        let key = random_bytes(KEY_LEN).unwrap();
        let plaintext = b"hello, keystead vault!";

        let (nonce, ciphertext) = encrypt(plaintext, &key, b"privateKey").unwrap();
        let decrypted = decrypt(&nonce, &ciphertext, &key, b"privateKey").unwrap();

        assert_eq!(decrypted.as_slice(), plaintext);
        assert_eq!(ciphertext.len(), plaintext.len() + TAG_LEN);
    }

    #[test]
    fn decrypt_with_wrong_key_fails() {
        let key1 = random_bytes(KEY_LEN).unwrap();
        let key2 = random_bytes(KEY_LEN).unwrap();

        let (nonce, ciphertext) = encrypt(b"secret data", &key1, b"").unwrap();
        let result = decrypt(&nonce, &ciphertext, &key2, b"");

        assert!(matches!(result, Err(VaultError::DecryptionFailed { .. })));
    }

    #[test]
    fn decrypt_with_other_aad_fails() {
        let key = random_bytes(KEY_LEN).unwrap();

        let (nonce, ciphertext) = encrypt(b"seed bytes", &key, b"walletSeed").unwrap();
        let result = decrypt(&nonce, &ciphertext, &key, b"privateKey");

        assert!(result.is_err());
    }

    #[test]
    fn decrypt_with_tampered_ciphertext_fails() {
        let key = random_bytes(KEY_LEN).unwrap();

        let (nonce, mut ciphertext) = encrypt(b"secret data", &key, b"").unwrap();
        if let Some(byte) = ciphertext.first_mut() {
            *byte ^= 0x01;
        }

        assert!(decrypt(&nonce, &ciphertext, &key, b"").is_err());
    }

    #[test]
    fn invalid_key_length_rejected() {
        let short_key = vec![0u8; 16];
        assert!(encrypt(b"test", &short_key, b"").is_err());
    }

    #[test]
    fn nonces_are_fresh_per_call() {
        let key = random_bytes(KEY_LEN).unwrap();
        let (n1, c1) = encrypt(b"same", &key, b"").unwrap();
        let (n2, c2) = encrypt(b"same", &key, b"").unwrap();

        assert_ne!(n1, n2);
        assert_ne!(c1, c2);
    }

    #[test]
    fn pbkdf2_is_deterministic_for_salt_and_iterations() {
        let salt = random_salt().unwrap();
        let a = derive_key(b"my-password", &salt, 1_000).unwrap();
        let b = derive_key(b"my-password", &salt, 1_000).unwrap();
        let c = derive_key(b"my-password", &salt, 1_001).unwrap();
        let d = derive_key(b"other-password", &salt, 1_000).unwrap();

        assert_eq!(*a, *b);
        assert_ne!(*a, *c);
        assert_ne!(*a, *d);
    }

    #[test]
    fn zero_iterations_rejected() {
        let result = derive_key(b"pw", &[0u8; SALT_LEN], 0);
        assert!(matches!(result, Err(VaultError::KeyDerivationFailed { .. })));
    }

    #[test]
    fn empty_plaintext_roundtrip() {
        let key = random_bytes(KEY_LEN).unwrap();

        let (nonce, ciphertext) = encrypt(b"", &key, b"").unwrap();
        let decrypted = decrypt(&nonce, &ciphertext, &key, b"").unwrap();

        assert!(decrypted.is_empty());
    }
}
