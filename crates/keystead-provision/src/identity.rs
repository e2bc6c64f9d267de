//! Identity keypair generation.
//!
//! Identities are Ed25519 keypairs generated with `ring`. The private half is
//! the PKCS#8 v2 document `ring` produces; the public half is the raw 32-byte
//! Ed25519 public key, always derivable from the private half.

use keystead_vault::SecretBytes;
use ring::rand::SystemRandom;
use ring::signature::{self, Ed25519KeyPair, KeyPair};

use crate::error::KeyError;

/// A user identity: a public/private keypair generated together.
#[derive(Debug, Clone)]
pub struct Identity {
    public_key: Vec<u8>,
    private_key: SecretBytes,
}

impl Identity {
    /// Rebuild an identity from a stored PKCS#8 private key. The public key
    /// is re-derived, never taken on trust.
    pub fn from_private_key(private_key: SecretBytes) -> Result<Self, KeyError> {
        let pair = parse_pkcs8(private_key.as_bytes())?;
        Ok(Self {
            public_key: pair.public_key().as_ref().to_vec(),
            private_key,
        })
    }

    pub fn public_key(&self) -> &[u8] {
        &self.public_key
    }

    pub fn private_key(&self) -> &SecretBytes {
        &self.private_key
    }

    /// Sign `message` with the private key.
    pub fn sign(&self, message: &[u8]) -> Result<Vec<u8>, KeyError> {
        let pair = parse_pkcs8(self.private_key.as_bytes())?;
        Ok(pair.sign(message).as_ref().to_vec())
    }

    /// Check an Ed25519 `signature` over `message` against `public_key`.
    pub fn verify_signature(public_key: &[u8], message: &[u8], signature: &[u8]) -> bool {
        signature::UnparsedPublicKey::new(&signature::ED25519, public_key)
            .verify(message, signature)
            .is_ok()
    }
}

fn parse_pkcs8(bytes: &[u8]) -> Result<Ed25519KeyPair, KeyError> {
    Ed25519KeyPair::from_pkcs8(bytes).map_err(|e| KeyError::InvalidKey {
        reason: e.to_string(),
    })
}

/// Produces fresh identity keypairs.
pub trait KeyGenerator: Send + Sync {
    /// Generate a new keypair from a cryptographically secure source.
    ///
    /// Must fail rather than fall back to a fixed or weak keypair.
    fn generate_keypair(&self) -> Result<Identity, KeyError>;
}

/// Ed25519 generator backed by the system CSPRNG.
#[derive(Debug)]
pub struct Ed25519KeyGenerator {
    rng: SystemRandom,
}

impl Ed25519KeyGenerator {
    pub fn new() -> Self {
        Self {
            rng: SystemRandom::new(),
        }
    }
}

impl Default for Ed25519KeyGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyGenerator for Ed25519KeyGenerator {
    fn generate_keypair(&self) -> Result<Identity, KeyError> {
        let pkcs8 = Ed25519KeyPair::generate_pkcs8(&self.rng).map_err(|_| KeyError::Entropy {
            reason: "system random source failed".into(),
        })?;

        let identity = Identity::from_private_key(SecretBytes::new(pkcs8.as_ref().to_vec()))?;
        tracing::debug!(public_key_len = identity.public_key.len(), "generated identity keypair");
        Ok(identity)
    }
}

/// Whether `identity.public_key` is the key derived from its private key.
pub fn verify_keypair(identity: &Identity) -> bool {
    parse_pkcs8(identity.private_key.as_bytes())
        .map(|pair| pair.public_key().as_ref() == identity.public_key.as_slice())
        .unwrap_or(false)
}
