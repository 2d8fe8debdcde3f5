//! Identity key material and the key provider collaborator.

use std::fmt;
use std::sync::Arc;

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use rand::RngCore;

pub const PUBLIC_KEY_BYTES: usize = 32;
pub const SECRET_KEY_BYTES: usize = 32;

/// Signing identity of an account.
#[derive(Clone)]
pub struct IdentityKeys {
    signing: SigningKey,
}

impl IdentityKeys {
    pub fn from_secret_bytes(secret: &[u8; SECRET_KEY_BYTES]) -> Self {
        Self {
            signing: SigningKey::from_bytes(secret),
        }
    }

    pub fn secret_bytes(&self) -> [u8; SECRET_KEY_BYTES] {
        self.signing.to_bytes()
    }

    pub fn public_key(&self) -> [u8; PUBLIC_KEY_BYTES] {
        self.signing.verifying_key().to_bytes()
    }
}

impl PartialEq for IdentityKeys {
    fn eq(&self, other: &Self) -> bool {
        self.public_key() == other.public_key()
    }
}

impl Eq for IdentityKeys {}

impl fmt::Debug for IdentityKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentityKeys")
            .field("public_key", &hex::encode(self.public_key()))
            .finish_non_exhaustive()
    }
}

/// Produces identity keys and checks signatures and peer keys.
pub trait KeyProvider: Send + Sync {
    fn generate(&self) -> IdentityKeys;

    fn sign(&self, keys: &IdentityKeys, message: &[u8]) -> Vec<u8>;

    fn verify(&self, public_key: &[u8], message: &[u8], signature: &[u8]) -> bool;

    /// Whether `public_key` is a usable session key for a launched app.
    fn validate_public_key(&self, public_key: &[u8]) -> bool;
}

pub type SharedKeyProvider = Arc<dyn KeyProvider>;

/// Ed25519 provider backed by the OS random source.
#[derive(Debug, Clone, Copy, Default)]
pub struct Ed25519Keys;

impl KeyProvider for Ed25519Keys {
    fn generate(&self) -> IdentityKeys {
        let mut secret = [0u8; SECRET_KEY_BYTES];
        OsRng.fill_bytes(&mut secret);
        IdentityKeys::from_secret_bytes(&secret)
    }

    fn sign(&self, keys: &IdentityKeys, message: &[u8]) -> Vec<u8> {
        keys.signing.sign(message).to_bytes().to_vec()
    }

    fn verify(&self, public_key: &[u8], message: &[u8], signature: &[u8]) -> bool {
        let Some(verifying_key) = parse_verifying_key(public_key) else {
            return false;
        };
        let Ok(signature) = Signature::from_slice(signature) else {
            return false;
        };
        verifying_key.verify(message, &signature).is_ok()
    }

    fn validate_public_key(&self, public_key: &[u8]) -> bool {
        parse_verifying_key(public_key).is_some()
    }
}

fn parse_verifying_key(bytes: &[u8]) -> Option<VerifyingKey> {
    let bytes: &[u8; PUBLIC_KEY_BYTES] = bytes.try_into().ok()?;
    VerifyingKey::from_bytes(bytes).ok()
}
