//! Sealed account envelope.
//!
//! The account payload is signed with the account's identity key, then the
//! whole envelope is tagged with an HMAC keyed from the login credentials.
//! A wrong password shows up as a tag mismatch; a valid tag over a bad
//! identity signature means the stored blob itself is damaged.

use base64::{engine::general_purpose, Engine as _};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::error::{LauncherError, LauncherResult};
use crate::keys::{IdentityKeys, KeyProvider};
use crate::types::Credentials;

type HmacSha256 = Hmac<Sha256>;

pub const ENVELOPE_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SealedAccount {
    version: u32,
    public_key: String,
    signature: String,
    payload: String,
    tag: String,
}

/// Opened envelope contents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenedAccount {
    pub public_key: Vec<u8>,
    pub payload: Vec<u8>,
}

pub fn seal(
    credentials: &Credentials,
    keys: &dyn KeyProvider,
    identity: &IdentityKeys,
    payload: &[u8],
) -> LauncherResult<Vec<u8>> {
    let signature = keys.sign(identity, payload);
    let mut sealed = SealedAccount {
        version: ENVELOPE_VERSION,
        public_key: general_purpose::STANDARD.encode(identity.public_key()),
        signature: general_purpose::STANDARD.encode(signature),
        payload: general_purpose::STANDARD.encode(payload),
        tag: String::new(),
    };
    let mut mac = keyed_mac(credentials)?;
    mac.update(canonical_body(&sealed).as_bytes());
    sealed.tag = general_purpose::STANDARD.encode(mac.finalize().into_bytes());

    serde_json::to_vec(&sealed)
        .map_err(|e| LauncherError::Storage(format!("failed to encode account: {}", e)))
}

pub fn open(
    credentials: &Credentials,
    keys: &dyn KeyProvider,
    blob: &[u8],
) -> LauncherResult<OpenedAccount> {
    let sealed: SealedAccount = serde_json::from_slice(blob)
        .map_err(|e| LauncherError::Storage(format!("unreadable account blob: {}", e)))?;
    if sealed.version != ENVELOPE_VERSION {
        return Err(LauncherError::Storage(format!(
            "unsupported account envelope version {}",
            sealed.version
        )));
    }

    let mut mac = keyed_mac(credentials)?;
    mac.update(canonical_body(&sealed).as_bytes());
    let tag = general_purpose::STANDARD
        .decode(sealed.tag.as_bytes())
        .unwrap_or_default();
    if mac.verify_slice(&tag).is_err() {
        return Err(LauncherError::Authentication);
    }

    let public_key = decode_field("public_key", &sealed.public_key)?;
    let signature = decode_field("signature", &sealed.signature)?;
    let payload = decode_field("payload", &sealed.payload)?;
    if !keys.verify(&public_key, &payload, &signature) {
        return Err(LauncherError::Storage(
            "account signature does not match its identity key".to_string(),
        ));
    }

    Ok(OpenedAccount {
        public_key,
        payload,
    })
}

fn keyed_mac(credentials: &Credentials) -> LauncherResult<HmacSha256> {
    HmacSha256::new_from_slice(&credentials.sealing_key())
        .map_err(|e| LauncherError::Storage(format!("sealing key rejected: {}", e)))
}

fn canonical_body(sealed: &SealedAccount) -> String {
    format!(
        "{}|{}|{}|{}",
        sealed.version, sealed.public_key, sealed.signature, sealed.payload
    )
}

fn decode_field(field: &str, value: &str) -> LauncherResult<Vec<u8>> {
    general_purpose::STANDARD
        .decode(value.as_bytes())
        .map_err(|e| LauncherError::Storage(format!("corrupt {} in account blob: {}", field, e)))
}
