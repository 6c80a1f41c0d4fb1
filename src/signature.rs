//! Webhook secret verification.
//!
//! Providers prove a request came from them in one of two ways: a keyed
//! HMAC over the raw body carried in a header, or a shared token sent
//! verbatim. Every comparison here is constant-time.

use hmac::{Hmac, Mac};
use sha1::Sha1;
use sha2::Sha256;
use subtle::ConstantTimeEq;
use tracing::debug;

type HmacSha256 = Hmac<Sha256>;
type HmacSha1 = Hmac<Sha1>;

/// Verifies a `sha256=<hex>` header (GitHub `X-Hub-Signature-256`,
/// Bitbucket `X-Hub-Signature`).
pub fn verify_hub_signature256(secret: &str, payload: &[u8], header: &str) -> bool {
    match header.trim().strip_prefix("sha256=") {
        Some(hex_sig) => verify_hex_signature256(secret, payload, hex_sig),
        None => {
            debug!("Signature header without sha256= prefix");
            false
        }
    }
}

/// Verifies a legacy `sha1=<hex>` header (GitHub `X-Hub-Signature`).
pub fn verify_hub_signature1(secret: &str, payload: &[u8], header: &str) -> bool {
    let Some(hex_sig) = header.trim().strip_prefix("sha1=") else {
        debug!("Signature header without sha1= prefix");
        return false;
    };
    let Ok(expected) = hex::decode(hex_sig) else {
        return false;
    };
    let mut mac = match HmacSha1::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return false,
    };
    mac.update(payload);
    mac.verify_slice(&expected).is_ok()
}

/// Verifies a bare hex HMAC-SHA256 (Gogs/Gitea `X-*-Signature`).
pub fn verify_hex_signature256(secret: &str, payload: &[u8], hex_sig: &str) -> bool {
    let Ok(expected) = hex::decode(hex_sig.trim()) else {
        debug!("Signature is not valid hex");
        return false;
    };
    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return false,
    };
    mac.update(payload);
    mac.verify_slice(&expected).is_ok()
}

/// Compares a shared token without leaking the mismatch position.
pub fn tokens_match(expected: &str, provided: &str) -> bool {
    if expected.len() != provided.len() {
        return false;
    }
    bool::from(expected.as_bytes().ct_eq(provided.as_bytes()))
}

/// Hex HMAC-SHA256 of `payload`, as senders compute it
pub fn sign_sha256(secret: &str, payload: &[u8]) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(payload);
    hex::encode(mac.finalize().into_bytes())
}

/// Hex HMAC-SHA1 of `payload`, as legacy GitHub hooks compute it
pub fn sign_sha1(secret: &str, payload: &[u8]) -> String {
    let mut mac =
        HmacSha1::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(payload);
    hex::encode(mac.finalize().into_bytes())
}
