//! Shared-secret signatures over raw request bytes.
//!
//! Both storefront webhooks and messaging-gateway callbacks carry a base64
//! HMAC-SHA256 of the exact body bytes. Verification must run on the bytes
//! as received; re-serializing a parsed body changes them.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Base64 HMAC-SHA256 of `body` under `secret`.
pub fn sign(secret: &[u8], body: &[u8]) -> String {
    let mut mac = match HmacSha256::new_from_slice(secret) {
        Ok(mac) => mac,
        // HMAC accepts keys of any length
        Err(_) => return String::new(),
    };
    mac.update(body);
    STANDARD.encode(mac.finalize().into_bytes())
}

/// Check `signature_header` against the body. Never fails: malformed base64
/// or a wrong-length digest is simply a mismatch. Comparison is constant-time.
pub fn verify(secret: &[u8], raw_body: &[u8], signature_header: &str) -> bool {
    let Ok(expected) = STANDARD.decode(signature_header.trim()) else {
        return false;
    };

    let Ok(mut mac) = HmacSha256::new_from_slice(secret) else {
        return false;
    };
    mac.update(raw_body);
    mac.verify_slice(&expected).is_ok()
}
