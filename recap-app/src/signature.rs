//! Webhook signature verification.
//!
//! Both providers sign the raw request body with HMAC-SHA256;
//! verification runs on the untouched bytes, strictly before any JSON
//! parsing. `Mac::verify_slice` gives the constant-time compare.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Verify a bare hex digest, as sent in the billing `X-Signature` header.
pub fn verify_hex_hmac(secret: &str, body: &[u8], signature_hex: &str) -> Result<(), String> {
    if secret.trim().is_empty() {
        return Err("no signing secret configured".to_string());
    }
    if body.is_empty() {
        return Err("empty request body".to_string());
    }
    let signature_hex = signature_hex.trim();
    if signature_hex.is_empty() {
        return Err("missing signature".to_string());
    }

    let expected = hex::decode(signature_hex).map_err(|_| "signature is not valid hex".to_string())?;
    if expected.len() != 32 {
        return Err("signature length mismatch".to_string());
    }

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| "invalid HMAC key length".to_string())?;
    mac.update(body);
    mac.verify_slice(&expected)
        .map_err(|_| "signature mismatch".to_string())
}

/// Verify a `sha256=<hex>` digest, as sent in the chat provider's
/// `X-Hub-Signature-256` header.
pub fn verify_hub_signature(secret: &str, body: &[u8], header: &str) -> Result<(), String> {
    let sig_hex = header
        .trim()
        .strip_prefix("sha256=")
        .ok_or_else(|| "malformed X-Hub-Signature-256 header".to_string())?;
    verify_hex_hmac(secret, body, sig_hex)
}

/// Hex HMAC-SHA256 of a body, for producing test vectors.
#[cfg(test)]
pub fn sign_hex(secret: &str, body: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("hmac accepts any key length");
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}
