//! Webhook signature verification.
//!
//! The header carries `sha256=<hex>` computed as HMAC-SHA256 over the raw
//! request body with the webhook's shared secret. Verification recomputes
//! the MAC and compares in constant time; the body is used exactly as
//! received, before any normalization.

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::{Error, Result};

type HmacSha256 = Hmac<Sha256>;

/// Compute the signature header value for a body (webhook provisioning,
/// tests).
#[must_use]
pub fn sign(secret: &str, body: &[u8]) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(body);
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}

/// Verify a supplied signature header against the raw body.
///
/// # Errors
///
/// Returns `auth/signature_invalid` on malformed headers, bad hex, or MAC
/// mismatch. The MAC comparison itself is constant-time.
pub fn verify(secret: &str, body: &[u8], header: &str) -> Result<()> {
    let hex_digest = header
        .strip_prefix("sha256=")
        .ok_or(Error::SignatureInvalid)?;
    let supplied = hex::decode(hex_digest).map_err(|_| Error::SignatureInvalid)?;

    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(body);
    mac.verify_slice(&supplied).map_err(|_| Error::SignatureInvalid)
}
