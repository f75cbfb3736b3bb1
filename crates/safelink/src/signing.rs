//! HMAC-SHA256 signing and verification over the canonical link message.
//!
//! A signature is the raw HMAC-SHA256 digest of `{url}|{expires_at}` under
//! the 32-byte secret, encoded as URL-safe base64 without padding.
//! Verification recomputes the expected signature and compares in constant
//! time; every internal failure (malformed secret, bad encoding) is
//! swallowed into `false` so verification can never panic or error out.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::error::{Error, Result};

type HmacSha256 = Hmac<Sha256>;

/// Raw secret key length in bytes (64 hex characters).
pub const SECRET_LEN_BYTES: usize = 32;

/// Decode a hex-encoded secret into raw key bytes.
///
/// The input is trimmed and case-insensitive; anything that is not exactly
/// 64 hex characters is a hard validation error, never a silent default.
pub fn decode_secret(secret: &str) -> Result<[u8; SECRET_LEN_BYTES]> {
    let trimmed = secret.trim();
    if trimmed.len() != SECRET_LEN_BYTES * 2 {
        return Err(Error::Validation(format!(
            "secret must be {} hex characters, got {}",
            SECRET_LEN_BYTES * 2,
            trimmed.len()
        )));
    }
    let bytes = hex::decode(trimmed)
        .map_err(|e| Error::Validation(format!("secret is not valid hex: {e}")))?;
    let mut key = [0u8; SECRET_LEN_BYTES];
    key.copy_from_slice(&bytes);
    Ok(key)
}

/// Build the canonical message signed for a link: `{url}|{expires_at}`.
pub fn canonical_message(url: &str, expires_at: i64) -> String {
    format!("{url}|{expires_at}")
}

/// Sign a message with the raw key, returning the URL-safe base64 signature.
pub fn sign(message: &[u8], key: &[u8; SECRET_LEN_BYTES]) -> Result<String> {
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|e| Error::Validation(format!("invalid signing key: {e}")))?;
    mac.update(message);
    Ok(URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes()))
}

/// Sign a link payload with a hex-encoded secret.
pub fn sign_url(url: &str, expires_at: i64, secret: &str) -> Result<String> {
    let key = decode_secret(secret)?;
    sign(canonical_message(url, expires_at).as_bytes(), &key)
}

/// Verify a link signature against a hex-encoded secret.
///
/// Recomputes the expected signature and compares the encoded forms with a
/// constant-time equality check. Returns `false` on any internal failure.
pub fn verify_url(url: &str, expires_at: i64, signature: &str, secret: &str) -> bool {
    let expected = match sign_url(url, expires_at, secret) {
        Ok(sig) => sig,
        Err(_) => return false,
    };
    constant_time_eq(expected.as_bytes(), signature.as_bytes())
}

/// Constant-time byte comparison. The length check is not constant-time,
/// but leaks nothing useful: signature length is public.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.ct_eq(b).into()
}
