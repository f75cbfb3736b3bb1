//! Expiring signed redirect links.
//!
//! A signed link is `{base}/go?to={target}&exp={epoch}&sig={signature}`
//! where the signature covers `{target}|{epoch}`. Verification reports two
//! independent facts: whether the signature is authentic and whether the
//! link has expired — an expired link with a valid signature is still
//! cryptographically sound, just stale.

use chrono::Utc;
use serde::Serialize;
use url::Url;

use crate::error::{Error, Result};
use crate::signing;

/// Default link lifetime when the caller does not specify one.
pub const DEFAULT_TTL_MINUTES: i64 = 10;

/// A generated A/B pair of signed links.
///
/// Each link computes its own expiry at signing time; the two may differ
/// by the wall-clock delta between the calls.
#[derive(Debug, Clone, Serialize)]
pub struct AbPair {
    #[serde(rename = "A")]
    pub a: String,
    #[serde(rename = "B")]
    pub b: String,
}

/// Outcome of verifying a signed link: two independent facts.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct Verification {
    pub valid: bool,
    pub expired: bool,
}

/// Accept only absolute http/https URLs.
pub fn validate_http_url(raw: &str) -> Result<()> {
    let parsed = Url::parse(raw)
        .map_err(|e| Error::Validation(format!("invalid URL {raw:?}: {e}")))?;
    match parsed.scheme() {
        "http" | "https" => Ok(()),
        other => Err(Error::Validation(format!(
            "URL scheme must be http or https, got {other:?}"
        ))),
    }
}

/// Build a signed redirect URL expiring `ttl_minutes` from now.
pub fn generate_signed_url(
    base_url: &str,
    target_url: &str,
    ttl_minutes: i64,
    secret: &str,
) -> Result<String> {
    let base = base_url.trim_end_matches('/');
    let expires_at = Utc::now().timestamp() + ttl_minutes * 60;
    let signature = signing::sign_url(target_url, expires_at, secret)?;

    Ok(format!(
        "{base}/go?to={}&exp={expires_at}&sig={}",
        urlencoding::encode(target_url),
        urlencoding::encode(&signature),
    ))
}

/// Generate a signed link per variant. Two independent signing calls; see
/// [`AbPair`] for the expiry policy.
pub fn generate_ab_pair(
    base_url: &str,
    url_a: &str,
    url_b: &str,
    ttl_minutes: i64,
    secret: &str,
) -> Result<AbPair> {
    Ok(AbPair {
        a: generate_signed_url(base_url, url_a, ttl_minutes, secret)?,
        b: generate_signed_url(base_url, url_b, ttl_minutes, secret)?,
    })
}

/// Verify a link's signature and expiry against the current clock.
///
/// Signature validity is purely a function of the inputs; the expiry check
/// never affects it. Malformed secrets or signatures yield `valid: false`
/// rather than an error.
pub fn verify_signature(target_url: &str, expires_at: i64, signature: &str, secret: &str) -> Verification {
    verify_signature_at(target_url, expires_at, signature, secret, Utc::now().timestamp())
}

/// Clock-injected form of [`verify_signature`].
pub fn verify_signature_at(
    target_url: &str,
    expires_at: i64,
    signature: &str,
    secret: &str,
    now_epoch: i64,
) -> Verification {
    Verification {
        valid: signing::verify_url(target_url, expires_at, signature, secret),
        expired: now_epoch > expires_at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY_HEX: &str = "a3f201cc9d8e4b16502f77aa31c84ed90b6d5f8812c4ae07d3915bb04c6fe281";

    fn parse_query(link: &str) -> (String, i64, String) {
        let url = Url::parse(link).unwrap();
        let mut to = None;
        let mut exp = None;
        let mut sig = None;
        for (k, v) in url.query_pairs() {
            match k.as_ref() {
                "to" => to = Some(v.into_owned()),
                "exp" => exp = Some(v.parse::<i64>().unwrap()),
                "sig" => sig = Some(v.into_owned()),
                _ => {}
            }
        }
        (to.unwrap(), exp.unwrap(), sig.unwrap())
    }

    #[test]
    fn test_generated_link_shape() {
        let link =
            generate_signed_url("https://gate.example/", "https://lp.example/offer?id=7", 10, KEY_HEX)
                .unwrap();
        // Trailing slash stripped, /go path appended
        assert!(link.starts_with("https://gate.example/go?to="));

        let (to, _, _) = parse_query(&link);
        assert_eq!(to, "https://lp.example/offer?id=7");
    }

    #[test]
    fn test_fresh_link_verifies_valid_and_unexpired() {
        let link = generate_signed_url("https://gate.example", "https://lp.example", 10, KEY_HEX)
            .unwrap();
        let (to, exp, sig) = parse_query(&link);

        let verification = verify_signature(&to, exp, &sig, KEY_HEX);
        assert!(verification.valid);
        assert!(!verification.expired);
    }

    #[test]
    fn test_expiry_is_independent_of_signature_validity() {
        let link = generate_signed_url("https://gate.example", "https://lp.example", 10, KEY_HEX)
            .unwrap();
        let (to, exp, sig) = parse_query(&link);

        // One second past the deadline: expired, but the signature still checks out
        let late = verify_signature_at(&to, exp, &sig, KEY_HEX, exp + 1);
        assert!(late.valid);
        assert!(late.expired);

        // Tampered target: invalid signature, expiry unaffected
        let tampered = verify_signature_at("https://evil.example", exp, &sig, KEY_HEX, exp - 60);
        assert!(!tampered.valid);
        assert!(!tampered.expired);
    }

    #[test]
    fn test_expiry_boundary_is_exclusive() {
        // now == expires_at is not yet expired; expiry needs now > expires_at
        let v = verify_signature_at("https://lp.example", 1000, "x", KEY_HEX, 1000);
        assert!(!v.expired);
        let v = verify_signature_at("https://lp.example", 1000, "x", KEY_HEX, 1001);
        assert!(v.expired);
    }

    #[test]
    fn test_ttl_lands_in_expected_window() {
        let before = Utc::now().timestamp();
        let link = generate_signed_url("https://gate.example", "https://lp.example", 10, KEY_HEX)
            .unwrap();
        let after = Utc::now().timestamp();

        let (_, exp, _) = parse_query(&link);
        assert!(exp >= before + 600);
        assert!(exp <= after + 600);
    }

    #[test]
    fn test_ab_pair_signs_both_variants() {
        let pair = generate_ab_pair(
            "https://gate.example",
            "https://lp.example/a",
            "https://lp.example/b",
            10,
            KEY_HEX,
        )
        .unwrap();

        let (to_a, exp_a, sig_a) = parse_query(&pair.a);
        let (to_b, exp_b, sig_b) = parse_query(&pair.b);
        assert_eq!(to_a, "https://lp.example/a");
        assert_eq!(to_b, "https://lp.example/b");
        assert!(verify_signature_at(&to_a, exp_a, &sig_a, KEY_HEX, exp_a - 1).valid);
        assert!(verify_signature_at(&to_b, exp_b, &sig_b, KEY_HEX, exp_b - 1).valid);
        // A's signature must not validate B's link
        assert!(!verify_signature_at(&to_b, exp_b, &sig_a, KEY_HEX, exp_b - 1).valid);
    }

    #[test]
    fn test_generate_rejects_bad_secret() {
        assert!(generate_signed_url("https://gate.example", "https://lp.example", 10, "short").is_err());
    }

    #[test]
    fn test_validate_http_url() {
        assert!(validate_http_url("https://example.com/path?q=1").is_ok());
        assert!(validate_http_url("http://example.com").is_ok());
        assert!(validate_http_url("ftp://example.com").is_err());
        assert!(validate_http_url("javascript:alert(1)").is_err());
        assert!(validate_http_url("not a url").is_err());
        assert!(validate_http_url("").is_err());
    }
}
