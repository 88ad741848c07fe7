//! Provider webhook signature verification.
//!
//! Implements Twilio's canonical scheme: concatenate the full request
//! URL with every POST parameter name and value sorted by name, compute
//! `HMAC-SHA1(auth_token, base_string)`, and base64-encode the digest.
//! The result is compared against the `X-Twilio-Signature` header in
//! constant time.

use std::collections::BTreeMap;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use hmac::{Hmac, Mac};
use sha1::Sha1;

type HmacSha1 = Hmac<Sha1>;

/// Compute the expected signature for a request.
pub fn compute_signature(
    auth_token: &str,
    url: &str,
    params: &BTreeMap<String, String>,
) -> String {
    // BTreeMap iteration is already sorted by key.
    let mut base_string = String::from(url);
    for (key, value) in params {
        base_string.push_str(key);
        base_string.push_str(value);
    }

    let mut mac =
        HmacSha1::new_from_slice(auth_token.as_bytes()).expect("HMAC accepts any key length");
    mac.update(base_string.as_bytes());
    BASE64.encode(mac.finalize().into_bytes())
}

/// Verify a provider signature.
pub fn verify_signature(
    auth_token: &str,
    url: &str,
    params: &BTreeMap<String, String>,
    signature: &str,
) -> bool {
    if signature.is_empty() {
        return false;
    }
    let expected = compute_signature(auth_token, url, params);
    constant_time_eq(expected.as_bytes(), signature.as_bytes())
}

/// Constant-time byte comparison to prevent timing attacks.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}
