//! Hashing, HMAC and encoding helpers shared by the expression functions and
//! the request signers.

use base64::{Engine as _, engine::general_purpose::STANDARD};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

/// Lowercase hex SHA-256 digest.
pub fn sha256_hex(input: &str) -> String {
    hex::encode(Sha256::digest(input.as_bytes()))
}

/// Raw HMAC-SHA256 of `payload` keyed by `key`.
pub fn hmac_sha256(payload: &str, key: &str) -> Vec<u8> {
    let mut mac = match HmacSha256::new_from_slice(key.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => unreachable!("hmac keys of any length are valid"),
    };
    mac.update(payload.as_bytes());
    mac.finalize().into_bytes().to_vec()
}

/// Lowercase hex HMAC-SHA256.
///
/// ```rust
/// use conduit_util::crypto::hmac_sha256_hex;
///
/// assert_eq!(
///     hmac_sha256_hex(r#"{"a":1}"#, "k"),
///     "c3a92ff9e274cdcce27a58c15a78ec6dcbbdbd0038a87e7a11baef2028fd8bff"
/// );
/// ```
pub fn hmac_sha256_hex(payload: &str, key: &str) -> String {
    hex::encode(hmac_sha256(payload, key))
}

/// Standard (padded) base64 HMAC-SHA256.
pub fn hmac_sha256_base64(payload: &str, key: &str) -> String {
    STANDARD.encode(hmac_sha256(payload, key))
}

pub fn base64_encode(input: &str) -> String {
    STANDARD.encode(input.as_bytes())
}
