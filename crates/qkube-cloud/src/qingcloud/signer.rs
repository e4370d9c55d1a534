//! Request signing (signature version 1, HmacSHA256)
//!
//! Parameters are sorted by name, percent-encoded per RFC 3986 and joined
//! with `&`. The string to sign is `GET\n<path>\n<query>`; the signature is
//! the base64 HMAC-SHA256 of it under the secret access key.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use qkube_common::{Error, Result};

type HmacSha256 = Hmac<Sha256>;

/// Sorted, percent-encoded query string
pub(crate) fn canonical_query(params: &[(String, String)]) -> String {
    let mut sorted: Vec<&(String, String)> = params.iter().collect();
    sorted.sort_by(|a, b| a.0.cmp(&b.0));
    sorted
        .iter()
        .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
        .collect::<Vec<_>>()
        .join("&")
}

pub(crate) fn string_to_sign(path: &str, query: &str) -> String {
    format!("GET\n{}\n{}", path, query)
}

/// Base64 HMAC-SHA256 signature of `message`
pub(crate) fn sign(secret: &str, message: &str) -> Result<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| Error::config(format!("invalid secret access key: {}", e)))?;
    mac.update(message.as_bytes());
    Ok(STANDARD.encode(mac.finalize().into_bytes()))
}

/// Canonical query with the encoded signature appended
pub(crate) fn signed_query(secret: &str, path: &str, params: &[(String, String)]) -> Result<String> {
    let query = canonical_query(params);
    let signature = sign(secret, &string_to_sign(path, &query))?;
    Ok(format!(
        "{}&signature={}",
        query,
        urlencoding::encode(&signature)
    ))
}
