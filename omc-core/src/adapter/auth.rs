//! Request signing: `base64(HMAC_SHA256(base64_decode(secret), api_key ||
//! stamp_ms))`, matching the venue's auth headers
//! (`X-PCK`, `X-Stamp`, `X-Signature`).

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthHeaders {
    pub api_key: String,
    pub stamp_ms: i64,
    pub signature: String,
}

/// Compute the `X-Signature` header value for `api_key` at `stamp_ms`
/// using the base64-encoded `api_secret`.
pub fn sign(api_key: &str, api_secret_b64: &str, stamp_ms: i64) -> Result<String, String> {
    let secret_bytes = BASE64
        .decode(api_secret_b64)
        .map_err(|e| format!("api secret is not valid base64: {}", e))?;

    let mut mac =
        HmacSha256::new_from_slice(&secret_bytes).map_err(|e| format!("invalid hmac key length: {}", e))?;
    let message = format!("{}{}", api_key, stamp_ms);
    mac.update(message.as_bytes());
    let tag = mac.finalize().into_bytes();
    Ok(BASE64.encode(tag))
}

pub fn headers(api_key: &str, api_secret_b64: &str, stamp_ms: i64) -> Result<AuthHeaders, String> {
    let signature = sign(api_key, api_secret_b64, stamp_ms)?;
    Ok(AuthHeaders { api_key: api_key.to_string(), stamp_ms, signature })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_is_deterministic_for_the_same_inputs() {
        let secret = BASE64.encode(b"supersecret");
        let a = sign("key1", &secret, 1_700_000_000_000).unwrap();
        let b = sign("key1", &secret, 1_700_000_000_000).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn sign_changes_with_stamp() {
        let secret = BASE64.encode(b"supersecret");
        let a = sign("key1", &secret, 1).unwrap();
        let b = sign("key1", &secret, 2).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn sign_rejects_non_base64_secret() {
        assert!(sign("key1", "not base64!!!", 1).is_err());
    }
}
