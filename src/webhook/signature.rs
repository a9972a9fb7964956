//! Webhook payload signing
//!
//! Outbound deliveries carry `X-Signature`: the hex-encoded HMAC-SHA256 of
//! the exact serialized body under the shared, out-of-band-configured
//! secret. Receivers recompute the MAC over the raw bytes they received;
//! any mutation of the body after signing invalidates the match.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the payload signature
pub const SIGNATURE_HEADER: &str = "X-Signature";

/// Compute the hex-encoded HMAC-SHA256 of `body` under `secret`.
pub fn compute_signature(secret: &str, body: &[u8]) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts keys of any size");
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

/// Verify a hex-encoded signature against `body`.
///
/// Comparison happens inside the MAC implementation in constant time.
/// Malformed hex never matches.
pub fn verify_signature(secret: &str, body: &[u8], signature_hex: &str) -> bool {
    let Ok(expected) = hex::decode(signature_hex) else {
        return false;
    };
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts keys of any size");
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "whsec_test123secret456";

    #[test]
    fn test_roundtrip() {
        let body = br#"{"event":"payment.completed","data":{"amount":"100"}}"#;
        let signature = compute_signature(SECRET, body);
        assert!(verify_signature(SECRET, body, &signature));
    }

    #[test]
    fn test_modified_payload_rejected() {
        let body = br#"{"event":"payment.completed"}"#;
        let tampered = br#"{"event":"payment.completed","hacked":true}"#;
        let signature = compute_signature(SECRET, body);
        assert!(!verify_signature(SECRET, tampered, &signature));
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let body = br#"{"event":"payment.completed"}"#;
        let signature = compute_signature("wrong-secret", body);
        assert!(!verify_signature(SECRET, body, &signature));
    }

    #[test]
    fn test_malformed_hex_rejected() {
        let body = b"payload";
        assert!(!verify_signature(SECRET, body, "not-hex"));
        assert!(!verify_signature(SECRET, body, ""));
    }

    #[test]
    fn test_signature_is_hex_of_sha256_width() {
        let signature = compute_signature(SECRET, b"x");
        assert_eq!(signature.len(), 64);
        assert!(signature.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
