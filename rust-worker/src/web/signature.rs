//! HMAC signatures for admin notification posts.
//!
//! The sender sets `X-Timestamp` (Unix seconds) and `X-Signature`, the hex
//! HMAC-SHA256 of `timestamp + "." + body` under the shared signing key.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::warn;

type HmacSha256 = Hmac<Sha256>;

pub const TIMESTAMP_HEADER: &str = "X-Timestamp";
pub const SIGNATURE_HEADER: &str = "X-Signature";

/// Hex HMAC-SHA256 of `timestamp.body`. `None` only if the key is rejected.
pub fn sign_payload(signing_key: &str, timestamp: &str, body: &[u8]) -> Option<String> {
    let mut mac = HmacSha256::new_from_slice(signing_key.as_bytes()).ok()?;
    mac.update(timestamp.as_bytes());
    mac.update(b".");
    mac.update(body);
    Some(hex::encode(mac.finalize().into_bytes()))
}

/// Verify a notification signature and reject stale timestamps.
pub fn verify_signature(
    signing_key: &str,
    timestamp: &str,
    body: &[u8],
    signature: &str,
    max_age_seconds: u64,
) -> bool {
    if signing_key.is_empty() || timestamp.is_empty() || signature.is_empty() {
        warn!(
            has_signing_key = !signing_key.is_empty(),
            has_timestamp = !timestamp.is_empty(),
            has_signature = !signature.is_empty(),
            "notification_signature_missing_fields"
        );
        return false;
    }

    let sent_at: u64 = match timestamp.parse() {
        Ok(t) => t,
        Err(_) => {
            warn!(timestamp = %timestamp, "notification_signature_invalid_timestamp");
            return false;
        }
    };

    let now = unix_now();
    let age = now.abs_diff(sent_at);

    if age > max_age_seconds {
        warn!(
            sent_at = sent_at,
            current_time = now,
            age_seconds = age,
            max_age_seconds = max_age_seconds,
            "notification_signature_stale"
        );
        return false;
    }

    let Some(expected) = sign_payload(signing_key, timestamp, body) else {
        warn!("notification_signature_invalid_key");
        return false;
    };

    let valid = constant_time_compare(&expected, signature);
    if !valid {
        warn!(
            expected_length = expected.len(),
            actual_length = signature.len(),
            "notification_signature_mismatch"
        );
    }
    valid
}

/// Constant-time string comparison to prevent timing attacks.
pub fn constant_time_compare(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (x, y) in a.bytes().zip(b.bytes()) {
        result |= x ^ y;
    }
    result == 0
}

/// A key that is unset or blank disables signing.
pub fn is_signing_enabled(signing_key: &Option<String>) -> bool {
    signing_key
        .as_ref()
        .map(|k| !k.trim().is_empty())
        .unwrap_or(false)
}

pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verify_missing_fields() {
        assert!(!verify_signature("", "123", b"{}", "sig", 300));
        assert!(!verify_signature("key", "", b"{}", "sig", 300));
        assert!(!verify_signature("key", "123", b"{}", "", 300));
    }

    #[test]
    fn test_verify_invalid_timestamp() {
        assert!(!verify_signature("key", "yesterday", b"{}", "sig", 300));
    }

    #[test]
    fn test_verify_stale() {
        let ts = "946684800";
        let sig = sign_payload("key", ts, b"{}").unwrap();
        assert!(!verify_signature("key", ts, b"{}", &sig, 300));
    }

    #[test]
    fn test_sign_then_verify() {
        let ts = unix_now().to_string();
        let body = br#"{"message":"Verification required","type":"urgent"}"#;
        let sig = sign_payload("shared-key", &ts, body).unwrap();

        assert!(verify_signature("shared-key", &ts, body, &sig, 300));
        assert!(!verify_signature("other-key", &ts, body, &sig, 300));
        assert!(!verify_signature("shared-key", &ts, b"{\"message\":\"x\"}", &sig, 300));
    }

    #[test]
    fn test_constant_time_compare() {
        assert!(constant_time_compare("abc", "abc"));
        assert!(!constant_time_compare("abc", "abd"));
        assert!(!constant_time_compare("abc", "abcd"));
    }

    #[test]
    fn test_is_signing_enabled() {
        assert!(!is_signing_enabled(&None));
        assert!(!is_signing_enabled(&Some("".to_string())));
        assert!(!is_signing_enabled(&Some("   ".to_string())));
        assert!(is_signing_enabled(&Some("key123".to_string())));
    }
}
