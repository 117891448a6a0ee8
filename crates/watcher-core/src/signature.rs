//! Constant-time HMAC-SHA256 verification with provider-specific envelopes.
//!
//! See spec §4.3.1 / §6.2 for the four envelope shapes this module supports.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// How the signature header is wrapped around the raw HMAC hex digest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureEnvelope {
    /// `"sha256=" + hex(HMAC-SHA256(secret, rawBody))` (code-forge style).
    HmacPrefixed,
    /// Bare `hex(HMAC-SHA256(secret, rawBody))`, no prefix (Linear style).
    HmacBareHex,
}

/// Replay-guarded chat-platform envelope: `"v0:" + timestamp + ":" + rawBody`,
/// rejected outside the allowed skew window.
pub const REPLAY_WINDOW_SECS: i64 = 300;

fn hmac_hex(secret: &str, basestring: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC accepts a key of any length");
    mac.update(basestring);
    hex::encode(mac.finalize().into_bytes())
}

/// Constant-time string comparison. Used for every signature/token check so
/// that verification time does not leak information about the secret via
/// early mismatch on unequal bytes. Differing-length inputs are rejected
/// immediately (their own form of early termination, which leaks only the
/// length class, never per-byte content).
fn constant_time_eq(a: &str, b: &str) -> bool {
    let a = a.as_bytes();
    let b = b.as_bytes();
    if a.len() != b.len() {
        return false;
    }
    a.ct_eq(b).into()
}

pub struct SignatureVerifier;

impl SignatureVerifier {
    /// Verify an HMAC envelope (prefixed or bare-hex) over the raw body.
    pub fn verify_hmac(
        envelope: SignatureEnvelope,
        secret: &str,
        raw_body: &[u8],
        header_value: &str,
    ) -> bool {
        let expected = hmac_hex(secret, raw_body);
        let candidate = match envelope {
            SignatureEnvelope::HmacPrefixed => match header_value.strip_prefix("sha256=") {
                Some(rest) => rest,
                None => return false,
            },
            SignatureEnvelope::HmacBareHex => header_value,
        };
        constant_time_eq(&expected, candidate)
    }

    /// Verify the replay-guarded chat envelope: `v0=hex(HMAC(secret, "v0:ts:body"))`,
    /// rejecting when `|now - ts| > REPLAY_WINDOW_SECS`.
    pub fn verify_replay_guarded(
        secret: &str,
        raw_body: &[u8],
        timestamp_header: &str,
        signature_header: &str,
        now_unix: i64,
    ) -> bool {
        let Ok(ts) = timestamp_header.parse::<i64>() else {
            return false;
        };
        if (now_unix - ts).abs() > REPLAY_WINDOW_SECS {
            return false;
        }
        let Some(candidate) = signature_header.strip_prefix("v0=") else {
            return false;
        };
        let mut basestring = format!("v0:{ts}:").into_bytes();
        basestring.extend_from_slice(raw_body);
        let expected = hmac_hex(secret, &basestring);
        constant_time_eq(&expected, candidate)
    }

    /// Verify a plain shared-token header (token-compare envelope).
    pub fn verify_token(secret: &str, header_value: &str) -> bool {
        constant_time_eq(secret, header_value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hmac_prefixed_round_trips() {
        let secret = "topsecret";
        let body = b"hello world";
        let digest = hmac_hex(secret, body);
        let header = format!("sha256={digest}");
        assert!(SignatureVerifier::verify_hmac(
            SignatureEnvelope::HmacPrefixed,
            secret,
            body,
            &header
        ));
        assert!(!SignatureVerifier::verify_hmac(
            SignatureEnvelope::HmacPrefixed,
            secret,
            body,
            "sha256=deadbeef"
        ));
    }

    #[test]
    fn hmac_bare_hex_round_trips() {
        let secret = "topsecret";
        let body = b"hello world";
        let digest = hmac_hex(secret, body);
        assert!(SignatureVerifier::verify_hmac(
            SignatureEnvelope::HmacBareHex,
            secret,
            body,
            &digest
        ));
    }

    #[test]
    fn hmac_prefixed_rejects_missing_prefix() {
        let secret = "topsecret";
        let body = b"hello world";
        let digest = hmac_hex(secret, body);
        assert!(!SignatureVerifier::verify_hmac(
            SignatureEnvelope::HmacPrefixed,
            secret,
            body,
            &digest
        ));
    }

    #[test]
    fn replay_window_boundary_accepts_300_rejects_301() {
        let secret = "s";
        let body = b"payload";
        let ts = 1_700_000_000_i64;
        let basestring = format!("v0:{ts}:").into_bytes();
        let mut full = basestring;
        full.extend_from_slice(body);
        let digest = hmac_hex(secret, &full);
        let header = format!("v0={digest}");

        assert!(SignatureVerifier::verify_replay_guarded(
            secret,
            body,
            &ts.to_string(),
            &header,
            ts + 300,
        ));
        assert!(!SignatureVerifier::verify_replay_guarded(
            secret,
            body,
            &ts.to_string(),
            &header,
            ts + 301,
        ));
    }

    #[test]
    fn token_compare_is_exact() {
        assert!(SignatureVerifier::verify_token("abc123", "abc123"));
        assert!(!SignatureVerifier::verify_token("abc123", "abc124"));
        assert!(!SignatureVerifier::verify_token("abc123", "abc12"));
    }
}
