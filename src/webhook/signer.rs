//! Webhook Signer/Verifier (C8): HMAC-SHA256 signatures over `{timestamp}.{body}`.

use crate::error::ObsrvError;
use crate::traits::Signer;
use chrono::{DateTime, TimeZone, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

pub const REPLAY_TOLERANCE_SECS: i64 = 300;

/// `Signer` adapter over the free functions below, for callers that don't
/// need secret-rotation fallback (single-secret verification).
#[derive(Debug, Clone, Copy, Default)]
pub struct HmacSigner;

impl Signer for HmacSigner {
    fn sign(&self, payload: &str, secret: &str, timestamp: i64) -> String {
        let ts = Utc.timestamp_opt(timestamp, 0).single().unwrap_or_else(Utc::now);
        sign(secret, payload, ts)
    }

    fn verify(
        &self,
        payload: &str,
        signature_header: &str,
        secret: &str,
        now: DateTime<Utc>,
        tolerance_secs: i64,
    ) -> Result<(), ObsrvError> {
        let (t, digest_hex) = parse_header(signature_header).ok_or(ObsrvError::SignatureMismatch)?;
        let diff = (now.timestamp() - t).abs();
        if diff > tolerance_secs {
            return Err(ObsrvError::WebhookReplayRejected { diff_seconds: diff });
        }
        let expected = hex::decode(&digest_hex).map_err(|_| ObsrvError::SignatureMismatch)?;
        if constant_time_eq(&compute_digest(secret, t, payload), &expected) {
            Ok(())
        } else {
            Err(ObsrvError::SignatureMismatch)
        }
    }
}

/// Signs `body` with `secret`, returning a header value of the form
/// `t={unix_seconds},v1={hex_digest}` per spec.md §4.8.
pub fn sign(secret: &str, body: &str, timestamp: DateTime<Utc>) -> String {
    let t = timestamp.timestamp();
    let digest = hex::encode(compute_digest(secret, t, body));
    format!("t={t},v1={digest}")
}

fn compute_digest(secret: &str, t: i64, body: &str) -> Vec<u8> {
    let message = format!("{t}.{body}");
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts keys of any length");
    mac.update(message.as_bytes());
    mac.finalize().into_bytes().to_vec()
}

fn parse_header(header: &str) -> Option<(i64, String)> {
    let mut t: Option<i64> = None;
    let mut v1: Option<String> = None;
    for part in header.split(',') {
        let mut kv = part.splitn(2, '=');
        match (kv.next(), kv.next()) {
            (Some("t"), Some(v)) => t = v.parse().ok(),
            (Some("v1"), Some(v)) => v1 = Some(v.to_string()),
            _ => {}
        }
    }
    Some((t?, v1?))
}

/// Verifies `header` against `body`, trying `current_secret` and falling back
/// to `previous_secret` if rotation is in progress (spec.md §4.8 invariant 6).
/// Rejects signatures whose timestamp is more than
/// [`REPLAY_TOLERANCE_SECS`] away from `now`.
pub fn verify(
    header: &str,
    body: &str,
    current_secret: &str,
    previous_secret: Option<&str>,
    now: DateTime<Utc>,
) -> Result<(), ObsrvError> {
    let (t, digest_hex) = parse_header(header).ok_or(ObsrvError::SignatureMismatch)?;

    let diff = (now.timestamp() - t).abs();
    if diff > REPLAY_TOLERANCE_SECS {
        return Err(ObsrvError::WebhookReplayRejected { diff_seconds: diff });
    }

    let expected_bytes = hex::decode(&digest_hex).map_err(|_| ObsrvError::SignatureMismatch)?;

    let matches_current = constant_time_eq(&compute_digest(current_secret, t, body), &expected_bytes);
    let matches_previous = previous_secret
        .map(|secret| constant_time_eq(&compute_digest(secret, t, body), &expected_bytes))
        .unwrap_or(false);

    if matches_current || matches_previous {
        Ok(())
    } else {
        Err(ObsrvError::SignatureMismatch)
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn sign_then_verify_roundtrips() {
        let now = Utc::now();
        let header = sign("secret", "{\"a\":1}", now);
        assert!(verify(&header, "{\"a\":1}", "secret", None, now).is_ok());
    }

    #[test]
    fn tampered_body_rejected() {
        let now = Utc::now();
        let header = sign("secret", "{\"a\":1}", now);
        assert!(verify(&header, "{\"a\":2}", "secret", None, now).is_err());
    }

    #[test]
    fn stale_timestamp_rejected_as_replay() {
        let now = Utc::now();
        let header = sign("secret", "body", now - Duration::seconds(301));
        let err = verify(&header, "body", "secret", None, now).unwrap_err();
        assert!(matches!(err, ObsrvError::WebhookReplayRejected { .. }));
    }

    #[test]
    fn falls_back_to_previous_secret_during_rotation() {
        let now = Utc::now();
        let header = sign("old-secret", "body", now);
        assert!(verify(&header, "body", "new-secret", Some("old-secret"), now).is_ok());
    }

    #[test]
    fn wrong_secret_without_fallback_rejected() {
        let now = Utc::now();
        let header = sign("old-secret", "body", now);
        assert!(verify(&header, "body", "new-secret", None, now).is_err());
    }
}
