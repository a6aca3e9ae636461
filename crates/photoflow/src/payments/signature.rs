//! Standard-Webhooks style signatures.
//!
//! The signed content is `{webhook-id}.{webhook-timestamp}.{raw body}`. The
//! `webhook-signature` header carries space-separated `version,base64sig`
//! tokens; only `v1` tokens are checked and any match is accepted.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

const SECRET_PREFIX: &str = "whsec_";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("webhook timestamp is not a unix timestamp")]
    InvalidTimestamp,

    #[error("webhook timestamp outside tolerance")]
    TimestampOutOfTolerance,

    #[error("no v1 signature matched")]
    NoMatchingSignature,

    #[error("webhook secret rejected by hmac")]
    InvalidKey,
}

/// Decoded HMAC key.
#[derive(Clone)]
pub struct WebhookSecret(Vec<u8>);

impl std::fmt::Debug for WebhookSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("WebhookSecret(..)")
    }
}

impl WebhookSecret {
    /// Accepts `whsec_<base64>` or bare base64.
    pub fn from_config(value: &str) -> anyhow::Result<Self> {
        let trimmed = value.trim();
        let encoded = trimmed.strip_prefix(SECRET_PREFIX).unwrap_or(trimmed);
        let key = STANDARD
            .decode(encoded)
            .map_err(|e| anyhow::anyhow!("webhook secret is not valid base64: {e}"))?;
        if key.is_empty() {
            anyhow::bail!("webhook secret is empty");
        }
        Ok(Self(key))
    }

    pub fn from_bytes(key: impl Into<Vec<u8>>) -> Self {
        Self(key.into())
    }

    fn mac(
        &self,
        msg_id: &str,
        timestamp: &str,
        body: &[u8],
    ) -> Result<HmacSha256, SignatureError> {
        let mut mac =
            HmacSha256::new_from_slice(&self.0).map_err(|_| SignatureError::InvalidKey)?;
        mac.update(msg_id.as_bytes());
        mac.update(b".");
        mac.update(timestamp.as_bytes());
        mac.update(b".");
        mac.update(body);
        Ok(mac)
    }

    /// Base64 `v1` signature for the given message.
    pub fn sign(
        &self,
        msg_id: &str,
        timestamp: &str,
        body: &[u8],
    ) -> Result<String, SignatureError> {
        let tag = self.mac(msg_id, timestamp, body)?.finalize().into_bytes();
        Ok(STANDARD.encode(tag))
    }

    /// Check the timestamp against `now` and then every `v1` token.
    pub fn verify(
        &self,
        msg_id: &str,
        timestamp: &str,
        body: &[u8],
        signature_header: &str,
        now_unix: i64,
        tolerance_secs: i64,
    ) -> Result<(), SignatureError> {
        let ts: i64 = timestamp
            .trim()
            .parse()
            .map_err(|_| SignatureError::InvalidTimestamp)?;
        if now_unix.abs_diff(ts) > tolerance_secs.max(0).unsigned_abs() {
            return Err(SignatureError::TimestampOutOfTolerance);
        }

        let mac = self.mac(msg_id, timestamp, body)?;
        let matched = signature_header
            .split_whitespace()
            .filter_map(|token| token.split_once(','))
            .filter(|(version, _)| *version == "v1")
            .filter_map(|(_, sig)| STANDARD.decode(sig).ok())
            .any(|sig| mac.clone().verify_slice(&sig).is_ok());

        if matched {
            Ok(())
        } else {
            Err(SignatureError::NoMatchingSignature)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: i64 = 1_700_000_000;

    fn secret() -> WebhookSecret {
        WebhookSecret::from_config(&format!("whsec_{}", STANDARD.encode(b"test-secret-key")))
            .unwrap()
    }

    #[test]
    fn valid_signature_is_accepted() {
        let s = secret();
        let ts = NOW.to_string();
        let sig = s.sign("msg_1", &ts, b"{\"a\":1}").unwrap();
        let header = format!("v1,{sig}");
        assert!(s.verify("msg_1", &ts, b"{\"a\":1}", &header, NOW, 300).is_ok());
    }

    #[test]
    fn any_matching_v1_token_wins() {
        let s = secret();
        let ts = NOW.to_string();
        let good = s.sign("msg_1", &ts, b"body").unwrap();
        let header = format!("v1,AAAA v2,{good} v1,{good}");
        assert!(s.verify("msg_1", &ts, b"body", &header, NOW, 300).is_ok());

        // correct signature under another version label is ignored
        let header = format!("v1,AAAA v1a,{good}");
        assert_eq!(
            s.verify("msg_1", &ts, b"body", &header, NOW, 300),
            Err(SignatureError::NoMatchingSignature)
        );
    }

    #[test]
    fn single_byte_mutation_fails_in_every_slot() {
        let s = secret();
        let ts = NOW.to_string();
        let body = b"{\"type\":\"payment.succeeded\"}".to_vec();
        let sig = s.sign("msg_1", &ts, &body).unwrap();
        let header = format!("v1,bm90LWl0 v1,{sig}");

        for i in 0..body.len() {
            let mut mutated = body.clone();
            mutated[i] ^= 0x01;
            assert!(s.verify("msg_1", &ts, &mutated, &header, NOW, 300).is_err());
        }
        assert!(s.verify("msg_2", &ts, &body, &header, NOW, 300).is_err());
        let other_ts = (NOW + 1).to_string();
        assert!(s.verify("msg_1", &other_ts, &body, &header, NOW, 300).is_err());
    }

    #[test]
    fn stale_or_garbage_timestamp_is_rejected() {
        let s = secret();
        let old = (NOW - 301).to_string();
        let sig = s.sign("m", &old, b"x").unwrap();
        assert_eq!(
            s.verify("m", &old, b"x", &format!("v1,{sig}"), NOW, 300),
            Err(SignatureError::TimestampOutOfTolerance)
        );
        assert_eq!(
            s.verify("m", "yesterday", b"x", "v1,abc", NOW, 300),
            Err(SignatureError::InvalidTimestamp)
        );
        for extreme in [i64::MIN, i64::MAX] {
            assert_eq!(
                s.verify("m", &extreme.to_string(), b"{}", "v1,AAAA", NOW, 300),
                Err(SignatureError::TimestampOutOfTolerance)
            );
        }
    }

    #[test]
    fn secret_parsing() {
        assert!(WebhookSecret::from_config("whsec_!!!").is_err());
        assert!(WebhookSecret::from_config("whsec_").is_err());
        assert!(WebhookSecret::from_config(&STANDARD.encode(b"k")).is_ok());
    }
}
