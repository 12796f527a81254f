//! Credential decoding.
//!
//! An access token is a three-segment, `.`-delimited JWT. Only the payload's
//! `exp` claim matters here; signatures are the server's business. Anything
//! that fails to decode counts as expired.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::time::Duration;
use thiserror::Error;

/// Default clock-skew tolerance: none.
pub const DEFAULT_EXPIRY_LEEWAY: Duration = Duration::ZERO;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("expected 3 segments, found {0}")]
    SegmentCount(usize),

    #[error("payload is not base64url: {0}")]
    Base64(String),

    #[error("payload is not a JSON object: {0}")]
    Json(String),

    #[error("payload has no numeric exp claim")]
    MissingExp,

    #[error("exp claim {0} is out of range")]
    ExpOutOfRange(String),
}

/// The parts of a credential the session core relies on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodedCredential {
    pub expires_at: DateTime<Utc>,
}

/// Decode an access token's payload and extract its expiry.
pub fn decode(access_token: &str) -> Result<DecodedCredential, DecodeError> {
    let segments: Vec<&str> = access_token.split('.').collect();
    if segments.len() != 3 {
        return Err(DecodeError::SegmentCount(segments.len()));
    }

    // Some issuers keep the padding; the URL-safe alphabet is the same either way.
    let payload = segments[1].trim_end_matches('=');
    let bytes = URL_SAFE_NO_PAD
        .decode(payload)
        .map_err(|e| DecodeError::Base64(e.to_string()))?;

    let claims: Map<String, Value> =
        serde_json::from_slice(&bytes).map_err(|e| DecodeError::Json(e.to_string()))?;

    let exp = claims
        .get("exp")
        .and_then(Value::as_f64)
        .ok_or(DecodeError::MissingExp)?;

    let millis = exp * 1000.0;
    if !millis.is_finite() || millis.abs() > i64::MAX as f64 {
        return Err(DecodeError::ExpOutOfRange(exp.to_string()));
    }
    let expires_at = DateTime::from_timestamp_millis(millis as i64)
        .ok_or_else(|| DecodeError::ExpOutOfRange(exp.to_string()))?;

    Ok(DecodedCredential { expires_at })
}

/// Expiry of `access_token`, or `None` if it does not decode.
pub fn expires_at(access_token: &str) -> Option<DateTime<Utc>> {
    decode(access_token).ok().map(|d| d.expires_at)
}

/// Strict expiry check: true on any decode failure, else `exp < now`.
pub fn is_expired(access_token: &str, now: DateTime<Utc>) -> bool {
    is_expired_with_leeway(access_token, now, DEFAULT_EXPIRY_LEEWAY)
}

/// Like [`is_expired`], but a token stays valid until `exp + leeway`.
pub fn is_expired_with_leeway(access_token: &str, now: DateTime<Utc>, leeway: Duration) -> bool {
    match decode(access_token) {
        Ok(decoded) => {
            let leeway = chrono::Duration::from_std(leeway).unwrap_or(chrono::Duration::zero());
            decoded.expires_at + leeway < now
        }
        Err(_) => true,
    }
}

#[cfg(test)]
pub(crate) mod test_tokens {
    use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
    use serde_json::json;

    /// Build an unsigned JWT whose payload carries `exp` (and a marker claim so
    /// tokens with the same expiry still differ).
    pub fn jwt_with_exp(exp: i64, marker: &str) -> String {
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
        let payload = URL_SAFE_NO_PAD.encode(json!({ "exp": exp, "jti": marker }).to_string());
        format!("{}.{}.signature", header, payload)
    }

    pub fn jwt_with_payload(payload: &str) -> String {
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256"}"#);
        format!("{}.{}.sig", header, URL_SAFE_NO_PAD.encode(payload))
    }
}
