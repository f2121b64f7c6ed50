// JWT claim decoding
//
// Signatures are not verified: the token is only inspected to learn when the
// server will stop accepting it.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};

use super::types::JwtClaims;

/// Decode the payload segment of a JWT
pub fn decode_claims(token: &str) -> Option<JwtClaims> {
    let segments: Vec<&str> = token.trim().split('.').collect();
    if segments.len() != 3 {
        return None;
    }

    let bytes = URL_SAFE_NO_PAD
        .decode(segments[1].trim_end_matches('='))
        .ok()?;
    serde_json::from_slice(&bytes).ok()
}

/// Expiry from the `exp` claim, if the token is a JWT carrying one
pub fn expiry(token: &str) -> Option<DateTime<Utc>> {
    decode_claims(token)
        .and_then(|claims| claims.exp)
        .and_then(|exp| DateTime::from_timestamp(exp, 0))
}

/// Subject from the `sub` claim
pub fn subject(token: &str) -> Option<String> {
    decode_claims(token).and_then(|claims| claims.sub)
}
