// Authentication types

use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use std::fmt;

/// Credential class an endpoint requires
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    /// Public API: the installer JWT or the container's pre-issued token
    Api,

    /// Private API: container endpoints that need an OAuth token (build history)
    PrivateApi,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Capability::Api => f.write_str("api"),
            Capability::PrivateApi => f.write_str("private-api"),
        }
    }
}

/// A bearer credential held by the session manager
#[derive(Debug, Clone)]
pub struct Session {
    pub token: String,
    pub issued_at: DateTime<Utc>,
    /// None for opaque tokens whose lifetime is unknown
    pub expires_at: Option<DateTime<Utc>>,
}

impl Session {
    /// True when the token outlives `now + margin`
    pub fn is_usable(&self, now: DateTime<Utc>, margin: Duration) -> bool {
        match self.expires_at {
            None => true,
            Some(exp) => exp > now + margin,
        }
    }
}

/// Token obtained from an auth endpoint
#[derive(Debug, Clone)]
pub struct TokenData {
    pub access_token: String,
    pub expires_at: Option<DateTime<Utc>>,
}

/// OAuth token endpoint response
#[derive(Deserialize)]
pub struct OAuthTokenResponse {
    pub access_token: Option<String>,
    pub expires_in: Option<i64>,
}

/// JWT payload fields the manager reads
#[derive(Debug, Deserialize)]
pub struct JwtClaims {
    pub exp: Option<i64>,
    #[allow(dead_code)]
    pub iat: Option<i64>,
    pub sub: Option<String>,
}
