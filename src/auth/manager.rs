use anyhow::Context;
use chrono::{Duration, Utc};
use reqwest::Client;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

use super::exchange;
use super::jwt;
use super::types::{Capability, Session};
use crate::config::{AuthMode, ClientSettings, ConnectionConfig};
use crate::error::{ApiError, Result};

/// Session manager
/// Owns the bearer credentials for each capability and replaces them before they expire.
///
/// Each capability slot is an async mutex held across the authentication round
/// trip, so concurrent callers that find an expired session wait for one
/// exchange instead of starting their own.
pub struct SessionManager {
    /// Connection settings, shared with the executor
    config: Arc<ConnectionConfig>,

    /// Session for the public API
    primary: Mutex<Option<Session>>,

    /// OAuth session for the private API (container mode only)
    private: Mutex<Option<Session>>,

    /// HTTP client for auth requests
    client: Client,

    /// Sessions this close to expiry are replaced before use
    safety_margin: Duration,

    /// Lifetime assumed for tokens without an `exp` claim
    fallback_ttl: Duration,

    /// Completed authentication round trips
    round_trips: AtomicU64,
}

impl SessionManager {
    /// Create a new SessionManager; no authentication happens until a credential is requested
    pub fn new(config: Arc<ConnectionConfig>, settings: &ClientSettings) -> Result<Self> {
        let client = Client::builder()
            .timeout(settings.request_timeout)
            .connect_timeout(settings.connect_timeout)
            .danger_accept_invalid_certs(!config.verify_tls)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            config,
            primary: Mutex::new(None),
            private: Mutex::new(None),
            client,
            safety_margin: settings.safety_margin,
            fallback_ttl: settings.fallback_token_ttl,
            round_trips: AtomicU64::new(0),
        })
    }

    /// Slot holding the session for a capability.
    /// Installer JWTs serve both capabilities.
    fn slot(&self, capability: Capability) -> &Mutex<Option<Session>> {
        match (&self.config.auth, capability) {
            (AuthMode::Container { .. }, Capability::PrivateApi) => &self.private,
            _ => &self.primary,
        }
    }

    /// Whether the configuration can produce a credential for `capability`
    pub fn supports(&self, capability: Capability) -> bool {
        match (&self.config.auth, capability) {
            (AuthMode::Container { oauth, .. }, Capability::PrivateApi) => oauth.is_some(),
            _ => true,
        }
    }

    /// Get a bearer credential that stays valid beyond the safety margin,
    /// authenticating first when no usable session is held
    pub async fn get_valid_credential(&self, capability: Capability) -> Result<String> {
        if !self.supports(capability) {
            return Err(ApiError::CapabilityMissing(capability));
        }

        let mut guard = self.slot(capability).lock().await;

        if let Some(session) = guard.as_ref() {
            if session.is_usable(Utc::now(), self.safety_margin) {
                return Ok(session.token.clone());
            }
            tracing::debug!(
                capability = %capability,
                expires_at = ?session.expires_at,
                "Session expiring soon, re-authenticating"
            );
        }

        let session = self.establish(capability).await?;
        let token = session.token.clone();
        *guard = Some(session);
        Ok(token)
    }

    /// Authenticate now and replace the held session for `capability`
    pub async fn authenticate(&self, capability: Capability) -> Result<()> {
        if !self.supports(capability) {
            return Err(ApiError::CapabilityMissing(capability));
        }

        let mut guard = self.slot(capability).lock().await;
        let session = self.establish(capability).await?;
        *guard = Some(session);
        Ok(())
    }

    /// Drop the held session so the next request re-authenticates
    pub async fn invalidate(&self, capability: Capability) {
        let mut guard = self.slot(capability).lock().await;
        if guard.take().is_some() {
            tracing::info!(capability = %capability, "Session invalidated");
        }
    }

    /// Drop the held session only if it still holds `stale_token`.
    /// A concurrent request may already have replaced it.
    pub async fn invalidate_token(&self, capability: Capability, stale_token: &str) {
        let mut guard = self.slot(capability).lock().await;
        let is_current = guard
            .as_ref()
            .map(|s| s.token == stale_token)
            .unwrap_or(false);
        if is_current {
            *guard = None;
            tracing::info!(capability = %capability, "Rejected session invalidated");
        }
    }

    /// Invalidate every session and authenticate the primary one again
    pub async fn force_refresh(&self) -> Result<String> {
        self.invalidate(Capability::Api).await;
        self.invalidate(Capability::PrivateApi).await;
        self.get_valid_credential(Capability::Api).await
    }

    /// Number of completed authentication round trips
    pub fn auth_round_trips(&self) -> u64 {
        self.round_trips.load(Ordering::SeqCst)
    }

    pub fn config(&self) -> &Arc<ConnectionConfig> {
        &self.config
    }

    /// Obtain a fresh session for `capability`. The caller holds the slot lock.
    async fn establish(&self, capability: Capability) -> Result<Session> {
        let now = Utc::now();

        let session = match &self.config.auth {
            AuthMode::Installer { username, password } => {
                let data = exchange::installer_password_exchange(
                    &self.client,
                    &self.config,
                    username,
                    password,
                    self.fallback_ttl,
                )
                .await?;
                self.round_trips.fetch_add(1, Ordering::SeqCst);
                Session {
                    token: data.access_token,
                    issued_at: now,
                    expires_at: data.expires_at,
                }
            }

            AuthMode::Container { token, .. } if capability == Capability::Api => Session {
                token: token.clone(),
                issued_at: now,
                expires_at: jwt::expiry(token),
            },

            AuthMode::Container { oauth, .. } => {
                let oauth = oauth
                    .as_ref()
                    .ok_or(ApiError::CapabilityMissing(capability))?;
                let data =
                    exchange::oauth_token(&self.client, &self.config, oauth, self.fallback_ttl)
                        .await?;
                self.round_trips.fetch_add(1, Ordering::SeqCst);
                Session {
                    token: data.access_token,
                    issued_at: now,
                    expires_at: data.expires_at,
                }
            }
        };

        if !session.is_usable(Utc::now(), self.safety_margin) {
            let message = match &self.config.auth {
                AuthMode::Container { .. } if capability == Capability::Api => {
                    "pre-issued token is expired and cannot be refreshed; issue a new token"
                }
                _ => "issued token expires within the safety margin",
            };
            tracing::error!(
                capability = %capability,
                expires_at = ?session.expires_at,
                "{}",
                message
            );
            return Err(ApiError::AuthenticationError {
                status: None,
                message: message.to_string(),
            });
        }

        tracing::debug!(
            capability = %capability,
            issued_at = %session.issued_at.to_rfc3339(),
            expires_at = ?session.expires_at,
            "Session established"
        );
        Ok(session)
    }

    /// Install a session directly, bypassing authentication
    #[cfg(test)]
    pub(crate) async fn seed_session(&self, capability: Capability, session: Session) {
        *self.slot(capability).lock().await = Some(session);
    }
}
