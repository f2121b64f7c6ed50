use anyhow::Context;
use reqwest::{header, Client, Method, Response};
use serde_json::Value;
use std::sync::Arc;

use crate::auth::{Capability, SessionManager};
use crate::config::ClientSettings;
use crate::error::{FailureKind, HttpFailure, Result};
use crate::retry::{AttemptOutcome, Decision, RetryPolicy};

/// One call against the platform API
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    /// Path below the API base, starting with `/`
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
    /// Credential class the endpoint needs
    pub capability: Capability,
    /// Safe to resend after the server may have seen it
    pub idempotent: bool,
}

impl ApiRequest {
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            method: Method::GET,
            path: path.into(),
            query: Vec::new(),
            body: None,
            capability: Capability::Api,
            idempotent: true,
        }
    }

    /// POST requests are treated as non-idempotent
    pub fn post(path: impl Into<String>) -> Self {
        Self {
            method: Method::POST,
            idempotent: false,
            ..Self::get(path)
        }
    }

    pub fn query(mut self, key: &str, value: impl ToString) -> Self {
        self.query.push((key.to_string(), value.to_string()));
        self
    }

    pub fn json(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn capability(mut self, capability: Capability) -> Self {
        self.capability = capability;
        self
    }
}

/// HTTP client for the aggregate API with retry logic
pub struct AggregateHttpClient {
    /// Shared HTTP client with connection pooling
    client: Client,

    /// Session manager handing out bearer credentials
    sessions: Arc<SessionManager>,

    /// Retry/backoff policy
    retry: RetryPolicy,

    /// Base URL requests are issued against
    base_url: String,
}

impl AggregateHttpClient {
    /// Create a new HTTP client
    pub fn new(sessions: Arc<SessionManager>, settings: &ClientSettings) -> Result<Self> {
        let config = sessions.config();
        let client = Client::builder()
            .connect_timeout(settings.connect_timeout)
            .timeout(settings.request_timeout)
            .danger_accept_invalid_certs(!config.verify_tls)
            .build()
            .context("Failed to create HTTP client")?;
        let base_url = config.api_base();

        Ok(Self {
            client,
            sessions,
            retry: settings.retry.clone(),
            base_url,
        })
    }

    /// Execute a request with retry logic
    /// Automatically handles:
    /// - 401: invalidates the session, re-authenticates and retries once
    /// - 5xx and transport errors: exponential backoff, idempotent requests only
    ///   (connection failures are retried for every request)
    /// - other 4xx: returned immediately; a 403 also drops the session
    pub async fn execute(&self, request: &ApiRequest) -> std::result::Result<Value, HttpFailure> {
        let capability = request.capability;
        let url = format!("{}{}", self.base_url, request.path);
        let mut attempts = 0u32;
        let mut reauthenticated = false;

        tracing::debug!(
            method = %request.method,
            url = %url,
            capability = %capability,
            "Sending HTTP request"
        );

        loop {
            let token = self
                .sessions
                .get_valid_credential(capability)
                .await
                .map_err(|e| HttpFailure::from_auth(e, capability))?;

            attempts += 1;
            tracing::debug!(
                attempt = attempts,
                max_attempts = self.retry.max_attempts,
                "Executing request attempt"
            );

            let mut builder = self
                .client
                .request(request.method.clone(), &url)
                .bearer_auth(&token)
                .header(header::ACCEPT, "application/json");
            if !request.query.is_empty() {
                builder = builder.query(&request.query);
            }
            if let Some(body) = &request.body {
                builder = builder.json(body);
            }

            let (outcome, failure) = match builder.send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        tracing::debug!(status = %status, "Request successful");
                        return read_payload(response, capability).await;
                    }

                    let error_text = response.text().await.unwrap_or_default();
                    tracing::warn!(
                        status = %status,
                        url = %url,
                        attempt = attempts,
                        "Received error response"
                    );
                    (
                        AttemptOutcome::Status(status.as_u16()),
                        HttpFailure::from_status(status.as_u16(), error_text, capability),
                    )
                }

                Err(e) => {
                    // Categorize the error for better debugging
                    let (outcome, error_kind) = if e.is_connect() {
                        (AttemptOutcome::ConnectFailed, "connection_failed")
                    } else if e.is_timeout() {
                        (AttemptOutcome::TimedOut, "timeout")
                    } else {
                        (AttemptOutcome::Transport, "transport")
                    };

                    tracing::warn!(
                        error_kind = error_kind,
                        error = %e,
                        url = %url,
                        attempt = attempts,
                        "HTTP request error"
                    );
                    (
                        outcome,
                        HttpFailure::new(
                            FailureKind::Network,
                            None,
                            format!("{} ({})", e, error_kind),
                            capability,
                        ),
                    )
                }
            };

            match self
                .retry
                .decide(outcome, request.idempotent, attempts, reauthenticated)
            {
                Decision::Reauthenticate => {
                    tracing::warn!("Received 401, re-authenticating and retrying once");
                    self.sessions.invalidate_token(capability, &token).await;
                    reauthenticated = true;
                    attempts -= 1;
                }
                Decision::Retry(delay) => {
                    tracing::warn!(
                        "Request failed: {}, retrying after {}ms (attempt {}/{})",
                        failure,
                        delay.as_millis(),
                        attempts,
                        self.retry.max_attempts
                    );
                    tokio::time::sleep(delay).await;
                }
                Decision::Fail => {
                    // A rejected credential must not be handed out again
                    if matches!(outcome, AttemptOutcome::Status(401 | 403)) {
                        self.sessions.invalidate_token(capability, &token).await;
                    }
                    if !request.idempotent && failure.kind == FailureKind::Network {
                        tracing::error!(
                            url = %url,
                            "Non-idempotent request may have reached the server; not retried"
                        );
                    }
                    tracing::error!(
                        status = ?failure.status,
                        url = %url,
                        total_attempts = attempts,
                        error = %failure,
                        "HTTP request failed"
                    );
                    return Err(failure);
                }
            }
        }
    }

    /// Session manager behind this client
    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

/// Parse a success body; an empty body is `null`
async fn read_payload(
    response: Response,
    capability: Capability,
) -> std::result::Result<Value, HttpFailure> {
    let status = response.status().as_u16();
    let body = response.text().await.map_err(|e| {
        HttpFailure::new(
            FailureKind::Network,
            Some(status),
            format!("failed to read response body: {}", e),
            capability,
        )
    })?;

    if body.trim().is_empty() {
        return Ok(Value::Null);
    }

    serde_json::from_str(&body).map_err(|e| {
        HttpFailure::new(
            FailureKind::Decode,
            Some(status),
            format!("invalid JSON in response: {}", e),
            capability,
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_builders() {
        let req = ApiRequest::get("/v1/catalogs")
            .query("limit", 200)
            .capability(Capability::PrivateApi);
        assert_eq!(req.method, Method::GET);
        assert!(req.idempotent);
        assert_eq!(req.query, vec![("limit".to_string(), "200".to_string())]);
        assert_eq!(req.capability, Capability::PrivateApi);

        let req = ApiRequest::post("/rebuild").json(serde_json::json!({"a": 1}));
        assert_eq!(req.method, Method::POST);
        assert!(!req.idempotent);
        assert!(req.body.is_some());
        assert_eq!(req.capability, Capability::Api);
    }
}
