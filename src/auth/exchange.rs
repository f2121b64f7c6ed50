// Token exchange against the platform's auth endpoints

use chrono::{DateTime, Duration, Utc};
use reqwest::Client;

use super::jwt;
use super::types::{OAuthTokenResponse, TokenData};
use crate::config::{ConnectionConfig, OAuthClient};
use crate::error::{ApiError, Result};

/// Password exchange for a JWT (installer deployments)
///
/// The endpoint answers with the raw token as the response body.
pub async fn installer_password_exchange(
    client: &Client,
    config: &ConnectionConfig,
    username: &str,
    password: &str,
    fallback_ttl: Duration,
) -> Result<TokenData> {
    let url = config.auth_url();
    tracing::info!(url = %url, username = %username, "Requesting JWT via password exchange");

    let response = client
        .get(&url)
        .basic_auth(username, Some(password))
        .send()
        .await
        .map_err(|e| ApiError::AuthenticationError {
            status: None,
            message: format!("auth endpoint unreachable: {}", e),
        })?;

    let status = response.status();
    if !status.is_success() {
        let error_text = response.text().await.unwrap_or_default();
        tracing::error!(
            status = status.as_u16(),
            body = %error_text,
            "Password exchange rejected"
        );
        return Err(ApiError::AuthenticationError {
            status: Some(status.as_u16()),
            message: non_empty(error_text, "credentials rejected"),
        });
    }

    let body = response
        .text()
        .await
        .map_err(|e| ApiError::AuthenticationError {
            status: Some(status.as_u16()),
            message: format!("failed to read auth response: {}", e),
        })?;
    let token = body.trim().trim_matches('"').to_string();
    if token.is_empty() {
        return Err(ApiError::AuthenticationError {
            status: Some(status.as_u16()),
            message: "auth response does not contain a token".to_string(),
        });
    }

    let expires_at = match jwt::expiry(&token) {
        Some(exp) => exp,
        None => {
            tracing::warn!(
                ttl_secs = fallback_ttl.num_seconds(),
                "Token has no exp claim, assuming fallback lifetime"
            );
            expires_after(fallback_ttl)
        }
    };

    tracing::info!(expires_at = %expires_at.to_rfc3339(), "JWT obtained");

    Ok(TokenData {
        access_token: token,
        expires_at: Some(expires_at),
    })
}

/// OAuth token for the private API (container deployments)
///
/// Uses the password grant when the OAuth client carries a username and
/// password, the client-credentials grant otherwise.
pub async fn oauth_token(
    client: &Client,
    config: &ConnectionConfig,
    oauth: &OAuthClient,
    fallback_ttl: Duration,
) -> Result<TokenData> {
    let url = config.oauth_token_url();

    let mut form: Vec<(&str, &str)> = vec![
        ("client_id", oauth.client_id.as_str()),
        ("client_secret", oauth.client_secret.as_str()),
    ];
    match (&oauth.username, &oauth.password) {
        (Some(username), Some(password)) => {
            form.push(("grant_type", "password"));
            form.push(("username", username.as_str()));
            form.push(("password", password.as_str()));
        }
        _ => form.push(("grant_type", "client_credentials")),
    }

    let client_id_preview: String = oauth.client_id.chars().take(8).collect();
    tracing::info!(
        url = %url,
        client_id = %client_id_preview,
        "Requesting OAuth token for private API"
    );

    let response = client
        .post(&url)
        .form(&form)
        .send()
        .await
        .map_err(|e| ApiError::AuthenticationError {
            status: None,
            message: format!("OAuth endpoint unreachable: {}", e),
        })?;

    let status = response.status();
    if !status.is_success() {
        let error_text = response.text().await.unwrap_or_default();
        tracing::error!(
            status = status.as_u16(),
            body = %error_text,
            "OAuth token request rejected"
        );

        // Try to parse OAuth error for more details
        if let Ok(error_json) = serde_json::from_str::<serde_json::Value>(&error_text) {
            if let (Some(error_code), Some(error_desc)) = (
                error_json.get("error").and_then(|v| v.as_str()),
                error_json.get("error_description").and_then(|v| v.as_str()),
            ) {
                return Err(ApiError::AuthenticationError {
                    status: Some(status.as_u16()),
                    message: format!("{}: {}", error_code, error_desc),
                });
            }
        }

        return Err(ApiError::AuthenticationError {
            status: Some(status.as_u16()),
            message: non_empty(error_text, "OAuth token request rejected"),
        });
    }

    let data: OAuthTokenResponse =
        response
            .json()
            .await
            .map_err(|e| ApiError::AuthenticationError {
                status: Some(status.as_u16()),
                message: format!("failed to parse OAuth response: {}", e),
            })?;

    let access_token = data
        .access_token
        .filter(|t| !t.is_empty())
        .ok_or_else(|| ApiError::AuthenticationError {
            status: Some(status.as_u16()),
            message: "OAuth response does not contain access_token".to_string(),
        })?;

    let expires_at = jwt::expiry(&access_token).unwrap_or_else(|| {
        let stated = data.expires_in.and_then(|secs| {
            let end = Duration::try_seconds(secs)
                .and_then(|ttl| Utc::now().checked_add_signed(ttl));
            if end.is_none() {
                tracing::warn!(
                    expires_in = secs,
                    "OAuth token lifetime out of range, assuming fallback lifetime"
                );
            }
            end
        });
        stated.unwrap_or_else(|| expires_after(fallback_ttl))
    });

    tracing::info!(expires_at = %expires_at.to_rfc3339(), "OAuth token obtained");

    Ok(TokenData {
        access_token,
        expires_at: Some(expires_at),
    })
}

/// Expiry `ttl` from now, saturating at the latest representable instant
fn expires_after(ttl: Duration) -> DateTime<Utc> {
    Utc::now()
        .checked_add_signed(ttl)
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

fn non_empty(text: String, fallback: &str) -> String {
    if text.trim().is_empty() {
        fallback.to_string()
    } else {
        text
    }
}
