// Error handling module
// Defines error types and their mapping to process exit codes

use thiserror::Error;

use crate::auth::Capability;

/// Errors surfaced by the aggregate client to its callers
#[derive(Error, Debug)]
pub enum ApiError {
    /// Credentials were rejected or the auth endpoint could not be used
    #[error("Authentication failed: {}", describe(.status, .message))]
    AuthenticationError {
        status: Option<u16>,
        message: String,
    },

    /// Authenticated, but the server refused the credential (401 after re-auth, or 403)
    #[error("Unauthorized: {}", describe(.status, .message))]
    Unauthorized { status: Option<u16>, message: String },

    /// The endpoint needs a credential the configuration cannot produce
    #[error("Capability missing: {0} credentials are not configured")]
    CapabilityMissing(Capability),

    /// Catalog, cube or aggregate does not exist
    #[error("Not found: {message}")]
    NotFound { message: String },

    /// Any other 4xx from the platform
    #[error("Request rejected: {status} - {message}")]
    ClientError { status: u16, message: String },

    /// 5xx after retries, or an unreadable payload
    #[error("Server error: {}", describe(.status, .message))]
    ServerError { status: Option<u16>, message: String },

    /// Connectivity failure after retries
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Malformed caller input
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    /// Process exit code for an unrecovered error
    pub fn exit_code(&self) -> u8 {
        match self {
            ApiError::ValidationError(_) | ApiError::ConfigError(_) => 2,
            ApiError::AuthenticationError { .. }
            | ApiError::Unauthorized { .. }
            | ApiError::CapabilityMissing(_) => 3,
            ApiError::NotFound { .. } => 4,
            ApiError::NetworkError(_) | ApiError::ServerError { .. } => 5,
            ApiError::ClientError { .. } | ApiError::Internal(_) => 1,
        }
    }
}

/// Classification of a failed HTTP exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Authentication,
    CapabilityMissing,
    Unauthorized,
    Forbidden,
    NotFound,
    Client,
    Server,
    Network,
    Decode,
}

/// Failure half of an executed request
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind:?} failure: {}", describe(.status, .message))]
pub struct HttpFailure {
    pub kind: FailureKind,
    pub status: Option<u16>,
    pub message: String,
    /// Capability the request was issued with
    pub capability: Capability,
}

impl HttpFailure {
    pub fn new(
        kind: FailureKind,
        status: Option<u16>,
        message: impl Into<String>,
        capability: Capability,
    ) -> Self {
        Self {
            kind,
            status,
            message: message.into(),
            capability,
        }
    }

    /// Classify a non-success HTTP status
    pub fn from_status(status: u16, message: impl Into<String>, capability: Capability) -> Self {
        let kind = match status {
            401 => FailureKind::Unauthorized,
            403 => FailureKind::Forbidden,
            404 => FailureKind::NotFound,
            400..=499 => FailureKind::Client,
            _ => FailureKind::Server,
        };
        Self::new(kind, Some(status), message, capability)
    }

    /// Convert a credential acquisition error into a request failure
    pub fn from_auth(err: ApiError, capability: Capability) -> Self {
        match err {
            ApiError::CapabilityMissing(cap) => Self::new(
                FailureKind::CapabilityMissing,
                None,
                format!("{} credentials are not configured", cap),
                cap,
            ),
            ApiError::AuthenticationError { status, message } => {
                Self::new(FailureKind::Authentication, status, message, capability)
            }
            other => Self::new(FailureKind::Authentication, None, other.to_string(), capability),
        }
    }
}

impl From<HttpFailure> for ApiError {
    fn from(failure: HttpFailure) -> Self {
        let HttpFailure {
            kind,
            status,
            message,
            capability,
        } = failure;

        match kind {
            FailureKind::Authentication => ApiError::AuthenticationError { status, message },
            FailureKind::CapabilityMissing => ApiError::CapabilityMissing(capability),
            FailureKind::Unauthorized | FailureKind::Forbidden => {
                ApiError::Unauthorized { status, message }
            }
            FailureKind::NotFound => ApiError::NotFound { message },
            FailureKind::Client => ApiError::ClientError {
                status: status.unwrap_or(400),
                message,
            },
            FailureKind::Server | FailureKind::Decode => ApiError::ServerError { status, message },
            FailureKind::Network => ApiError::NetworkError(message),
        }
    }
}

fn describe(status: &Option<u16>, message: &str) -> String {
    match status {
        Some(code) => format!("{} - {}", code, message),
        None => message.to_string(),
    }
}

/// Result type alias for API operations
pub type Result<T> = std::result::Result<T, ApiError>;
