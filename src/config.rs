use anyhow::{Context, Result};
use clap::Parser;
use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ApiError;
use crate::retry::RetryPolicy;

/// Port of the installer auth endpoint when the host does not name one
pub const DEFAULT_AUTH_PORT: u16 = 10500;

/// Port of the installer public API
pub const DEFAULT_API_PORT: u16 = 10502;

/// OAuth realm used by container deployments
pub const DEFAULT_OAUTH_REALM: &str = "atscale";

/// Aggregate Manager - list, rebuild and report on cube aggregates
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct CliArgs {
    /// Path to the JSON connection config
    #[arg(short, long, env = "AGGMGR_CONFIG", default_value = "config.json")]
    pub config: String,

    /// Project/Catalog ID (required by the per-cube commands)
    #[arg(long)]
    pub project_id: Option<String>,

    /// Cube/Model ID (required by the per-cube commands)
    #[arg(long)]
    pub cube_id: Option<String>,

    /// Export aggregates to CSV (requires --project-id and --cube-id)
    #[arg(long)]
    pub export_csv: bool,

    /// List aggregates with details (requires --project-id and --cube-id)
    #[arg(long)]
    pub list_aggregates: bool,

    /// List all published projects/catalogs and exit
    #[arg(long)]
    pub list_projects: bool,

    /// Show aggregate statistics (requires --project-id and --cube-id)
    #[arg(long)]
    pub statistics: bool,

    /// Run the aggregate health check (requires --project-id and --cube-id)
    #[arg(long)]
    pub health: bool,

    /// Show aggregate build history (requires --project-id and --cube-id)
    #[arg(long)]
    pub build_history: bool,

    /// Trigger a rebuild of the cube's aggregates (requires --project-id and --cube-id)
    #[arg(long)]
    pub rebuild: bool,

    /// Request an incremental instead of a full build
    #[arg(long, requires = "rebuild")]
    pub incremental: bool,

    /// Poll build history until the triggered rebuild finishes
    #[arg(long, requires = "rebuild")]
    pub wait: bool,

    /// Directory CSV exports are written to
    #[arg(long, env = "AGGMGR_OUTPUT_DIR", default_value = ".")]
    pub output_dir: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "warn")]
    pub log_level: String,

    /// Days after which a successfully built aggregate counts as stale
    #[arg(
        long,
        env = "AGGMGR_STALE_DAYS",
        default_value = "7",
        value_parser = clap::value_parser!(i64).range(0..=36_500)
    )]
    pub stale_days: i64,

    /// Days without queries after which a queried aggregate counts as idle
    #[arg(
        long,
        env = "AGGMGR_IDLE_DAYS",
        default_value = "30",
        value_parser = clap::value_parser!(i64).range(0..=36_500)
    )]
    pub idle_days: i64,

    /// HTTP request timeout in seconds
    #[arg(long, env = "HTTP_REQUEST_TIMEOUT", default_value = "30")]
    pub http_timeout: u64,

    /// Total HTTP attempts per call for retryable failures
    #[arg(long, env = "HTTP_MAX_ATTEMPTS", default_value = "3")]
    pub http_attempts: u32,

    /// Ceiling for --wait polling, in seconds
    #[arg(long, env = "AGGMGR_POLL_TIMEOUT", default_value = "1800")]
    pub poll_timeout: u64,
}

impl CliArgs {
    /// Client settings derived from the command line
    pub fn client_settings(&self) -> ClientSettings {
        ClientSettings {
            request_timeout: Duration::from_secs(self.http_timeout),
            retry: RetryPolicy {
                max_attempts: self.http_attempts.max(1),
                ..RetryPolicy::default()
            },
            ..ClientSettings::default()
        }
    }

    pub fn config_path(&self) -> PathBuf {
        expand_tilde(&self.config)
    }

    pub fn output_dir(&self) -> PathBuf {
        expand_tilde(&self.output_dir)
    }
}

/// Deployment flavour of the platform
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InstanceType {
    Installer,
    Container,
}

/// Host as written in the config: optional scheme, optional port
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HostAddress {
    pub scheme: String,
    pub hostname: String,
    pub port: Option<u16>,
}

impl HostAddress {
    /// Parse `host`, `host:port`, `https://host` or `http://host:port`
    pub fn parse(raw: &str) -> std::result::Result<Self, ApiError> {
        let trimmed = raw.trim().trim_end_matches('/');
        if trimmed.is_empty() {
            return Err(ApiError::ConfigError("host must not be empty".to_string()));
        }

        let (scheme, rest) = match trimmed.split_once("://") {
            Some((scheme, rest)) => (scheme.to_lowercase(), rest),
            None => ("https".to_string(), trimmed),
        };
        if scheme != "http" && scheme != "https" {
            return Err(ApiError::ConfigError(format!(
                "unsupported scheme '{}' in host '{}'",
                scheme, raw
            )));
        }
        if rest.contains('/') {
            return Err(ApiError::ConfigError(format!(
                "host must not contain a path: '{}'",
                raw
            )));
        }

        let (hostname, port) = match rest.rsplit_once(':') {
            Some((name, port)) => {
                let port = port.parse::<u16>().map_err(|_| {
                    ApiError::ConfigError(format!("invalid port '{}' in host '{}'", port, raw))
                })?;
                (name.to_string(), Some(port))
            }
            None => (rest.to_string(), None),
        };
        if hostname.is_empty() {
            return Err(ApiError::ConfigError(format!("missing hostname in '{}'", raw)));
        }

        Ok(Self {
            scheme,
            hostname,
            port,
        })
    }

    /// `scheme://hostname[:port]` exactly as configured
    pub fn origin(&self) -> String {
        match self.port {
            Some(port) => format!("{}://{}:{}", self.scheme, self.hostname, port),
            None => format!("{}://{}", self.scheme, self.hostname),
        }
    }

    /// `scheme://hostname:port` with an explicit port
    pub fn origin_with_port(&self, port: u16) -> String {
        format!("{}://{}:{}", self.scheme, self.hostname, port)
    }

    /// Port of the installer auth endpoint
    pub fn auth_port(&self) -> u16 {
        self.port.unwrap_or(DEFAULT_AUTH_PORT)
    }
}

/// OAuth client used for the private API in container mode
#[derive(Clone)]
pub struct OAuthClient {
    pub client_id: String,
    pub client_secret: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

/// Mode-specific credentials
#[derive(Clone)]
pub enum AuthMode {
    /// Password exchange for a JWT at `/{organization}/auth`
    Installer { username: String, password: String },

    /// Pre-issued token, optionally with an OAuth client for private endpoints
    Container {
        token: String,
        oauth: Option<OAuthClient>,
    },
}

impl AuthMode {
    pub fn instance_type(&self) -> InstanceType {
        match self {
            AuthMode::Installer { .. } => InstanceType::Installer,
            AuthMode::Container { .. } => InstanceType::Container,
        }
    }
}

impl fmt::Debug for AuthMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthMode::Installer { username, .. } => f
                .debug_struct("Installer")
                .field("username", username)
                .field("password", &"<redacted>")
                .finish(),
            AuthMode::Container { oauth, .. } => f
                .debug_struct("Container")
                .field("token", &"<redacted>")
                .field("oauth_client_id", &oauth.as_ref().map(|o| o.client_id.as_str()))
                .finish(),
        }
    }
}

/// Immutable connection settings, shared by the session manager and executor
#[derive(Clone, Debug)]
pub struct ConnectionConfig {
    pub host: HostAddress,
    pub organization: String,
    pub auth: AuthMode,
    pub api_port: u16,
    pub oauth_realm: String,
    /// Reject invalid or self-signed TLS certificates (config key `verify_tls`, default true)
    pub verify_tls: bool,
}

impl ConnectionConfig {
    pub fn instance_type(&self) -> InstanceType {
        self.auth.instance_type()
    }

    /// Installer password-exchange endpoint
    pub fn auth_url(&self) -> String {
        format!(
            "{}/{}/auth",
            self.host.origin_with_port(self.host.auth_port()),
            self.organization
        )
    }

    /// Container OAuth token endpoint
    pub fn oauth_token_url(&self) -> String {
        format!(
            "{}/auth/realms/{}/protocol/openid-connect/token",
            self.host.origin(),
            self.oauth_realm
        )
    }

    /// Base URL the listing and rebuild endpoints hang off
    pub fn api_base(&self) -> String {
        match self.instance_type() {
            InstanceType::Installer => self.host.origin_with_port(self.api_port),
            InstanceType::Container => self.host.origin(),
        }
    }

    /// Validate a raw config into a typed one
    pub fn from_raw(raw: RawConfig) -> std::result::Result<Self, ApiError> {
        let host = raw
            .host
            .as_deref()
            .ok_or_else(|| ApiError::ConfigError("missing field: host".to_string()))
            .and_then(HostAddress::parse)?;

        let instance_type = parse_instance_type(raw.instance_type.as_deref())?;

        let auth = match instance_type {
            InstanceType::Installer => {
                let missing: Vec<&str> = [
                    ("username", raw.username.is_none()),
                    ("password", raw.password.is_none()),
                    ("organization", raw.organization.is_none()),
                ]
                .iter()
                .filter(|(_, absent)| *absent)
                .map(|(name, _)| *name)
                .collect();
                if !missing.is_empty() {
                    return Err(ApiError::ConfigError(format!(
                        "installer config missing fields: {}",
                        missing.join(", ")
                    )));
                }
                AuthMode::Installer {
                    username: raw.username.clone().unwrap_or_default(),
                    password: raw.password.clone().unwrap_or_default(),
                }
            }
            InstanceType::Container => {
                let token = raw.token.clone().filter(|t| !t.trim().is_empty()).ok_or_else(|| {
                    ApiError::ConfigError(
                        "container config requires 'token' for public API access".to_string(),
                    )
                })?;
                let oauth = match (raw.client_id.clone(), raw.client_secret.clone()) {
                    (Some(client_id), Some(client_secret)) => Some(OAuthClient {
                        client_id,
                        client_secret,
                        username: raw.username.clone(),
                        password: raw.password.clone(),
                    }),
                    (None, None) => None,
                    _ => {
                        return Err(ApiError::ConfigError(
                            "client_id and client_secret must be given together".to_string(),
                        ))
                    }
                };
                AuthMode::Container {
                    token: token.trim().to_string(),
                    oauth,
                }
            }
        };

        Ok(Self {
            host,
            organization: raw.organization.unwrap_or_default(),
            auth,
            api_port: raw.api_port.unwrap_or(DEFAULT_API_PORT),
            oauth_realm: raw
                .oauth_realm
                .unwrap_or_else(|| DEFAULT_OAUTH_REALM.to_string()),
            verify_tls: raw.verify_tls.unwrap_or(true),
        })
    }

    /// Load from a JSON file, with `AGGMGR_*` environment variables overriding file keys
    pub fn load(path: &Path) -> Result<Self> {
        tracing::debug!(config_path = %path.display(), "Loading connection config");

        let settings = config::Config::builder()
            .add_source(
                config::File::from(path)
                    .format(config::FileFormat::Json)
                    .required(true),
            )
            .add_source(config::Environment::with_prefix("AGGMGR"))
            .build()
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let raw: RawConfig = settings
            .try_deserialize()
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        let config = Self::from_raw(raw)?;
        tracing::info!(
            host = %config.host.origin(),
            instance_type = ?config.instance_type(),
            "Connection config loaded"
        );
        Ok(config)
    }
}

/// Config file as written on disk
#[derive(Debug, Default, Clone, Deserialize)]
pub struct RawConfig {
    pub host: Option<String>,
    pub instance_type: Option<String>,
    pub organization: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub token: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub api_port: Option<u16>,
    pub oauth_realm: Option<String>,
    pub verify_tls: Option<bool>,
}

/// Timeouts, retry and session tuning for the HTTP layer
#[derive(Clone, Debug)]
pub struct ClientSettings {
    pub request_timeout: Duration,
    pub connect_timeout: Duration,
    pub retry: RetryPolicy,
    /// A session closer than this to its expiry is replaced before use
    pub safety_margin: chrono::Duration,
    /// Assumed lifetime of a token without an `exp` claim
    pub fallback_token_ttl: chrono::Duration,
    pub page_size: u32,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            retry: RetryPolicy::default(),
            safety_margin: chrono::Duration::seconds(30),
            fallback_token_ttl: chrono::Duration::seconds(600),
            page_size: 200,
        }
    }
}

/// Parse the instance type, defaulting to installer like the config file always has
fn parse_instance_type(s: Option<&str>) -> std::result::Result<InstanceType, ApiError> {
    match s.map(|v| v.trim().to_lowercase()).as_deref() {
        None | Some("installer") => Ok(InstanceType::Installer),
        Some("container") => Ok(InstanceType::Container),
        Some(other) => Err(ApiError::ConfigError(format!(
            "invalid instance_type: {}",
            other
        ))),
    }
}

/// Expand tilde (~) in file paths to user's home directory
fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}
