// Scripted mock of the analytics platform for integration tests
//
// Every request lands in one fallback handler keyed by "METHOD /path". Each key
// holds a queue of scripted responses; the last one repeats once the queue is
// drained. Hits, query strings, bodies and Authorization headers are recorded.

#![allow(dead_code)]

use axum::{
    extract::{Query, State},
    http::{header, HeaderMap, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    Router,
};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::oneshot;

use aggregate_manager::auth::SessionManager;
use aggregate_manager::config::{ClientSettings, ConnectionConfig, RawConfig};
use aggregate_manager::http_client::AggregateHttpClient;
use aggregate_manager::retry::RetryPolicy;
use aggregate_manager::service::AggregateService;

pub const ORG: &str = "default";

/// One scripted response
#[derive(Debug, Clone)]
pub struct Scripted {
    pub status: u16,
    pub body: String,
    pub content_type: &'static str,
    pub delay: Duration,
}

impl Scripted {
    pub fn json(status: u16, body: Value) -> Self {
        Self {
            status,
            body: body.to_string(),
            content_type: "application/json",
            delay: Duration::ZERO,
        }
    }

    pub fn text(status: u16, body: &str) -> Self {
        Self {
            status,
            body: body.to_string(),
            content_type: "text/plain",
            delay: Duration::ZERO,
        }
    }

    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

/// A request as the mock saw it
#[derive(Debug, Clone)]
pub struct Recorded {
    pub query: HashMap<String, String>,
    pub body: String,
    pub authorization: Option<String>,
}

#[derive(Default)]
struct PlatformState {
    scripts: Mutex<HashMap<String, VecDeque<Scripted>>>,
    requests: Mutex<HashMap<String, Vec<Recorded>>>,
}

pub struct MockPlatform {
    state: Arc<PlatformState>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    port: u16,
}

impl MockPlatform {
    /// Start the mock on an ephemeral port
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let state = Arc::new(PlatformState::default());
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let app = Router::new()
            .fallback(handle)
            .with_state(Arc::clone(&state));

        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
                .ok();
        });

        Self {
            state,
            shutdown_tx: Some(shutdown_tx),
            port,
        }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn url(&self) -> String {
        format!("http://127.0.0.1:{}", self.port)
    }

    /// Queue responses for `METHOD path`
    pub fn script(&self, method: &str, path: &str, responses: Vec<Scripted>) {
        self.state
            .scripts
            .lock()
            .unwrap()
            .insert(key(method, path), responses.into());
    }

    pub fn requests(&self, method: &str, path: &str) -> Vec<Recorded> {
        self.state
            .requests
            .lock()
            .unwrap()
            .get(&key(method, path))
            .cloned()
            .unwrap_or_default()
    }

    pub fn hits(&self, method: &str, path: &str) -> usize {
        self.requests(method, path).len()
    }

    pub fn total_hits(&self) -> usize {
        self.state.requests.lock().unwrap().values().map(Vec::len).sum()
    }

    /// Installer config whose auth and API ports both point at the mock
    pub fn installer_config(&self) -> ConnectionConfig {
        ConnectionConfig::from_raw(RawConfig {
            host: Some(self.url()),
            instance_type: Some("installer".to_string()),
            organization: Some(ORG.to_string()),
            username: Some("admin".to_string()),
            password: Some("secret".to_string()),
            api_port: Some(self.port),
            ..RawConfig::default()
        })
        .unwrap()
    }

    /// Container config with a pre-issued token, optionally with an OAuth client
    pub fn container_config(&self, with_oauth: bool) -> ConnectionConfig {
        let (client_id, client_secret) = if with_oauth {
            (Some("aggmgr".to_string()), Some("client-secret".to_string()))
        } else {
            (None, None)
        };
        ConnectionConfig::from_raw(RawConfig {
            host: Some(self.url()),
            instance_type: Some("container".to_string()),
            organization: Some(ORG.to_string()),
            token: Some(jwt(3600)),
            client_id,
            client_secret,
            username: with_oauth.then(|| "admin".to_string()),
            password: with_oauth.then(|| "secret".to_string()),
            ..RawConfig::default()
        })
        .unwrap()
    }

    /// Serve a fresh JWT from the installer auth endpoint
    pub fn script_installer_auth(&self) {
        self.script("GET", &format!("/{}/auth", ORG), vec![Scripted::text(200, &jwt(3600))]);
    }
}

impl Drop for MockPlatform {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

fn key(method: &str, path: &str) -> String {
    format!("{} {}", method.to_uppercase(), path)
}

async fn handle(
    State(state): State<Arc<PlatformState>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
    body: String,
) -> Response {
    let key = key(method.as_str(), uri.path());

    state
        .requests
        .lock()
        .unwrap()
        .entry(key.clone())
        .or_default()
        .push(Recorded {
            query,
            body,
            authorization: headers
                .get(header::AUTHORIZATION)
                .and_then(|v| v.to_str().ok())
                .map(String::from),
        });

    let scripted = {
        let mut scripts = state.scripts.lock().unwrap();
        match scripts.get_mut(&key) {
            Some(queue) if queue.len() > 1 => queue.pop_front(),
            Some(queue) => queue.front().cloned(),
            None => None,
        }
    };

    let Some(scripted) = scripted else {
        return (StatusCode::NOT_FOUND, format!("no scripted response for {}", key))
            .into_response();
    };

    if !scripted.delay.is_zero() {
        tokio::time::sleep(scripted.delay).await;
    }

    (
        StatusCode::from_u16(scripted.status).unwrap(),
        [(header::CONTENT_TYPE, scripted.content_type)],
        scripted.body,
    )
        .into_response()
}

/// Unsigned JWT expiring `expires_in` seconds from now
pub fn jwt(expires_in: i64) -> String {
    let exp = chrono::Utc::now().timestamp() + expires_in;
    format!(
        "{}.{}.sig",
        URL_SAFE_NO_PAD.encode(r#"{"alg":"HS256","typ":"JWT"}"#),
        URL_SAFE_NO_PAD.encode(format!(r#"{{"sub":"admin","exp":{}}}"#, exp))
    )
}

/// Settings for tests: no backoff sleeps, short timeouts
pub fn fast_settings() -> ClientSettings {
    ClientSettings {
        request_timeout: Duration::from_millis(500),
        connect_timeout: Duration::from_millis(500),
        retry: RetryPolicy::immediate(3),
        ..ClientSettings::default()
    }
}

pub struct Harness {
    pub sessions: Arc<SessionManager>,
    pub http: AggregateHttpClient,
}

pub fn harness(config: ConnectionConfig, settings: &ClientSettings) -> Harness {
    let sessions = Arc::new(SessionManager::new(Arc::new(config), settings).unwrap());
    let http = AggregateHttpClient::new(Arc::clone(&sessions), settings).unwrap();
    Harness { sessions, http }
}

pub fn service(
    config: ConnectionConfig,
    settings: &ClientSettings,
) -> (Arc<SessionManager>, AggregateService) {
    let Harness { sessions, http } = harness(config, settings);
    (sessions, AggregateService::new(http, settings.page_size))
}
