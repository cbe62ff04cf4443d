//! Shared fixtures for the session integration tests.
//!
//! `FakeBackend` behaves like the annotation API: it issues tokens on login,
//! mints a new access token per refresh and only serves protected resources
//! to bearers it currently accepts.

#![allow(dead_code)]

use async_trait::async_trait;
use bridge_traits::{
    error::{BridgeError, Result as BridgeResult},
    storage::SecureStore,
    time::ManualClock,
    CredentialsMode, FormData, HttpClient, HttpMethod, HttpRequest, HttpResponse,
};
use bytes::Bytes;
use core_auth::{AuthGateway, RouteGuard, SessionManager, TokenStore};
use core_runtime::config::{ExecutionContext, SessionConfig};
use core_runtime::events::{CoreEvent, EventBus};
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast::Receiver;

pub const API_BASE: &str = "https://annotate.example.com";
pub const LOGIN: &str = "/api/token_9fqmnqe010opnsvq9ql/";
pub const REFRESH: &str = "/api/refresh_token_gn240202ns301f1/";
pub const REGISTER: &str = "/api/register/";
pub const PROFILE: &str = "/api/profile_18fn1038wn198r1nb/";
pub const DATASETS: &str = "/api/datasets/";

// ============================================================================
// Fake backend
// ============================================================================

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: HttpMethod,
    pub path: String,
    pub bearer: Option<String>,
    pub body: Option<Value>,
    pub raw_body: Option<Bytes>,
    pub form: Option<FormData>,
    pub content_type: Option<String>,
    pub headers: HashMap<String, String>,
    pub credentials: CredentialsMode,
}

#[derive(Default)]
struct BackendState {
    users: HashMap<String, String>,
    valid_access: HashSet<String>,
    valid_refresh: HashSet<String>,
    issued: usize,
    requests: Vec<RecordedRequest>,
}

pub struct FakeBackend {
    state: Mutex<BackendState>,
    /// Delay before the refresh endpoint answers.
    pub refresh_delay: Mutex<Duration>,
    /// Status the refresh endpoint answers with instead of working.
    pub refresh_status: Mutex<Option<u16>>,
    /// Status the profile endpoint answers with instead of working.
    pub profile_status: Mutex<Option<u16>>,
    /// Paths that fail at the transport level.
    pub unreachable: Mutex<HashSet<String>>,
    /// Fixed statuses for resource paths, whatever the bearer.
    pub overrides: Mutex<HashMap<String, u16>>,
}

impl FakeBackend {
    pub fn new() -> Arc<Self> {
        let backend = Arc::new(Self {
            state: Mutex::new(BackendState::default()),
            refresh_delay: Mutex::new(Duration::ZERO),
            refresh_status: Mutex::new(None),
            profile_status: Mutex::new(None),
            unreachable: Mutex::new(HashSet::new()),
            overrides: Mutex::new(HashMap::new()),
        });
        backend.add_user("alice", "pw");
        backend
    }

    pub fn add_user(&self, username: &str, password: &str) {
        self.state
            .lock()
            .unwrap()
            .users
            .insert(username.to_string(), password.to_string());
    }

    /// Makes the server stop accepting an access token.
    pub fn expire_access(&self, token: &str) {
        self.state.lock().unwrap().valid_access.remove(token);
    }

    pub fn accept_refresh(&self, token: &str) {
        self.state
            .lock()
            .unwrap()
            .valid_refresh
            .insert(token.to_string());
    }

    pub fn set_refresh_delay(&self, delay: Duration) {
        *self.refresh_delay.lock().unwrap() = delay;
    }

    pub fn set_refresh_status(&self, status: Option<u16>) {
        *self.refresh_status.lock().unwrap() = status;
    }

    pub fn set_profile_status(&self, status: Option<u16>) {
        *self.profile_status.lock().unwrap() = status;
    }

    pub fn make_unreachable(&self, path: &str) {
        self.unreachable.lock().unwrap().insert(path.to_string());
    }

    pub fn respond_with(&self, path: &str, status: u16) {
        self.overrides
            .lock()
            .unwrap()
            .insert(path.to_string(), status);
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state.lock().unwrap().requests.clone()
    }

    pub fn calls(&self, path: &str) -> usize {
        self.requests().iter().filter(|r| r.path == path).count()
    }

    pub fn bearers(&self, path: &str) -> Vec<Option<String>> {
        self.requests()
            .into_iter()
            .filter(|r| r.path == path)
            .map(|r| r.bearer)
            .collect()
    }

    pub fn total_calls(&self) -> usize {
        self.requests().len()
    }

    fn record(&self, request: &HttpRequest, path: &str) -> Option<Value> {
        let body = request
            .body
            .as_ref()
            .and_then(|bytes| serde_json::from_slice::<Value>(bytes).ok());
        self.state.lock().unwrap().requests.push(RecordedRequest {
            method: request.method,
            path: path.to_string(),
            bearer: request.bearer().map(str::to_string),
            body: body.clone(),
            raw_body: request.body.clone(),
            form: request.form.clone(),
            content_type: request.headers.get("Content-Type").cloned(),
            headers: request.headers.clone(),
            credentials: request.credentials,
        });
        body
    }

    fn authorized(&self, request: &HttpRequest) -> bool {
        request
            .bearer()
            .map(|token| self.state.lock().unwrap().valid_access.contains(token))
            .unwrap_or(false)
    }

    fn next_access(&self) -> String {
        let mut state = self.state.lock().unwrap();
        state.issued += 1;
        let token = format!("A{}", state.issued);
        state.valid_access.insert(token.clone());
        token
    }

    fn login(&self, body: Option<Value>) -> HttpResponse {
        let body = body.unwrap_or(Value::Null);
        let username = body["username"].as_str().unwrap_or_default();
        let password = body["password"].as_str().unwrap_or_default();

        let accepted = self.state.lock().unwrap().users.get(username).map(String::as_str)
            == Some(password);
        if !accepted {
            return json_response(401, json!({"detail": "No active account"}));
        }

        let access = self.next_access();
        let refresh = format!("R{}", &access[1..]);
        self.accept_refresh(&refresh);
        json_response(200, json!({"access": access, "refresh": refresh}))
    }

    async fn refresh(&self, body: Option<Value>) -> HttpResponse {
        let delay = *self.refresh_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if let Some(status) = *self.refresh_status.lock().unwrap() {
            return json_response(status, json!({"detail": "unavailable"}));
        }

        let refresh = body
            .as_ref()
            .and_then(|b| b["refresh"].as_str())
            .unwrap_or_default()
            .to_string();
        if !self.state.lock().unwrap().valid_refresh.contains(&refresh) {
            return json_response(400, json!({"detail": "Token is invalid or expired"}));
        }
        json_response(200, json!({"access": self.next_access()}))
    }

    fn register(&self, body: Option<Value>) -> HttpResponse {
        let body = body.unwrap_or(Value::Null);
        let username = body["username"].as_str().unwrap_or_default().to_string();
        let password = body["password"].as_str().unwrap_or_default().to_string();
        if username.is_empty() || body["password2"].as_str() != Some(password.as_str()) {
            return json_response(400, json!({"password": ["Passwords do not match"]}));
        }
        if self.state.lock().unwrap().users.contains_key(&username) {
            return json_response(400, json!({"username": ["already exists"]}));
        }
        self.add_user(&username, &password);
        json_response(201, json!({"message": "User created", "success": true}))
    }
}

#[async_trait]
impl HttpClient for FakeBackend {
    async fn execute(&self, request: HttpRequest) -> BridgeResult<HttpResponse> {
        let path = request
            .url
            .strip_prefix(API_BASE)
            .unwrap_or(&request.url)
            .to_string();
        let body = self.record(&request, &path);

        if self.unreachable.lock().unwrap().contains(&path) {
            return Err(BridgeError::OperationFailed(
                "Connection failed: connection refused".to_string(),
            ));
        }

        let overridden = self.overrides.lock().unwrap().get(&path).copied();
        if let Some(status) = overridden {
            return Ok(json_response(status, json!({"detail": "overridden"})));
        }

        let response = match path.as_str() {
            LOGIN => self.login(body),
            REFRESH => self.refresh(body).await,
            REGISTER => self.register(body),
            PROFILE => match *self.profile_status.lock().unwrap() {
                Some(status) => json_response(status, json!({"detail": "error"})),
                None if self.authorized(&request) => json_response(
                    200,
                    json!({"user": {"id": 1, "username": "alice", "email": "alice@example.com"}}),
                ),
                None => json_response(401, json!({"detail": "Given token not valid"})),
            },
            _ if self.authorized(&request) => json_response(200, json!([{"id": 42}])),
            _ => json_response(401, json!({"detail": "Authentication credentials were not provided"})),
        };
        Ok(response)
    }
}

fn json_response(status: u16, body: Value) -> HttpResponse {
    HttpResponse::new(status, serde_json::to_vec(&body).unwrap())
}

// ============================================================================
// Secure store
// ============================================================================

#[derive(Default)]
pub struct TestSecureStore {
    entries: Mutex<HashMap<String, Vec<u8>>>,
}

impl TestSecureStore {
    pub fn insert(&self, key: &str, value: &[u8]) {
        self.entries
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_vec());
    }

    pub fn entry(&self, key: &str) -> Option<Vec<u8>> {
        self.entries.lock().unwrap().get(key).cloned()
    }
}

#[async_trait]
impl SecureStore for TestSecureStore {
    async fn set_secret(&self, key: &str, value: &[u8]) -> BridgeResult<()> {
        self.insert(key, value);
        Ok(())
    }

    async fn get_secret(&self, key: &str) -> BridgeResult<Option<Vec<u8>>> {
        Ok(self.entry(key))
    }

    async fn delete_secret(&self, key: &str) -> BridgeResult<()> {
        self.entries.lock().unwrap().remove(key);
        Ok(())
    }
}

// ============================================================================
// Harness
// ============================================================================

pub struct Harness {
    pub backend: Arc<FakeBackend>,
    pub secure_store: Arc<TestSecureStore>,
    pub clock: Arc<ManualClock>,
    pub config: SessionConfig,
    pub tokens: Arc<TokenStore>,
    pub session: Arc<SessionManager>,
    pub gateway: AuthGateway,
    pub guard: RouteGuard,
    pub events: Receiver<CoreEvent>,
}

pub fn harness(context: ExecutionContext) -> Harness {
    harness_with(FakeBackend::new(), Arc::new(TestSecureStore::default()), context)
}

pub fn harness_with(
    backend: Arc<FakeBackend>,
    secure_store: Arc<TestSecureStore>,
    context: ExecutionContext,
) -> Harness {
    let clock = Arc::new(ManualClock::default());
    let config = SessionConfig::builder()
        .api_base(API_BASE)
        .context(context)
        .http_client(backend.clone())
        .secure_store(secure_store.clone())
        .clock(clock.clone())
        .build()
        .unwrap();

    let event_bus = EventBus::new(64);
    let events = event_bus.subscribe();
    let tokens = Arc::new(TokenStore::from_config(&config).unwrap());
    let session = Arc::new(SessionManager::new(&config, Arc::clone(&tokens), event_bus));
    let gateway = AuthGateway::new(&config, Arc::clone(&session));
    let guard = RouteGuard::new(Arc::clone(&session), config.navigation.clone());

    Harness {
        backend,
        secure_store,
        clock,
        config,
        tokens,
        session,
        gateway,
        guard,
        events,
    }
}

impl Harness {
    /// Events published so far, oldest first.
    pub fn drain_events(&mut self) -> Vec<CoreEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }
}
