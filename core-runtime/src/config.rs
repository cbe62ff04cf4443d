//! # Session Configuration Module
//!
//! Provides configuration management for the session core.
//!
//! ## Overview
//!
//! The configuration system uses a builder pattern to construct a
//! `SessionConfig` instance that holds every bridge and setting the session
//! components need. It enforces fail-fast validation so a missing bridge or a
//! malformed API base is reported at bootstrap, not on the first request.
//!
//! ## Required Dependencies
//!
//! - `HttpClient` - All API traffic (desktop default: reqwest)
//! - `SecureStore` - Persisted token slot (desktop default: OS keychain)
//!
//! ## Optional Dependencies (with defaults)
//!
//! - `Clock` - Token expiry time source (default: `SystemClock`)
//!
//! When the `desktop-shims` feature is enabled, desktop-ready defaults for
//! `HttpClient` and `SecureStore` are injected automatically if not provided.
//!
//! ## Usage
//!
//! ```ignore
//! use core_runtime::config::{ExecutionContext, SessionConfig};
//!
//! let config = SessionConfig::builder()
//!     .api_base("https://annotate.example.com")
//!     .context(ExecutionContext::Client)
//!     .build()?;
//! ```
//!
//! Or from the environment (`SESSION_API_BASE`, optional `SESSION_WS_BASE`):
//!
//! ```ignore
//! let config = SessionConfig::from_env()?.build()?;
//! ```

use crate::error::{Error, Result};
use bridge_traits::{Clock, HttpClient, SecureStore, SystemClock};
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// Environment variable holding the API base URL.
pub const API_BASE_ENV: &str = "SESSION_API_BASE";
/// Environment variable overriding the push channel base URL.
pub const WS_BASE_ENV: &str = "SESSION_WS_BASE";

/// Credential entries left behind by earlier client generations.
pub const DEFAULT_LEGACY_STORAGE_KEYS: &[&str] = &[
    "auth_token",
    "refresh_token",
    "csrftoken",
    "auth._token.local",
    "auth._refresh_token.local",
    "auth._token_expiration.local",
    "auth._refresh_token_expiration.local",
    "auth.strategy",
    "token",
    "authToken",
    "refreshToken",
    "sessionid",
    "session_id",
];

/// Where the session core is running.
///
/// Server-side rendering has no access to the browser's credential store, so
/// several operations degrade to no-ops or pass-through in `Server` context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutionContext {
    #[default]
    Client,
    Server,
}

impl ExecutionContext {
    pub fn is_client(&self) -> bool {
        matches!(self, ExecutionContext::Client)
    }

    pub fn is_server(&self) -> bool {
        matches!(self, ExecutionContext::Server)
    }
}

/// Endpoint paths, relative to the API base.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    pub login: String,
    pub refresh: String,
    pub register: String,
    pub profile: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            login: "/api/token_9fqmnqe010opnsvq9ql/".to_string(),
            refresh: "/api/refresh_token_gn240202ns301f1/".to_string(),
            register: "/api/register/".to_string(),
            profile: "/api/profile_18fn1038wn198r1nb/".to_string(),
        }
    }
}

/// Token lifetimes, applied when a slot is written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenLifetimes {
    pub access_max_age: chrono::Duration,
    pub refresh_max_age: chrono::Duration,
}

impl Default for TokenLifetimes {
    fn default() -> Self {
        Self {
            access_max_age: chrono::Duration::hours(24),
            refresh_max_age: chrono::Duration::days(7),
        }
    }
}

/// Navigation targets used by the route guard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NavigationTargets {
    /// Public landing view; unauthenticated visitors are sent here.
    pub entry_path: String,
    /// Where authenticated visitors landing on the entry view are sent.
    pub default_authenticated_path: String,
}

impl Default for NavigationTargets {
    fn default() -> Self {
        Self {
            entry_path: "/".to_string(),
            default_authenticated_path: "/datasets".to_string(),
        }
    }
}

/// Push status channel settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusChannelConfig {
    /// WebSocket base, e.g. `wss://annotate.example.com`.
    pub ws_base: String,
    /// Delay between mount and the first connection attempt.
    pub connect_delay: Duration,
    pub reconnect_base_delay: Duration,
    pub reconnect_max_delay: Duration,
    /// Zero disables reconnection.
    pub max_reconnect_attempts: u32,
}

impl StatusChannelConfig {
    pub fn new(ws_base: impl Into<String>) -> Self {
        Self {
            ws_base: ws_base.into(),
            connect_delay: Duration::from_millis(100),
            reconnect_base_delay: Duration::from_secs(1),
            reconnect_max_delay: Duration::from_secs(30),
            max_reconnect_attempts: 5,
        }
    }

    /// Builds the channel URL for one resource.
    pub fn url_for(&self, resource_kind: &str, resource_id: &str) -> String {
        format!(
            "{}/ws/{}/{}/",
            self.ws_base.trim_end_matches('/'),
            resource_kind,
            resource_id
        )
    }

    /// Backoff before reconnect attempt `attempt` (1-based).
    pub fn reconnect_delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.reconnect_base_delay
            .saturating_mul(factor)
            .min(self.reconnect_max_delay)
    }

    pub fn validate(&self) -> Result<()> {
        let url = Url::parse(&self.ws_base)
            .map_err(|e| Error::Config(format!("Invalid WebSocket base '{}': {}", self.ws_base, e)))?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(Error::Config(format!(
                "WebSocket base must use ws:// or wss://, got '{}'",
                url.scheme()
            )));
        }
        if self.reconnect_base_delay > self.reconnect_max_delay {
            return Err(Error::Config(
                "Reconnect base delay exceeds the maximum delay".to_string(),
            ));
        }
        Ok(())
    }
}

/// Session core configuration.
///
/// Holds all dependencies and settings required to bootstrap the session
/// components. Use [`SessionConfigBuilder`] to construct instances.
#[derive(Clone)]
pub struct SessionConfig {
    /// Parsed API base; relative request paths resolve against it.
    pub api_base: Url,
    pub endpoints: Endpoints,
    pub context: ExecutionContext,
    pub lifetimes: TokenLifetimes,
    pub navigation: NavigationTargets,
    pub status: StatusChannelConfig,
    /// Secure store key holding the persisted token document.
    pub token_storage_key: String,
    /// Stale credential entries purged on every client-side login.
    pub legacy_storage_keys: Vec<String>,
    pub http_client: Arc<dyn HttpClient>,
    pub secure_store: Arc<dyn SecureStore>,
    pub clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionConfig")
            .field("api_base", &self.api_base.as_str())
            .field("endpoints", &self.endpoints)
            .field("context", &self.context)
            .field("lifetimes", &self.lifetimes)
            .field("navigation", &self.navigation)
            .field("status", &self.status)
            .field("token_storage_key", &self.token_storage_key)
            .field("legacy_storage_keys", &self.legacy_storage_keys)
            .field("http_client", &"HttpClient { ... }")
            .field("secure_store", &"SecureStore { ... }")
            .field("clock", &"Clock { ... }")
            .finish()
    }
}

impl SessionConfig {
    /// Creates a new builder for constructing a `SessionConfig`.
    pub fn builder() -> SessionConfigBuilder {
        SessionConfigBuilder::default()
    }

    /// Starts a builder seeded from `SESSION_API_BASE` and `SESSION_WS_BASE`.
    pub fn from_env() -> Result<SessionConfigBuilder> {
        let api_base = std::env::var(API_BASE_ENV).map_err(|_| {
            Error::Config(format!(
                "{} is not set. Export the API base URL, e.g. https://annotate.example.com",
                API_BASE_ENV
            ))
        })?;

        let mut builder = Self::builder().api_base(api_base);
        if let Ok(ws_base) = std::env::var(WS_BASE_ENV) {
            builder = builder.ws_base(ws_base);
        }
        Ok(builder)
    }

    /// Resolves `path` against the API base. Absolute URLs pass through.
    pub fn resolve(&self, path: &str) -> Result<Url> {
        self.api_base
            .join(path)
            .map_err(|e| Error::Config(format!("Cannot resolve '{}': {}", path, e)))
    }

    /// Validates the configuration and returns an error if invalid.
    ///
    /// This checks:
    /// - API base is http(s) and can carry paths
    /// - Endpoint paths are non-empty
    /// - Token lifetimes are positive and refresh outlives access
    /// - Navigation targets are absolute paths
    /// - Status channel settings are consistent
    pub fn validate(&self) -> Result<()> {
        if !matches!(self.api_base.scheme(), "http" | "https") {
            return Err(Error::Config(format!(
                "API base must use http:// or https://, got '{}'",
                self.api_base.scheme()
            )));
        }
        if self.api_base.cannot_be_a_base() {
            return Err(Error::Config(format!(
                "API base '{}' cannot carry paths",
                self.api_base
            )));
        }

        for (name, path) in [
            ("login", &self.endpoints.login),
            ("refresh", &self.endpoints.refresh),
            ("register", &self.endpoints.register),
            ("profile", &self.endpoints.profile),
        ] {
            if path.trim().is_empty() {
                return Err(Error::Config(format!("{} endpoint cannot be empty", name)));
            }
        }

        if self.lifetimes.access_max_age <= chrono::Duration::zero() {
            return Err(Error::Config(
                "Access token max age must be positive".to_string(),
            ));
        }
        if self.lifetimes.refresh_max_age < self.lifetimes.access_max_age {
            return Err(Error::Config(
                "Refresh token max age must not be shorter than the access token's".to_string(),
            ));
        }

        if !self.navigation.entry_path.starts_with('/')
            || !self.navigation.default_authenticated_path.starts_with('/')
        {
            return Err(Error::Config(
                "Navigation targets must be absolute paths".to_string(),
            ));
        }

        if self.token_storage_key.is_empty() {
            return Err(Error::Config("Token storage key cannot be empty".to_string()));
        }

        self.status.validate()
    }
}

/// Derives `ws(s)://host[:port]` from the API base.
fn derive_ws_base(api_base: &Url) -> Result<String> {
    let mut ws = api_base.clone();
    let scheme = if api_base.scheme() == "https" { "wss" } else { "ws" };
    ws.set_scheme(scheme)
        .map_err(|_| Error::Config(format!("Cannot derive WebSocket base from '{}'", api_base)))?;
    ws.set_path("");
    ws.set_query(None);
    Ok(ws.as_str().trim_end_matches('/').to_string())
}

#[cfg(not(feature = "desktop-shims"))]
fn http_client_missing_error() -> Error {
    Error::CapabilityMissing {
        capability: "HttpClient".to_string(),
        message: "HttpClient implementation is required for API traffic. \
                 Desktop: ensure the 'desktop-shims' feature is enabled to use the default ReqwestHttpClient. \
                 Embedded hosts: inject a client that honours credentials mode."
            .to_string(),
    }
}

#[cfg(not(feature = "desktop-shims"))]
fn secure_store_missing_error() -> Error {
    Error::CapabilityMissing {
        capability: "SecureStore".to_string(),
        message: "SecureStore implementation is required for token persistence. \
                 Desktop: ensure the 'desktop-shims' feature is enabled to use the default KeyringSecureStore. \
                 Embedded hosts: inject the host's credential store."
            .to_string(),
    }
}

#[cfg(feature = "desktop-shims")]
fn provide_default_http_client() -> Result<Arc<dyn HttpClient>> {
    use bridge_desktop::ReqwestHttpClient;

    let client = ReqwestHttpClient::new().map_err(|e| Error::CapabilityMissing {
        capability: "HttpClient".to_string(),
        message: format!("Failed to build default ReqwestHttpClient: {}", e),
    })?;
    Ok(Arc::new(client))
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_http_client() -> Result<Arc<dyn HttpClient>> {
    Err(http_client_missing_error())
}

#[cfg(all(feature = "desktop-shims", feature = "secure-store"))]
fn provide_default_secure_store() -> Result<Arc<dyn SecureStore>> {
    use bridge_desktop::KeyringSecureStore;

    Ok(Arc::new(KeyringSecureStore::new()))
}

#[cfg(all(feature = "desktop-shims", not(feature = "secure-store")))]
fn provide_default_secure_store() -> Result<Arc<dyn SecureStore>> {
    use bridge_desktop::MemorySecureStore;

    tracing::warn!("No OS keychain support compiled in; tokens will not survive a restart");
    Ok(Arc::new(MemorySecureStore::new()))
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_secure_store() -> Result<Arc<dyn SecureStore>> {
    Err(secure_store_missing_error())
}

/// Builder for constructing [`SessionConfig`] instances.
///
/// Call [`build()`](SessionConfigBuilder::build) to validate and create the
/// final config.
#[derive(Default)]
pub struct SessionConfigBuilder {
    api_base: Option<String>,
    ws_base: Option<String>,
    endpoints: Option<Endpoints>,
    context: ExecutionContext,
    lifetimes: Option<TokenLifetimes>,
    navigation: Option<NavigationTargets>,
    connect_delay: Option<Duration>,
    reconnect_base_delay: Option<Duration>,
    reconnect_max_delay: Option<Duration>,
    max_reconnect_attempts: Option<u32>,
    token_storage_key: Option<String>,
    legacy_storage_keys: Option<Vec<String>>,
    http_client: Option<Arc<dyn HttpClient>>,
    secure_store: Option<Arc<dyn SecureStore>>,
    clock: Option<Arc<dyn Clock>>,
}

impl SessionConfigBuilder {
    /// Sets the API base URL (required).
    ///
    /// # Examples
    ///
    /// ```
    /// use core_runtime::config::SessionConfig;
    ///
    /// let builder = SessionConfig::builder()
    ///     .api_base("https://annotate.example.com");
    /// ```
    pub fn api_base(mut self, url: impl Into<String>) -> Self {
        self.api_base = Some(url.into());
        self
    }

    /// Overrides the push channel base. Defaults to the API host over ws(s).
    pub fn ws_base(mut self, url: impl Into<String>) -> Self {
        self.ws_base = Some(url.into());
        self
    }

    pub fn endpoints(mut self, endpoints: Endpoints) -> Self {
        self.endpoints = Some(endpoints);
        self
    }

    /// Sets the execution context. Default: `Client`.
    pub fn context(mut self, context: ExecutionContext) -> Self {
        self.context = context;
        self
    }

    pub fn access_max_age(mut self, max_age: chrono::Duration) -> Self {
        self.lifetimes.get_or_insert_with(TokenLifetimes::default).access_max_age = max_age;
        self
    }

    pub fn refresh_max_age(mut self, max_age: chrono::Duration) -> Self {
        self.lifetimes.get_or_insert_with(TokenLifetimes::default).refresh_max_age = max_age;
        self
    }

    pub fn navigation(mut self, navigation: NavigationTargets) -> Self {
        self.navigation = Some(navigation);
        self
    }

    /// Delay between mounting a status channel and connecting. Default: 100ms.
    pub fn status_connect_delay(mut self, delay: Duration) -> Self {
        self.connect_delay = Some(delay);
        self
    }

    pub fn status_reconnect_delays(mut self, base: Duration, max: Duration) -> Self {
        self.reconnect_base_delay = Some(base);
        self.reconnect_max_delay = Some(max);
        self
    }

    pub fn status_max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.max_reconnect_attempts = Some(attempts);
        self
    }

    /// Secure store key for the token document. Default: `session_tokens`.
    pub fn token_storage_key(mut self, key: impl Into<String>) -> Self {
        self.token_storage_key = Some(key.into());
        self
    }

    /// Replaces the list of stale credential entries removed at login.
    pub fn legacy_storage_keys<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.legacy_storage_keys = Some(keys.into_iter().map(Into::into).collect());
        self
    }

    /// Sets the HTTP client implementation.
    ///
    /// If not provided, the desktop default (reqwest-based) will be used when
    /// the `desktop-shims` feature is enabled.
    pub fn http_client(mut self, client: Arc<dyn HttpClient>) -> Self {
        self.http_client = Some(client);
        self
    }

    /// Sets the secure store implementation.
    ///
    /// The secure store persists the token slot across restarts. It must
    /// provide platform-appropriate protection (Keychain, Credential Manager,
    /// Secret Service, host cookie store).
    pub fn secure_store(mut self, store: Arc<dyn SecureStore>) -> Self {
        self.secure_store = Some(store);
        self
    }

    /// Sets the clock used for token expiry. Default: `SystemClock`.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Builds the final `SessionConfig` instance.
    ///
    /// Returns an error if:
    /// - The API base is missing or malformed
    /// - Required bridges are missing (HttpClient, SecureStore)
    /// - Any value fails [`SessionConfig::validate`]
    pub fn build(self) -> Result<SessionConfig> {
        let raw_base = self.api_base.ok_or_else(|| {
            Error::Config("API base is required. Use .api_base() to set it.".to_string())
        })?;
        let api_base = Url::parse(&raw_base)
            .map_err(|e| Error::Config(format!("Invalid API base '{}': {}", raw_base, e)))?;

        let ws_base = match self.ws_base {
            Some(ws_base) => ws_base,
            None => derive_ws_base(&api_base)?,
        };

        let mut status = StatusChannelConfig::new(ws_base);
        if let Some(delay) = self.connect_delay {
            status.connect_delay = delay;
        }
        if let Some(delay) = self.reconnect_base_delay {
            status.reconnect_base_delay = delay;
        }
        if let Some(delay) = self.reconnect_max_delay {
            status.reconnect_max_delay = delay;
        }
        if let Some(attempts) = self.max_reconnect_attempts {
            status.max_reconnect_attempts = attempts;
        }

        let http_client = match self.http_client {
            Some(client) => client,
            None => provide_default_http_client()?,
        };

        let secure_store = match self.secure_store {
            Some(store) => store,
            None => provide_default_secure_store()?,
        };

        let config = SessionConfig {
            api_base,
            endpoints: self.endpoints.unwrap_or_default(),
            context: self.context,
            lifetimes: self.lifetimes.unwrap_or_default(),
            navigation: self.navigation.unwrap_or_default(),
            status,
            token_storage_key: self
                .token_storage_key
                .unwrap_or_else(|| "session_tokens".to_string()),
            legacy_storage_keys: self.legacy_storage_keys.unwrap_or_else(|| {
                DEFAULT_LEGACY_STORAGE_KEYS
                    .iter()
                    .map(|key| key.to_string())
                    .collect()
            }),
            http_client,
            secure_store,
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
        };

        config.validate()?;

        Ok(config)
    }
}
