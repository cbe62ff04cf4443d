//! Session Manager
//!
//! Owns the token lifecycle: login, registration, refresh, profile fetch and
//! logout. The one cross-call guarantee it provides is that at most one
//! refresh request is outstanding at any time; every caller that needs a
//! fresh access token while one is in flight awaits that same request.
//!
//! ## Phases
//!
//! The current [`SessionPhase`] is derived on every read:
//!
//! - `Refreshing` while a refresh flight is pending
//! - `Failed` after a transient refresh failure, while tokens are still held
//! - `Authenticated` while an unexpired access token is held
//! - `Anonymous` otherwise
//!
//! ## Example
//!
//! ```no_run
//! use core_auth::{SessionManager, TokenStore};
//! use core_runtime::config::SessionConfig;
//! use core_runtime::events::EventBus;
//! use std::sync::Arc;
//!
//! # async fn example(config: SessionConfig) -> core_auth::Result<()> {
//! let tokens = Arc::new(TokenStore::from_config(&config)?);
//! let session = SessionManager::new(&config, tokens, EventBus::default());
//!
//! if let Some(user) = session.login("alice", "pw").await? {
//!     println!("Signed in as {}", user.username);
//! }
//!
//! // Concurrent callers share one refresh request.
//! let (a, b) = futures::join!(session.refresh_token(), session.refresh_token());
//! assert_eq!(a, b);
//!
//! session.logout();
//! # Ok(())
//! # }
//! ```

use crate::error::{AuthError, Result};
use crate::token_store::TokenStore;
use crate::types::{
    LoginRequest, LoginResponse, ProfileResponse, RefreshRequest, RefreshResponse,
    RegisterRequest, RegisterResult, SessionPhase, UserProfile,
};
use bridge_traits::http::{CredentialsMode, HttpClient, HttpMethod, HttpRequest, HttpResponse};
use core_async::SingleFlight;
use core_runtime::config::{Endpoints, ExecutionContext, SessionConfig};
use core_runtime::events::{CoreEvent, EventBus, SessionEvent};
use core_runtime::logging::token_fingerprint;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, error, info, instrument, warn};
use url::Url;

const REFRESH_FAILED_MESSAGE: &str = "Failed to refresh token";

/// State touched both by the manager and by a detached refresh flight.
struct SessionShared {
    tokens: Arc<TokenStore>,
    user: RwLock<Option<UserProfile>>,
    refresh_failed: AtomicBool,
    event_bus: EventBus,
}

impl SessionShared {
    fn emit(&self, event: SessionEvent) {
        let _ = self.event_bus.emit(CoreEvent::Session(event));
    }

    fn current_user(&self) -> Option<UserProfile> {
        self.user
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn store_user(&self, user: UserProfile) {
        debug!(user_id = user.id, "Caching user profile");
        let event = SessionEvent::ProfileLoaded {
            user_id: user.id,
            username: user.username.clone(),
        };
        *self.user.write().unwrap_or_else(PoisonError::into_inner) = Some(user);
        self.emit(event);
    }

    /// Clears tokens, profile and the failure marker. Never fails.
    fn logout(&self) -> bool {
        let had_tokens = self.tokens.clear();
        self.finish_logout(had_tokens)
    }

    /// Clears the session only while it still holds `refresh`. A session
    /// started by a newer login is left alone.
    fn logout_holding(&self, refresh: &str) -> bool {
        if !self.tokens.clear_if_refresh(refresh) {
            debug!("Session replaced since the refresh started, keeping it");
            return false;
        }
        self.finish_logout(true)
    }

    fn finish_logout(&self, had_tokens: bool) -> bool {
        let had_user = self
            .user
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .is_some();
        let was_failed = self.refresh_failed.swap(false, Ordering::SeqCst);

        let changed = had_tokens || had_user || was_failed;
        if changed {
            info!("Session cleared");
            self.emit(SessionEvent::SignedOut);
        }
        changed
    }

    fn transient_refresh_failure(&self, error: AuthError) -> AuthError {
        warn!(error = %error, "Token refresh failed, keeping tokens");
        self.refresh_failed.store(true, Ordering::SeqCst);
        self.emit(SessionEvent::AuthError {
            message: format!("{}: {}", REFRESH_FAILED_MESSAGE, error),
            recoverable: true,
        });
        error
    }
}

struct LoadingGuard<'a>(&'a AtomicUsize);

impl<'a> LoadingGuard<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Resolves an endpoint path against the API base.
pub(crate) fn resolve_url(api_base: &Url, path: &str) -> Result<String> {
    api_base
        .join(path)
        .map(String::from)
        .map_err(|e| AuthError::InvalidUrl(format!("{}: {}", path, e)))
}

fn decode<T: serde::de::DeserializeOwned>(response: &HttpResponse) -> Result<T> {
    response
        .json()
        .map_err(|e| AuthError::InvalidResponse(e.to_string()))
}

/// Token lifecycle state machine.
///
/// One instance per application, shared by reference (usually in an `Arc`)
/// with the request gateway and the route guard.
pub struct SessionManager {
    shared: Arc<SessionShared>,
    http_client: Arc<dyn HttpClient>,
    api_base: Url,
    endpoints: Endpoints,
    context: ExecutionContext,
    legacy_storage_keys: Vec<String>,
    refresh: SingleFlight<String, AuthError>,
    loading: AtomicUsize,
}

impl SessionManager {
    /// Creates a session manager over an existing token store.
    ///
    /// The store should already be restored; the manager never reads the
    /// secure store itself.
    pub fn new(config: &SessionConfig, tokens: Arc<TokenStore>, event_bus: EventBus) -> Self {
        debug!(context = ?config.context, "Initializing SessionManager");
        Self {
            shared: Arc::new(SessionShared {
                tokens,
                user: RwLock::new(None),
                refresh_failed: AtomicBool::new(false),
                event_bus,
            }),
            http_client: Arc::clone(&config.http_client),
            api_base: config.api_base.clone(),
            endpoints: config.endpoints.clone(),
            context: config.context,
            legacy_storage_keys: config.legacy_storage_keys.clone(),
            refresh: SingleFlight::new(),
            loading: AtomicUsize::new(0),
        }
    }

    /// Signs in with username and password.
    ///
    /// On success both tokens are stored in one write and, in client
    /// context, the profile is fetched. A failed profile fetch is logged and
    /// does not undo the login.
    ///
    /// Returns the cached profile, which may be `None` if neither the login
    /// response nor the profile fetch provided one.
    ///
    /// # Errors
    ///
    /// - `InvalidCredentials` - The endpoint answered 400 or 401
    /// - `Http` - Any other non-2xx answer
    /// - `Transport` - The request never completed
    /// - `InvalidResponse` - The body lacked a token or could not be decoded
    ///
    /// No token is written on any error.
    #[instrument(skip(self, password), fields(username = %username))]
    pub async fn login(&self, username: &str, password: &str) -> Result<Option<UserProfile>> {
        if self.context.is_client() && !self.legacy_storage_keys.is_empty() {
            debug!(
                count = self.legacy_storage_keys.len(),
                "Purging legacy credential entries"
            );
            self.shared.tokens.purge_keys(&self.legacy_storage_keys);
        }

        let _loading = LoadingGuard::enter(&self.loading);
        info!("Signing in");

        let request = HttpRequest::new(HttpMethod::Post, self.endpoint(&self.endpoints.login)?)
            .credentials(CredentialsMode::Include)
            .json(&LoginRequest { username, password })
            .map_err(|e| AuthError::InvalidRequest(e.to_string()))?;

        let response = self.http_client.execute(request).await.map_err(|e| {
            error!(error = %e, "Login request failed");
            AuthError::from(e)
        })?;

        if matches!(response.status, 400 | 401) {
            warn!(status = response.status, "Login rejected");
            self.shared.emit(SessionEvent::AuthError {
                message: AuthError::InvalidCredentials.to_string(),
                recoverable: true,
            });
            return Err(AuthError::InvalidCredentials);
        }
        if !response.is_success() {
            warn!(status = response.status, "Login failed");
            return Err(AuthError::from_response(&response));
        }

        let body: LoginResponse = decode(&response)?;
        if body.access.is_empty() || body.refresh.is_empty() {
            return Err(AuthError::InvalidResponse(
                "login response is missing a token".to_string(),
            ));
        }

        self.shared.tokens.set(Some(body.access), Some(body.refresh));
        self.shared.refresh_failed.store(false, Ordering::SeqCst);
        if let Some(user) = body.user {
            self.shared.store_user(user);
        }
        self.shared.emit(SessionEvent::SignedIn {
            username: username.to_string(),
        });
        info!("Signed in");

        if self.context.is_client() {
            if let Err(e) = self.fetch_user_profile().await {
                warn!(error = %e, "Profile fetch after login failed");
            }
        }

        Ok(self.current_user())
    }

    /// Creates an account, then signs in with the same credentials.
    ///
    /// The follow-up login only runs in client context; its failure is
    /// returned to the caller.
    #[instrument(skip(self, password, confirmation), fields(username = %username))]
    pub async fn register(
        &self,
        username: &str,
        password: &str,
        confirmation: &str,
    ) -> Result<RegisterResult> {
        let _loading = LoadingGuard::enter(&self.loading);
        info!("Registering account");

        let request = HttpRequest::new(HttpMethod::Post, self.endpoint(&self.endpoints.register)?)
            .credentials(CredentialsMode::Include)
            .json(&RegisterRequest {
                username,
                password,
                password2: confirmation,
            })
            .map_err(|e| AuthError::InvalidRequest(e.to_string()))?;

        let response = self.http_client.execute(request).await?;
        if !response.is_success() {
            warn!(status = response.status, "Registration rejected");
            return Err(AuthError::from_response(&response));
        }

        let result: RegisterResult = if response.body.iter().all(u8::is_ascii_whitespace) {
            RegisterResult::default()
        } else {
            decode(&response)?
        };

        self.shared.emit(SessionEvent::Registered {
            username: username.to_string(),
        });

        if self.context.is_client() {
            self.login(username, password).await?;
        }

        Ok(result)
    }

    /// Returns a fresh access token, sharing one request among concurrent
    /// callers.
    ///
    /// # Errors
    ///
    /// - `NoRefreshToken` - Nothing to refresh; no request is sent
    /// - `RefreshRejected` - The endpoint answered 400 or 401, or the session
    ///   was cleared while the request was in flight. The session is cleared.
    /// - `Transport`, `Http`, `InvalidResponse` - Transient failure. Tokens
    ///   are kept and the phase becomes `Failed`.
    pub async fn refresh_token(&self) -> Result<String> {
        let shared = Arc::clone(&self.shared);
        let http_client = Arc::clone(&self.http_client);
        let url = self.endpoint(&self.endpoints.refresh);

        self.refresh
            .run(move || {
                let refresh = shared.tokens.refresh_token();
                run_refresh(shared, http_client, url, refresh)
            })
            .await
    }

    /// Fetches and caches the user profile.
    ///
    /// A 401 triggers exactly one refresh and one retry. A failed refresh,
    /// a failed retry, or a 401 with no refresh token clears the session,
    /// unless a newer login replaced it in the meantime.
    /// Other first-attempt failures are returned and leave the session alone.
    ///
    /// `Ok(None)` without an access token.
    #[instrument(skip(self))]
    pub async fn fetch_user_profile(&self) -> Result<Option<UserProfile>> {
        let Some(token) = self.shared.tokens.access_token() else {
            debug!("No access token, skipping profile fetch");
            return Ok(None);
        };

        let error = match self.request_profile(&token).await {
            Ok(profile) => return Ok(Some(profile)),
            Err(error) => error,
        };

        if !error.is_unauthorized() {
            warn!(error = %error, "Failed to fetch user profile");
            return Err(error);
        }

        let Some(held_refresh) = self.shared.tokens.refresh_token() else {
            warn!("Profile request unauthorized and no refresh token held");
            self.shared.logout();
            return Err(error);
        };

        let token = match self.refresh_token().await {
            Ok(token) => token,
            Err(refresh_error) => {
                warn!(error = %refresh_error, "Refresh during profile fetch failed");
                self.shared.logout_holding(&held_refresh);
                return Err(refresh_error);
            }
        };

        match self.request_profile(&token).await {
            Ok(profile) => Ok(Some(profile)),
            Err(retry_error) => {
                warn!(error = %retry_error, "Profile fetch failed after refresh");
                self.shared.logout_holding(&held_refresh);
                Err(retry_error)
            }
        }
    }

    /// Revalidates the session. Client context only; a no-op without an
    /// access token.
    pub async fn check_auth(&self) -> Result<()> {
        if self.context.is_server() {
            return Ok(());
        }
        if !self.shared.tokens.is_authenticated() {
            debug!("No access token, nothing to check");
            return Ok(());
        }
        self.fetch_user_profile().await.map(|_| ())
    }

    /// Clears both tokens and the cached profile.
    ///
    /// Synchronous and idempotent. Returns whether anything was cleared;
    /// `SignedOut` is only emitted in that case.
    pub fn logout(&self) -> bool {
        self.shared.logout()
    }

    /// Signs out after a failed refresh unless a newer login replaced the
    /// session that held `held_refresh`.
    pub(crate) fn logout_after_failed_refresh(&self, held_refresh: Option<&str>) -> bool {
        match held_refresh {
            Some(refresh) => self.shared.logout_holding(refresh),
            None => self.shared.logout(),
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.shared.tokens.is_authenticated()
    }

    pub fn phase(&self) -> SessionPhase {
        if self.refresh.is_pending() {
            SessionPhase::Refreshing
        } else if self.shared.refresh_failed.load(Ordering::SeqCst)
            && !self.shared.tokens.get().is_empty()
        {
            SessionPhase::Failed
        } else if self.shared.tokens.is_authenticated() {
            SessionPhase::Authenticated
        } else {
            SessionPhase::Anonymous
        }
    }

    pub fn current_user(&self) -> Option<UserProfile> {
        self.shared.current_user()
    }

    pub fn access_token(&self) -> Option<String> {
        self.shared.tokens.access_token()
    }

    /// `true` while a login or registration is in flight.
    pub fn is_loading(&self) -> bool {
        self.loading.load(Ordering::SeqCst) > 0
    }

    pub fn is_refreshing(&self) -> bool {
        self.refresh.is_pending()
    }

    pub fn context(&self) -> ExecutionContext {
        self.context
    }

    pub fn tokens(&self) -> &Arc<TokenStore> {
        &self.shared.tokens
    }

    fn endpoint(&self, path: &str) -> Result<String> {
        resolve_url(&self.api_base, path)
    }

    async fn request_profile(&self, token: &str) -> Result<UserProfile> {
        let request = HttpRequest::new(HttpMethod::Get, self.endpoint(&self.endpoints.profile)?)
            .bearer_token(token)
            .credentials(CredentialsMode::Include);

        let response = self.http_client.execute(request).await?;
        if !response.is_success() {
            return Err(AuthError::from_response(&response));
        }

        let body: ProfileResponse = decode(&response)?;
        if self.shared.tokens.is_authenticated() {
            self.shared.store_user(body.user.clone());
        } else {
            debug!("Session cleared during profile fetch, not caching");
        }
        Ok(body.user)
    }
}

impl fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionManager")
            .field("context", &self.context)
            .field("phase", &self.phase())
            .field("api_base", &self.api_base.as_str())
            .field("refresh", &self.refresh)
            .finish()
    }
}

/// Body of one refresh flight. Every waiter polls the same shared future,
/// so the request keeps going while at least one caller still awaits it.
async fn run_refresh(
    shared: Arc<SessionShared>,
    http_client: Arc<dyn HttpClient>,
    url: Result<String>,
    refresh: Option<String>,
) -> Result<String> {
    let Some(refresh) = refresh else {
        warn!("Refresh requested without a refresh token");
        return Err(AuthError::NoRefreshToken);
    };
    let url = url?;

    info!(refresh = %token_fingerprint(&refresh), "Refreshing access token");
    shared.emit(SessionEvent::TokenRefreshing);

    let request = HttpRequest::new(HttpMethod::Post, url)
        .credentials(CredentialsMode::Include)
        .json(&RefreshRequest {
            refresh: refresh.clone(),
        })
        .map_err(|e| AuthError::InvalidRequest(e.to_string()))?;

    let response = match http_client.execute(request).await {
        Ok(response) => response,
        Err(e) => return Err(shared.transient_refresh_failure(AuthError::from(e))),
    };

    if matches!(response.status, 400 | 401) {
        warn!(status = response.status, "Refresh token rejected, clearing session");
        shared.logout();
        shared.emit(SessionEvent::AuthError {
            message: REFRESH_FAILED_MESSAGE.to_string(),
            recoverable: false,
        });
        return Err(AuthError::RefreshRejected);
    }
    if !response.is_success() {
        return Err(shared.transient_refresh_failure(AuthError::from_response(&response)));
    }

    let access = match decode::<RefreshResponse>(&response) {
        Ok(body) if !body.access.is_empty() => body.access,
        Ok(_) => {
            return Err(shared.transient_refresh_failure(AuthError::InvalidResponse(
                "refresh response carried an empty access token".to_string(),
            )))
        }
        Err(e) => return Err(shared.transient_refresh_failure(e)),
    };

    if !shared.tokens.replace_access(access.clone(), &refresh) {
        warn!("Session changed while refreshing, discarding new access token");
        return Err(AuthError::RefreshRejected);
    }

    shared.refresh_failed.store(false, Ordering::SeqCst);
    shared.emit(SessionEvent::TokenRefreshed);
    info!("Access token refreshed");
    Ok(access)
}
