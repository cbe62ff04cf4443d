//! Authenticated Request Gateway
//!
//! Wraps outbound API calls with the current bearer token and recovers from
//! an expired token with exactly one refresh and one retry. Every verb goes
//! through [`AuthGateway::request`], so they all follow the same retry path.
//!
//! ## Client context
//!
//! 1. The current access token is attached and cookies travel with the call
//!    ([`CredentialsMode::Include`]).
//! 2. A 2xx answer is returned unmodified.
//! 3. A 401 sent with a token triggers a refresh (joining one already in
//!    flight) and a single retry with the new token. If another caller
//!    rotated the token meanwhile, the retry uses it without refreshing
//!    again. A failed refresh clears the session and yields
//!    [`AuthError::RefreshRejected`]. A session that a newer login put in
//!    place while the refresh was in flight is kept.
//! 4. Anything else propagates unchanged.
//!
//! ## Server context
//!
//! No token, no retry; the call is issued as described.
//!
//! ## Example
//!
//! ```no_run
//! use core_auth::{AuthGateway, FormData, RequestOptions};
//! use serde_json::json;
//!
//! # async fn example(gateway: &AuthGateway) -> core_auth::Result<()> {
//! let datasets: serde_json::Value = gateway
//!     .get_json("/api/datasets/", RequestOptions::default())
//!     .await?;
//!
//! let created: serde_json::Value = gateway
//!     .post_json("/api/datasets/", &json!({"name": "birds"}))
//!     .await?;
//!
//! let form = FormData::new()
//!     .text("dataset", "42")
//!     .file("file", "labels.csv", "text/csv", b"id,label\n1,sparrow\n".to_vec());
//! gateway.upload("/api/upload/", form, RequestOptions::default()).await?;
//! # Ok(())
//! # }
//! ```

use crate::error::{AuthError, Result};
use crate::session::{resolve_url, SessionManager};
use bridge_traits::http::{
    CredentialsMode, FormData, HttpClient, HttpMethod, HttpRequest, HttpResponse,
};
use bytes::Bytes;
use core_runtime::config::SessionConfig;
use core_runtime::logging::token_fingerprint;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};
use url::Url;

/// Per-call options. Anything not listed here is not configurable.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestOptions {
    pub headers: BTreeMap<String, String>,
    /// Overrides the credentials mode. Client context defaults to `Include`.
    pub credentials: Option<CredentialsMode>,
    pub timeout: Option<Duration>,
}

impl RequestOptions {
    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn credentials(mut self, mode: CredentialsMode) -> Self {
        self.credentials = Some(mode);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Request payload.
#[derive(Debug, Clone, Default)]
pub enum RequestBody {
    #[default]
    Empty,
    Json(serde_json::Value),
    Multipart(FormData),
    Raw {
        content_type: Option<String>,
        bytes: Bytes,
    },
}

impl RequestBody {
    /// Serializes `value` into a JSON body.
    pub fn json<T: Serialize + ?Sized>(value: &T) -> Result<Self> {
        serde_json::to_value(value)
            .map(RequestBody::Json)
            .map_err(|e| AuthError::InvalidRequest(e.to_string()))
    }
}

fn ensure_success(response: HttpResponse) -> Result<HttpResponse> {
    if response.is_success() {
        Ok(response)
    } else {
        Err(AuthError::from_response(&response))
    }
}

/// Entry point for authenticated API calls.
pub struct AuthGateway {
    session: Arc<SessionManager>,
    http_client: Arc<dyn HttpClient>,
    api_base: Url,
}

impl AuthGateway {
    pub fn new(config: &SessionConfig, session: Arc<SessionManager>) -> Self {
        Self {
            session,
            http_client: Arc::clone(&config.http_client),
            api_base: config.api_base.clone(),
        }
    }

    /// Issues one call, refreshing and retrying once on 401.
    ///
    /// `path` may be relative to the API base or absolute.
    ///
    /// # Errors
    ///
    /// - `Http` - Non-2xx answer (after the retry, if one happened)
    /// - `Transport` - The request never completed
    /// - `RefreshRejected` - A 401 could not be recovered; the session is
    ///   cleared
    /// - `InvalidUrl`, `InvalidRequest` - Nothing was sent
    #[instrument(skip(self, body, options), fields(method = %method, path = %path))]
    pub async fn request(
        &self,
        method: HttpMethod,
        path: &str,
        body: RequestBody,
        options: RequestOptions,
    ) -> Result<HttpResponse> {
        let url = resolve_url(&self.api_base, path)?;
        let template = build_request(method, url, body, &options)?;

        if self.session.context().is_server() {
            let response = self.send(&template, None).await?;
            return ensure_success(response);
        }

        let template =
            template.credentials(options.credentials.unwrap_or(CredentialsMode::Include));
        let sent_token = self.session.access_token();

        let response = self.send(&template, sent_token.as_deref()).await?;
        if response.is_success() {
            return Ok(response);
        }
        if !response.is_unauthorized() {
            return Err(AuthError::from_response(&response));
        }
        let Some(sent_token) = sent_token else {
            debug!("Unauthorized without an access token, not refreshing");
            return Err(AuthError::from_response(&response));
        };

        let retry_token = match self.session.access_token() {
            Some(current) if current != sent_token => {
                debug!(
                    token = %token_fingerprint(&current),
                    "Access token rotated by another caller, retrying with it"
                );
                current
            }
            _ => {
                let held_refresh = self.session.tokens().refresh_token();
                match self.session.refresh_token().await {
                    Ok(token) => token,
                    Err(e) => {
                        warn!(error = %e, "Refresh after 401 failed, signing out");
                        self.session
                            .logout_after_failed_refresh(held_refresh.as_deref());
                        return Err(AuthError::RefreshRejected);
                    }
                }
            }
        };

        debug!("Retrying request with refreshed token");
        let response = self.send(&template, Some(&retry_token)).await?;
        ensure_success(response)
    }

    pub async fn get(&self, path: &str, options: RequestOptions) -> Result<HttpResponse> {
        self.request(HttpMethod::Get, path, RequestBody::Empty, options)
            .await
    }

    pub async fn post(
        &self,
        path: &str,
        body: RequestBody,
        options: RequestOptions,
    ) -> Result<HttpResponse> {
        self.request(HttpMethod::Post, path, body, options).await
    }

    pub async fn put(
        &self,
        path: &str,
        body: RequestBody,
        options: RequestOptions,
    ) -> Result<HttpResponse> {
        self.request(HttpMethod::Put, path, body, options).await
    }

    pub async fn patch(
        &self,
        path: &str,
        body: RequestBody,
        options: RequestOptions,
    ) -> Result<HttpResponse> {
        self.request(HttpMethod::Patch, path, body, options).await
    }

    pub async fn delete(
        &self,
        path: &str,
        body: RequestBody,
        options: RequestOptions,
    ) -> Result<HttpResponse> {
        self.request(HttpMethod::Delete, path, body, options).await
    }

    /// POSTs `form` as `multipart/form-data`.
    pub async fn upload(
        &self,
        path: &str,
        form: FormData,
        options: RequestOptions,
    ) -> Result<HttpResponse> {
        self.request(HttpMethod::Post, path, RequestBody::Multipart(form), options)
            .await
    }

    pub async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        options: RequestOptions,
    ) -> Result<T> {
        let response = self.get(path, options).await?;
        response
            .json()
            .map_err(|e| AuthError::InvalidResponse(e.to_string()))
    }

    pub async fn post_json<B, T>(&self, path: &str, body: &B) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let response = self
            .post(path, RequestBody::json(body)?, RequestOptions::default())
            .await?;
        response
            .json()
            .map_err(|e| AuthError::InvalidResponse(e.to_string()))
    }

    pub fn session(&self) -> &Arc<SessionManager> {
        &self.session
    }

    async fn send(&self, template: &HttpRequest, token: Option<&str>) -> Result<HttpResponse> {
        let mut request = template.clone();
        if let Some(token) = token {
            request = request.bearer_token(token);
        }
        self.http_client.execute(request).await.map_err(|e| {
            warn!(error = %e, "Request failed before a response arrived");
            AuthError::from(e)
        })
    }
}

impl fmt::Debug for AuthGateway {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthGateway")
            .field("api_base", &self.api_base.as_str())
            .field("context", &self.session.context())
            .finish()
    }
}

/// Builds the request once; a retry clones it with the same body.
fn build_request(
    method: HttpMethod,
    url: String,
    body: RequestBody,
    options: &RequestOptions,
) -> Result<HttpRequest> {
    let mut request = HttpRequest::new(method, url);

    request = match body {
        RequestBody::Empty => request,
        RequestBody::Json(value) => request
            .json(&value)
            .map_err(|e| AuthError::InvalidRequest(e.to_string()))?,
        RequestBody::Multipart(form) => request.multipart(form),
        RequestBody::Raw {
            content_type,
            bytes,
        } => {
            let request = request.body(bytes);
            match content_type {
                Some(content_type) => request.header("Content-Type", content_type),
                None => request,
            }
        }
    };

    for (key, value) in &options.headers {
        request = request.header(key.clone(), value.clone());
    }
    if let Some(credentials) = options.credentials {
        request = request.credentials(credentials);
    }
    if let Some(timeout) = options.timeout {
        request = request.timeout(timeout);
    }

    Ok(request)
}
