//! HTTP Client Implementation using Reqwest

use async_trait::async_trait;
use bridge_traits::{
    error::{BridgeError, Result},
    http::{
        CredentialsMode, FormData, FormPart, HttpClient, HttpMethod, HttpRequest, HttpResponse,
    },
};
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};

const USER_AGENT: &str = concat!("session-core/", env!("CARGO_PKG_VERSION"));

/// Reqwest-based HTTP client implementation
///
/// Provides HTTP operations with:
/// - Connection pooling via reqwest
/// - A shared cookie jar for requests sent with [`CredentialsMode::Include`]
///   or [`CredentialsMode::SameOrigin`]
/// - A cookieless client for [`CredentialsMode::Omit`]
///
/// Every call is a single attempt. Retrying is the caller's decision, since
/// replaying a refresh request could rotate a token twice.
pub struct ReqwestHttpClient {
    credentialed: Client,
    anonymous: Client,
}

impl ReqwestHttpClient {
    /// Create a new HTTP client with default configuration
    pub fn new() -> Result<Self> {
        Self::with_timeout(Duration::from_secs(30))
    }

    /// Create a new HTTP client with custom timeout
    pub fn with_timeout(timeout: Duration) -> Result<Self> {
        let credentialed = Self::builder(timeout)
            .cookie_store(true)
            .build()
            .map_err(|e| BridgeError::NotAvailable(format!("HTTP client: {}", e)))?;
        let anonymous = Self::builder(timeout)
            .build()
            .map_err(|e| BridgeError::NotAvailable(format!("HTTP client: {}", e)))?;

        Ok(Self {
            credentialed,
            anonymous,
        })
    }

    fn builder(timeout: Duration) -> reqwest::ClientBuilder {
        Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(10))
            .pool_max_idle_per_host(10)
            .user_agent(USER_AGENT)
    }

    /// Convert bridge HttpMethod to reqwest Method
    fn convert_method(method: HttpMethod) -> reqwest::Method {
        match method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Put => reqwest::Method::PUT,
            HttpMethod::Patch => reqwest::Method::PATCH,
            HttpMethod::Delete => reqwest::Method::DELETE,
            HttpMethod::Head => reqwest::Method::HEAD,
        }
    }

    fn client_for(&self, mode: CredentialsMode) -> &Client {
        match mode {
            CredentialsMode::Include | CredentialsMode::SameOrigin => &self.credentialed,
            CredentialsMode::Omit => &self.anonymous,
        }
    }

    /// Convert a bridge form into a reqwest multipart form
    fn convert_form(form: FormData) -> Result<Form> {
        form.into_parts()
            .into_iter()
            .try_fold(Form::new(), |out, part| match part {
                FormPart::Text { name, value } => Ok(out.text(name, value)),
                FormPart::File {
                    name,
                    filename,
                    content_type,
                    bytes,
                } => {
                    let part = Part::bytes(bytes.to_vec())
                        .file_name(filename)
                        .mime_str(&content_type)
                        .map_err(|e| {
                            BridgeError::OperationFailed(format!(
                                "Invalid content type for form field '{}': {}",
                                name, e
                            ))
                        })?;
                    Ok(out.part(name, part))
                }
            })
    }

    /// Build reqwest request from bridge request
    fn build_request(&self, request: HttpRequest) -> Result<reqwest::RequestBuilder> {
        let method = Self::convert_method(request.method);
        let mut req = self
            .client_for(request.credentials)
            .request(method, &request.url);

        for (key, value) in request.headers {
            req = req.header(key, value);
        }

        if let Some(form) = request.form {
            req = req.multipart(Self::convert_form(form)?);
        } else if let Some(body) = request.body {
            req = req.body(body);
        }

        if let Some(timeout) = request.timeout {
            req = req.timeout(timeout);
        }

        Ok(req)
    }

    fn map_send_error(e: reqwest::Error) -> BridgeError {
        if e.is_timeout() {
            BridgeError::OperationFailed("Request timed out".to_string())
        } else if e.is_connect() {
            BridgeError::OperationFailed(format!("Connection failed: {}", e))
        } else {
            BridgeError::OperationFailed(e.to_string())
        }
    }
}

#[async_trait]
impl HttpClient for ReqwestHttpClient {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse> {
        debug!(
            method = %request.method,
            url = %request.url,
            credentials = ?request.credentials,
            "Executing HTTP request"
        );

        let response = self.build_request(request)?.send().await.map_err(|e| {
            warn!(error = %e, "HTTP request failed");
            Self::map_send_error(e)
        })?;

        let status = response.status().as_u16();
        let headers: HashMap<String, String> = response
            .headers()
            .iter()
            .filter_map(|(k, v)| v.to_str().ok().map(|s| (k.to_string(), s.to_string())))
            .collect();

        let body = response
            .bytes()
            .await
            .map_err(|e| BridgeError::OperationFailed(e.to_string()))?;

        debug!(status, body_len = body.len(), "HTTP response received");

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}
