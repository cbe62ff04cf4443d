use serde::{Deserialize, Serialize};
use std::fmt;

/// Server-side identity of the signed-in user.
///
/// Cached by the session manager after login or a successful profile fetch
/// and dropped on logout. Callers receive clones.
///
/// # Examples
///
/// ```
/// use core_auth::UserProfile;
///
/// let json = r#"{"id": 7, "username": "alice", "email": "alice@example.com"}"#;
/// let profile: UserProfile = serde_json::from_str(json).unwrap();
/// assert_eq!(profile.username, "alice");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: u64,
    pub username: String,
    #[serde(default)]
    pub email: String,
}

/// Snapshot of both credentials as seen by a single read.
///
/// # Security
///
/// The `Debug` implementation redacts token values.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct TokenPair {
    pub access: Option<String>,
    pub refresh: Option<String>,
}

impl TokenPair {
    pub fn is_empty(&self) -> bool {
        self.access.is_none() && self.refresh.is_none()
    }
}

impl fmt::Debug for TokenPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenPair")
            .field("access", &self.access.as_ref().map(|_| "[REDACTED]"))
            .field("refresh", &self.refresh.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

/// Where the session sits in its lifecycle.
///
/// Derived on every read from the token store, the in-flight refresh marker
/// and the last transient refresh failure. Never stored.
///
/// # State Transitions
///
/// ```text
/// Anonymous --login--> Authenticated --401--> Refreshing --ok--> Authenticated
///     ^                                           |
///     +------------- 400/401 (logout) ------------+----other----> Failed
/// ```
///
/// # Examples
///
/// ```
/// use core_auth::SessionPhase;
///
/// assert!(SessionPhase::Authenticated.is_authenticated());
/// assert!(!SessionPhase::Anonymous.is_authenticated());
/// assert_eq!(SessionPhase::Refreshing.to_string(), "Refreshing Token...");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum SessionPhase {
    /// No access token present
    #[default]
    Anonymous,
    /// An unexpired access token is present
    Authenticated,
    /// A refresh request is outstanding
    Refreshing,
    /// The last refresh failed transiently; tokens are retained
    Failed,
}

impl SessionPhase {
    /// `Refreshing` and `Failed` still hold tokens, so they count.
    pub fn is_authenticated(&self) -> bool {
        !matches!(self, SessionPhase::Anonymous)
    }
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionPhase::Anonymous => write!(f, "Anonymous"),
            SessionPhase::Authenticated => write!(f, "Authenticated"),
            SessionPhase::Refreshing => write!(f, "Refreshing Token..."),
            SessionPhase::Failed => write!(f, "Refresh Failed"),
        }
    }
}

#[derive(Clone, Serialize)]
pub(crate) struct LoginRequest<'a> {
    pub username: &'a str,
    pub password: &'a str,
}

impl fmt::Debug for LoginRequest<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoginRequest")
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

#[derive(Clone, Serialize)]
pub(crate) struct RegisterRequest<'a> {
    pub username: &'a str,
    pub password: &'a str,
    pub password2: &'a str,
}

impl fmt::Debug for RegisterRequest<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisterRequest")
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .field("password2", &"[REDACTED]")
            .finish()
    }
}

#[derive(Clone, Serialize)]
pub(crate) struct RefreshRequest {
    pub refresh: String,
}

/// Body returned by the login endpoint.
#[derive(Clone, Deserialize)]
pub struct LoginResponse {
    pub access: String,
    pub refresh: String,
    #[serde(default)]
    pub user: Option<UserProfile>,
}

impl fmt::Debug for LoginResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoginResponse")
            .field("access", &"[REDACTED]")
            .field("refresh", &"[REDACTED]")
            .field("user", &self.user)
            .finish()
    }
}

#[derive(Clone, Deserialize)]
pub(crate) struct RefreshResponse {
    pub access: String,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ProfileResponse {
    pub user: UserProfile,
}

/// Outcome reported by the registration endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterResult {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub success: Option<bool>,
}

/// Navigation destination as seen by the route guard.
///
/// # Examples
///
/// ```
/// use core_auth::Route;
///
/// let route = Route::protected("/datasets/42");
/// assert!(route.requires_auth);
/// assert!(!Route::public("/").requires_auth);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub path: String,
    pub requires_auth: bool,
}

impl Route {
    pub fn public(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            requires_auth: false,
        }
    }

    pub fn protected(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            requires_auth: true,
        }
    }

    /// The query string and fragment do not change the destination view.
    pub fn view_path(&self) -> &str {
        let end = self
            .path
            .find(|c| c == '?' || c == '#')
            .unwrap_or(self.path.len());
        &self.path[..end]
    }
}

/// What the router should do with a pending navigation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NavigationDecision {
    Proceed,
    Redirect(String),
}

impl NavigationDecision {
    pub fn is_redirect(&self) -> bool {
        matches!(self, NavigationDecision::Redirect(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_pair_debug_redacts() {
        let pair = TokenPair {
            access: Some("A1".to_string()),
            refresh: None,
        };
        let debug = format!("{:?}", pair);
        assert!(!debug.contains("A1"));
        assert!(debug.contains("[REDACTED]"));
        assert!(!pair.is_empty());
        assert!(TokenPair::default().is_empty());
    }

    #[test]
    fn test_login_request_debug_redacts_password() {
        let request = LoginRequest {
            username: "alice",
            password: "pw",
        };
        let debug = format!("{:?}", request);
        assert!(debug.contains("alice"));
        assert!(!debug.contains("\"pw\""));
    }

    #[test]
    fn test_register_request_wire_shape() {
        let request = RegisterRequest {
            username: "alice",
            password: "pw",
            password2: "pw",
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"username": "alice", "password": "pw", "password2": "pw"})
        );
    }

    #[test]
    fn test_login_response_with_and_without_user() {
        let response: LoginResponse =
            serde_json::from_str(r#"{"access": "A1", "refresh": "R1"}"#).unwrap();
        assert_eq!(response.access, "A1");
        assert!(response.user.is_none());

        let response: LoginResponse = serde_json::from_str(
            r#"{"access": "A1", "refresh": "R1", "user": {"id": 1, "username": "alice", "email": "a@x.io"}}"#,
        )
        .unwrap();
        assert!(!format!("{:?}", response).contains("A1"));
        assert_eq!(response.user.unwrap().id, 1);
    }

    #[test]
    fn test_register_result_tolerates_missing_fields() {
        let result: RegisterResult = serde_json::from_str("{}").unwrap();
        assert_eq!(result, RegisterResult::default());

        let result: RegisterResult =
            serde_json::from_str(r#"{"message": "created", "success": true}"#).unwrap();
        assert_eq!(result.success, Some(true));
    }

    #[test]
    fn test_session_phase_display() {
        assert_eq!(SessionPhase::Anonymous.to_string(), "Anonymous");
        assert_eq!(SessionPhase::Failed.to_string(), "Refresh Failed");
        assert!(SessionPhase::Failed.is_authenticated());
        assert_eq!(SessionPhase::default(), SessionPhase::Anonymous);
    }

    #[test]
    fn test_route_view_path() {
        assert_eq!(Route::public("/?next=/datasets").view_path(), "/");
        assert_eq!(Route::protected("/datasets#top").view_path(), "/datasets");
        assert_eq!(Route::protected("/datasets").view_path(), "/datasets");
    }
}
