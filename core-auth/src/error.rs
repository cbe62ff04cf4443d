use bridge_traits::{BridgeError, HttpResponse};
use thiserror::Error;

/// Errors surfaced by the session layer.
///
/// `Clone` so one refresh outcome can be handed to every caller that joined
/// the same in-flight refresh.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("Invalid username or password")]
    InvalidCredentials,

    #[error("No refresh token available")]
    NoRefreshToken,

    /// Terminal refresh failure. The session has been cleared.
    #[error("Failed to refresh token")]
    RefreshRejected,

    #[error("Transport failure: {0}")]
    Transport(String),

    #[error("Request failed with status {status}")]
    Http { status: u16, body: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Secure storage unavailable: {0}")]
    SecureStorageUnavailable(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
}

impl AuthError {
    /// Wraps a completed non-2xx exchange.
    pub fn from_response(response: &HttpResponse) -> Self {
        AuthError::Http {
            status: response.status,
            body: String::from_utf8_lossy(&response.body).into_owned(),
        }
    }

    /// HTTP status carried by the error, if the server answered.
    pub fn status(&self) -> Option<u16> {
        match self {
            AuthError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        self.status() == Some(401)
    }

    /// The exchange never completed (DNS, TLS, reset, timeout).
    pub fn is_transport(&self) -> bool {
        matches!(self, AuthError::Transport(_))
    }
}

impl From<BridgeError> for AuthError {
    fn from(error: BridgeError) -> Self {
        AuthError::Transport(error.to_string())
    }
}

pub type Result<T> = std::result::Result<T, AuthError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_accessors() {
        let error = AuthError::Http {
            status: 401,
            body: String::new(),
        };
        assert_eq!(error.status(), Some(401));
        assert!(error.is_unauthorized());
        assert!(!error.is_transport());

        assert_eq!(AuthError::RefreshRejected.status(), None);
        assert!(!AuthError::InvalidCredentials.is_unauthorized());
    }

    #[test]
    fn test_from_response_keeps_status_and_body() {
        let response = HttpResponse::new(503, "maintenance");
        assert_eq!(
            AuthError::from_response(&response),
            AuthError::Http {
                status: 503,
                body: "maintenance".to_string()
            }
        );
    }

    #[test]
    fn test_refresh_rejected_message_is_generic() {
        assert_eq!(
            AuthError::RefreshRejected.to_string(),
            "Failed to refresh token"
        );
    }

    #[test]
    fn test_bridge_error_maps_to_transport() {
        let error: AuthError = BridgeError::OperationFailed("connection reset".to_string()).into();
        assert!(error.is_transport());
        assert!(error.to_string().contains("connection reset"));
    }
}
