use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Capability missing: {capability} - {message}")]
    CapabilityMissing { capability: String, message: String },

    #[error("{0} is not available in server context")]
    ServerContext(&'static str),

    #[error("Runtime error: {0}")]
    Runtime(#[from] core_runtime::Error),

    #[error("Authentication error: {0}")]
    Auth(#[from] core_auth::AuthError),

    #[error("Status channel error: {0}")]
    Status(#[from] core_status::StatusError),
}

pub type Result<T> = std::result::Result<T, CoreError>;
