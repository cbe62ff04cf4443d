use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StatusError {
    #[error("Invalid resource identifier: {0}")]
    InvalidResource(String),

    #[error("No async runtime available to drive the status channel")]
    RuntimeUnavailable,

    #[error("Status channel task failed: {0}")]
    Task(String),
}

pub type Result<T> = std::result::Result<T, StatusError>;
