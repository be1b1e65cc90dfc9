use std::io;
use std::time::Duration;
use thiserror::Error;

/// Main error type for gateway operations
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Path not found: {0}")]
    NotFound(String),

    #[error("Path already exists: {0}")]
    AlreadyExists(String),

    #[error("Not a directory: {0}")]
    NotADirectory(String),

    #[error("Is a directory: {0}")]
    IsADirectory(String),

    #[error("Directory not empty: {0}")]
    NotEmpty(String),

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Permission denied")]
    PermissionDenied,

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Remote call timed out after {0:?}")]
    Timeout(Duration),

    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl GatewayError {
    /// Convert error to an FTP reply code
    pub fn reply_code(&self) -> u16 {
        match self {
            GatewayError::NotFound(_) => 550,
            GatewayError::AlreadyExists(_) => 550,
            GatewayError::NotADirectory(_) => 550,
            GatewayError::IsADirectory(_) => 550,
            GatewayError::NotEmpty(_) => 550,
            GatewayError::InvalidPath(_) => 553,
            GatewayError::PermissionDenied => 550,
            GatewayError::Io(_) => 451,
            GatewayError::Backend(_) => 451,
            GatewayError::Timeout(_) => 451,
            GatewayError::Auth(_) => 530,
            GatewayError::Config(_) => 451,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, GatewayError::NotFound(_))
    }
}

/// Result type alias for gateway operations
pub type Result<T> = std::result::Result<T, GatewayError>;
