use thiserror::Error;

#[derive(Debug, Error)]
pub enum CartpilotError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CartpilotError {
    /// Short error code string surfaced to hosts and logs.
    pub fn code(&self) -> &'static str {
        match self {
            CartpilotError::Config(_) => "CONFIG_ERROR",
            CartpilotError::Database(_) => "DATABASE_ERROR",
            CartpilotError::Serialization(_) => "SERIALIZATION_ERROR",
            CartpilotError::Io(_) => "IO_ERROR",
            CartpilotError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, CartpilotError>;
