use thiserror::Error as ThisError;

#[derive(ThisError, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("Invalid horizon: {0}")]
    InvalidHorizon(String),

    #[error("Schema error on {table}: {message}")]
    Schema { table: String, message: String },

    #[error("Storage I/O error: {0}")]
    StorageIo(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

impl AppError {
    /// Transient storage failures are the only errors a batch is retried on
    pub fn is_retryable(&self) -> bool {
        matches!(self, AppError::StorageIo(_))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Io(err.to_string())
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::StorageIo(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

// Alias for convenience
pub type Error = AppError;
