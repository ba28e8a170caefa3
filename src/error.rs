//! Error handling for the hygrolog daemon.

/// A specialized `Result` type for hygrolog operations.
pub type Result<T> = std::result::Result<T, HygrologError>;

/// The main error type for hygrolog operations.
#[derive(Debug, thiserror::Error)]
pub enum HygrologError {
    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Reading log database operation failed
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Sensor driver reported a failure
    #[error("sensor error: {0}")]
    Sensor(String),

    /// Sample did not complete within the configured deadline
    #[error("sample timed out")]
    SampleTimeout,

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),
}

impl HygrologError {
    /// Create a new sensor error
    pub fn sensor(msg: impl Into<String>) -> Self {
        Self::Sensor(msg.into())
    }

    /// Create a new configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}
