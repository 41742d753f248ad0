use thiserror::Error;

/// Configuration problems detected before any outbound action is attempted.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required environment variables: {}", .0.join(", "))]
    Missing(Vec<&'static str>),
    #[error("invalid value for {name}: '{value}'")]
    Invalid { name: &'static str, value: String },
}

/// Failure of the conversational backend.  Always recovered locally with an apology.
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("request to response generator failed: {0}")]
    Transport(String),
    #[error("response generator timed out after {0} ms")]
    Timeout(u128),
    #[error("response generator returned status {0}")]
    Status(u16),
    #[error("malformed response generator result: {0}")]
    Malformed(String),
}

/// Failure to originate an outbound call.  Never aborts a batch.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("invalid dispatch request: {0}")]
    InvalidRequest(String),
    #[error("carrier unreachable: {0}")]
    Transport(String),
    #[error("carrier rejected call ({status}): {message}")]
    Rejected { status: u16, message: String },
    #[error("malformed carrier response: {0}")]
    Malformed(String),
}

#[derive(Debug, Error)]
pub enum BatchError {
    #[error("batch io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("batch csv error: {0}")]
    Csv(#[from] csv::Error),
    #[error("failed to format timestamp: {0}")]
    Time(#[from] time::error::Format),
}

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("status log io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("status log csv error: {0}")]
    Csv(#[from] csv::Error),
    #[error("failed to format timestamp: {0}")]
    Time(#[from] time::error::Format),
    #[error("status log writer poisoned")]
    Poisoned,
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
    #[error(transparent)]
    Batch(#[from] BatchError),
    #[error(transparent)]
    Sink(#[from] SinkError),
    #[error("server error: {0}")]
    Server(String),
}
