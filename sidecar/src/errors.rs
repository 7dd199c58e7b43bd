use thiserror::Error;

/// Result type alias for sidecar operations
pub type Result<T, E = SidecarError> = std::result::Result<T, E>;

/// Errors that can occur while handling a sidecar request.
///
/// Display strings double as the `error` field of the JSON-RPC error
/// envelope, so validation variants keep the exact wording callers key on.
#[derive(Error, Debug)]
pub enum SidecarError {
    #[error("Can't read dkey")]
    MissingDkey,

    #[error("{0} should be a number")]
    NonNumericField(&'static str),

    #[error("No method specified")]
    MissingMethod,

    #[error("No id specified")]
    MissingId,

    #[error("params should be an array")]
    InvalidParams,

    #[error("Unable to parse request body")]
    UnparsableBody,

    #[error("Failed to read request body: {0}")]
    RequestBodyError(String),

    /// Upstream aggregator failures pass through verbatim, untransformed.
    #[error("{0}")]
    Upstream(String),

    #[error("Internal server error")]
    Internal,

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid configuration: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("http client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    #[error("metrics recorder error: {0}")]
    Metrics(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
