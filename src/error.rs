use thiserror::Error;

/// Errors raised while declaring, registering or driving metrics.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    #[error("invalid descriptor {name:?}: {reason}")]
    InvalidDescriptor { name: String, reason: &'static str },

    #[error("duplicate metric fq name: {0}")]
    DuplicateMetric(String),

    #[error("{name}: expected {expected} label values but got {actual}")]
    LabelArity {
        name: String,
        expected: usize,
        actual: usize,
    },

    #[error("{name}: unknown label key {key:?}")]
    UnknownLabelKey { name: String, key: String },

    #[error("registry has no reporter attached")]
    MissingReporter,

    #[error("registry is already running or has been stopped")]
    AlreadyRunning,

    #[error("registry is not running")]
    NotRunning,
}

pub type Result<T> = std::result::Result<T, Error>;

/// Failures inside a reporter sink. These never leave the reporter: a worker
/// logs them and drops the batch.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("write failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("encode failed: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("export rejected: {0}")]
    Export(#[from] tonic::Status),

    #[error("transport failed: {0}")]
    Transport(#[from] tonic::transport::Error),
}
