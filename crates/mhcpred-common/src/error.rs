use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MhcPredError {
    #[error("Invalid allele format '{allele}': {reason}")]
    InvalidAlleleFormat { allele: String, reason: String },

    #[error("Peptide length {length} not supported by {backend} (supported: {supported:?})")]
    UnsupportedPeptideLength {
        length: usize,
        backend: String,
        supported: Vec<usize>,
    },

    #[error("Invalid sequence '{id}': {reason}")]
    InvalidSequence { id: String, reason: String },

    #[error("Backend {backend} unavailable: {reason}")]
    BackendUnavailable { backend: String, reason: String },

    #[error("Backend {backend} rate limited (retry after {retry_after:?})")]
    RateLimited {
        backend: String,
        retry_after: Option<Duration>,
    },

    #[error("Backend {backend} timed out after {after:?}")]
    Timeout { backend: String, after: Duration },

    #[error("Backend {backend} failed ({status}): {diagnostic}")]
    BackendExecutionFailed {
        backend: String,
        status: String,
        diagnostic: String,
    },

    #[error("Unparsable output from {backend}: {reason}")]
    UnparsableOutput { backend: String, reason: String },

    #[error("No percentile rank or affinity to rank predictions for allele {allele}")]
    MissingRankingBasis { allele: String },

    #[error("Index {index} out of range for collection of length {len}")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("Prediction cancelled")]
    Cancelled,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{backend} invocation [{invocation}] failed: {source}")]
    Invocation {
        backend: String,
        invocation: String,
        #[source]
        source: Box<MhcPredError>,
    },
}

impl MhcPredError {
    /// Failures the execution driver may recover from by retrying the same invocation.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::BackendUnavailable { .. } | Self::RateLimited { .. } | Self::Timeout { .. } => true,
            Self::Invocation { source, .. } => source.is_retryable(),
            _ => false,
        }
    }

    /// The innermost error, looking through invocation context.
    pub fn root_cause(&self) -> &MhcPredError {
        match self {
            Self::Invocation { source, .. } => source.root_cause(),
            other => other,
        }
    }

    /// Server-requested delay before the next attempt, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self.root_cause() {
            Self::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    /// Wraps the error with the backend name and a description of the invocation.
    /// Already-wrapped errors and cancellation are returned as-is.
    pub fn in_invocation(self, backend: &str, invocation: impl Into<String>) -> Self {
        match self {
            Self::Invocation { .. } | Self::Cancelled => self,
            other => Self::Invocation {
                backend: backend.to_string(),
                invocation: invocation.into(),
                source: Box::new(other),
            },
        }
    }

    pub fn unparsable(backend: &str, reason: impl Into<String>) -> Self {
        Self::UnparsableOutput {
            backend: backend.to_string(),
            reason: reason.into(),
        }
    }

    pub fn unavailable(backend: &str, reason: impl Into<String>) -> Self {
        Self::BackendUnavailable {
            backend: backend.to_string(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, MhcPredError>;
