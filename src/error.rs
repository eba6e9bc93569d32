use std::time::Duration;

/// Errors returned by the access layer.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The request was dispatched to a worker but no reply arrived in time.
    #[error("timeout: no response within {0:?}")]
    Timeout(Duration),

    /// The caller withdrew interest before the request was dispatched.
    #[error("canceled")]
    Canceled,

    /// The decode capability reported a failure, message passed on verbatim.
    #[error("{0}")]
    Decode(String),

    /// The requested selection does not fit the dataset.
    #[error("invalid selection for {path}: {reason}")]
    InvalidSelection { path: String, reason: String },

    #[error("unexpected response payload for {path}: expected {expected}")]
    UnexpectedPayload { path: String, expected: &'static str },

    /// A 64-bit integer did not fit in 32 bits while narrowing (strict mode only).
    #[error("value {value} at index {index} does not fit in 32 bits")]
    Overflow { index: usize, value: i128 },

    #[error("missing or invalid attribute `{attr}` on {path}")]
    MissingAttribute { path: String, attr: String },

    /// The worker dispatcher is gone (runtime shut down).
    #[error("worker pool disconnected")]
    Disconnected,

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl Error {
    /// Cancellation is not a failure; callers usually ignore it.
    pub fn is_canceled(&self) -> bool {
        matches!(self, Error::Canceled)
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout(_))
    }

    pub(crate) fn selection(path: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Error::InvalidSelection {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
