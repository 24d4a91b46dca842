use thiserror::Error;

/// Errors produced by the pghoney protocol layer and its server.
#[derive(Debug, Error)]
pub enum HoneyError {
    /// A frame was truncated or otherwise malformed while parsing.
    #[error("malformed frame in {op}: {reason}")]
    Format { op: &'static str, reason: String },

    /// The startup length field disagrees with the inferred payload extent.
    #[error("length mismatch: claimed {claimed}, inferred {inferred}")]
    LengthMismatch { claimed: i32, inferred: usize },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config error: {0}")]
    Config(String),

    #[error("feed error: {0}")]
    Feed(String),

    #[error("timeout")]
    Timeout,
}

impl HoneyError {
    /// Shorthand for a [`HoneyError::Format`] raised by codec operation `op`.
    pub fn format(op: &'static str, reason: impl Into<String>) -> Self {
        HoneyError::Format {
            op,
            reason: reason.into(),
        }
    }
}

pub type HoneyResult<T> = Result<T, HoneyError>;
