//! Error types shared across rowpipe crates

use thiserror::Error;

/// Result type alias for rowpipe operations
pub type Result<T> = std::result::Result<T, RowpipeError>;

/// Errors raised outside the per-job failure domain (startup, configuration, glue I/O).
///
/// Failures inside a job never surface as a `RowpipeError`; they are folded into the
/// job's terminal state instead.
#[derive(Error, Debug)]
pub enum RowpipeError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unknown resource: {0}")]
    UnknownResource(String),
}

impl RowpipeError {
    /// Shorthand for [`RowpipeError::Config`]
    pub fn config(message: impl Into<String>) -> Self {
        RowpipeError::Config(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_message() {
        let err = RowpipeError::config("batch_capacity must be greater than 0");
        assert_eq!(
            err.to_string(),
            "Configuration error: batch_capacity must be greater than 0"
        );
    }

    #[test]
    fn test_io_error_converts() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing.csv");
        let err: RowpipeError = io.into();
        assert!(matches!(err, RowpipeError::Io(_)));
        assert!(err.to_string().contains("missing.csv"));
    }
}
