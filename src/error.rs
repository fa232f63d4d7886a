//! Error types for the Squall scheduler.
//!
//! Squall surfaces errors only from scheduler initialization. Once workers
//! are running, invariant violations (wait-counter underflow, calls from a
//! non-worker thread) indicate client misuse or a memory-ordering bug and
//! abort the process instead of propagating.

/// Result type alias for Squall operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced while bringing a scheduler up
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// I/O errors, in practice a failed worker thread spawn
    #[error("I/O error: {source}")]
    Io {
        /// The underlying I/O error
        #[from]
        source: std::io::Error,
    },

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Config {
        /// Descriptive error message
        message: String,
    },

    /// Concurrency-related initialization errors
    #[error("Concurrency error: {message}")]
    Concurrency {
        /// Descriptive error message
        message: String,
    },
}

impl Error {
    /// Create a configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a concurrency error
    pub fn concurrency<S: Into<String>>(message: S) -> Self {
        Self::Concurrency {
            message: message.into(),
        }
    }

    /// Get error category for logging and metrics
    pub fn category(&self) -> &'static str {
        match self {
            Self::Io { .. } => "io",
            Self::Config { .. } => "config",
            Self::Concurrency { .. } => "concurrency",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_categories() {
        assert_eq!(Error::config("bad capacity").category(), "config");
        assert_eq!(Error::concurrency("prime failed").category(), "concurrency");
        let io: Error = std::io::Error::new(std::io::ErrorKind::Other, "spawn").into();
        assert_eq!(io.category(), "io");
    }

    #[test]
    fn test_error_display_includes_message() {
        let err = Error::config("queue capacity must be a power of two");
        assert!(err.to_string().contains("power of two"));
    }
}
