use std::fmt;

/// Comprehensive error types for LogCrafter operations.
///
/// All variants carry a descriptive message. Errors raised while serving a
/// single client session are reported back on that session only; errors
/// raised during initialization propagate out of `LogCrafter::start` and
/// prevent the server from starting.
#[derive(Debug)]
pub enum ServerError {
    /// Invalid configuration value (zero buffer capacity, empty worker pool,
    /// out-of-range select timeout).
    InvalidConfig(String),
    /// Failed to bind or configure a TCP listener.
    Bind(String),
    /// Query string rejected by the parser. The message is user-visible and
    /// is sent to clients prefixed with `ERROR:`.
    QueryParse(String),
    /// File or directory operation failed (persistence init, replay).
    FileOperation(String),
    /// Job submitted to a worker pool that has already shut down.
    PoolShutdown,
    /// Configuration file could not be read or parsed.
    ConfigFile(String),
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerError::InvalidConfig(details) => {
                write!(f, "Invalid configuration: {}", details)
            }
            ServerError::Bind(details) => write!(f, "Bind failed: {}", details),
            ServerError::QueryParse(reason) => write!(f, "{}", reason),
            ServerError::FileOperation(details) => {
                write!(f, "File operation failed: {}", details)
            }
            ServerError::PoolShutdown => write!(f, "Worker pool is shut down"),
            ServerError::ConfigFile(details) => {
                write!(f, "Configuration file error: {}", details)
            }
        }
    }
}

impl std::error::Error for ServerError {}

/// Convenient Result type alias for LogCrafter operations.
pub type Result<T> = std::result::Result<T, ServerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_parse_display_is_bare_reason() {
        // Protocol code prepends "ERROR: " itself, so Display must not.
        let err = ServerError::QueryParse("Unknown parameter: foo".to_string());
        assert_eq!(err.to_string(), "Unknown parameter: foo");
    }

    #[test]
    fn test_display_variants() {
        assert!(
            ServerError::InvalidConfig("buffer_capacity must be positive".into())
                .to_string()
                .contains("buffer_capacity")
        );
        assert_eq!(
            ServerError::PoolShutdown.to_string(),
            "Worker pool is shut down"
        );
    }
}
