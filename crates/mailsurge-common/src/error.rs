//! Error types for Mailsurge
//!
//! Domain-level failures carry their own error types next to the code
//! that produces them; this enum covers the shared infrastructure
//! concerns (configuration, database, outbound transport).

use thiserror::Error;

/// Infrastructure error type for Mailsurge
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Transport error: {0}")]
    Transport(String),
}

/// Result type alias for Mailsurge
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_display_includes_context() {
        assert_eq!(
            Error::Config("missing [database] section".into()).to_string(),
            "Configuration error: missing [database] section"
        );
        assert_eq!(
            Error::Transport("connection refused".into()).to_string(),
            "Transport error: connection refused"
        );
    }
}
