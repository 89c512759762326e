//! Error types for prewarm operations.

/// Error type for prewarm operations.
///
/// Errors are `Clone` because a single producer result is shared between the
/// prewarm task and every consumer awaiting the same reservation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// The thread starter failed to create a thread.
    #[error("Failed to start thread: {0}")]
    ThreadStart(String),

    /// The spawned producer task panicked or was cancelled before finishing.
    #[error("Producer task aborted: {0}")]
    TaskAborted(String),

    /// Prewarm configuration could not be parsed.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(err.to_string())
    }
}

/// Result type for prewarm operations.
pub type Result<T> = std::result::Result<T, Error>;
