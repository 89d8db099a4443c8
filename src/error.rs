//! Error types for keylimit.

use std::time::Duration;

use thiserror::Error;

/// Main error type for keylimit operations.
///
/// The core limiter operations are infallible; errors only come from
/// deadline-bounded waits and from loading probe configuration.
#[derive(Error, Debug)]
pub enum LimiterError {
    /// A bounded wait gave up because the next window opens after its deadline
    #[error("deadline exceeded, next window opens in {retry_after:?}")]
    DeadlineExceeded {
        /// Time left until the key's current window expires
        retry_after: Duration,
    },

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for keylimit operations.
pub type Result<T> = std::result::Result<T, LimiterError>;
