//! Error types for pump operations.
//!
//! Defines the error conditions the pump distinguishes: cooperative
//! cancellation, transient queue backend failures, pipeline rejections,
//! configuration problems, and lifecycle misuse. Cancellation is an expected
//! outcome during shutdown and is never treated as a failure.

use thiserror::Error;

/// Result type alias for pump operations.
pub type Result<T> = std::result::Result<T, PumpError>;

/// Error conditions surfaced by the pump and its collaborators.
#[derive(Debug, Clone, Error)]
pub enum PumpError {
    /// Operation was interrupted by pump-wide shutdown.
    #[error("operation cancelled by pump shutdown")]
    Cancelled,

    /// Queue backend operation failed (peek, receive, or purge).
    #[error("queue backend failure: {message}")]
    Queue {
        /// Backend error message
        message: String,
    },

    /// Pipeline callback rejected a received item.
    #[error("pipeline rejected item: {message}")]
    Pipeline {
        /// Pipeline error message
        message: String,
    },

    /// Invalid pump configuration.
    #[error("invalid pump configuration: {message}")]
    Configuration {
        /// Configuration error message
        message: String,
    },

    /// Init/start/stop called out of order or more than once.
    #[error("pump lifecycle violation: {message}")]
    Lifecycle {
        /// Lifecycle error message
        message: String,
    },
}

impl PumpError {
    /// Creates a queue backend error from a message.
    pub fn queue(message: impl Into<String>) -> Self {
        Self::Queue { message: message.into() }
    }

    /// Creates a pipeline error from a message.
    pub fn pipeline(message: impl Into<String>) -> Self {
        Self::Pipeline { message: message.into() }
    }

    /// Creates a configuration error from a message.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration { message: message.into() }
    }

    /// Creates a lifecycle error from a message.
    pub fn lifecycle(message: impl Into<String>) -> Self {
        Self::Lifecycle { message: message.into() }
    }

    /// Whether this error represents cooperative cancellation.
    ///
    /// Cancellation is the expected outcome of shutdown: it is never logged
    /// as an error and never recorded into a circuit breaker.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}
