//! Error types for the demand-driven streaming engine.

use std::sync::Arc;

/// The main error type for the streaming engine.
///
/// Variants fall in three groups: upstream failures (`Producer`, `Processor`,
/// `Consumer`, `Panicked`, `Custom`), contract violations (`IllegalDemand`,
/// `Exhausted`) and the expected termination signal `Cancelled`.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// A producer failed to generate an item
    #[error("Producer error: {0}")]
    Producer(#[source] Arc<dyn std::error::Error + Send + Sync>),

    /// A processor failed to transform an item
    #[error("Processor error: {0}")]
    Processor(#[source] Arc<dyn std::error::Error + Send + Sync>),

    /// A consumer failed to handle an item
    #[error("Consumer error: {0}")]
    Consumer(#[source] Arc<dyn std::error::Error + Send + Sync>),

    /// `request(n)` was called with a negative amount
    #[error("Illegal demand: request({0}), demand must be non-negative")]
    IllegalDemand(i64),

    /// `next()` was called on an exhausted iterator
    #[error("Iterator exhausted: next() called with no element available")]
    Exhausted,

    /// The subscription was cancelled
    #[error("Subscription was cancelled")]
    Cancelled,

    /// A generator body panicked
    #[error("Producer panicked: {0}")]
    Panicked(String),

    /// A channel was closed unexpectedly
    #[error("Channel was closed unexpectedly")]
    ChannelClosed,

    /// An operation timed out
    #[error("Operation timed out after {duration_ms}ms")]
    Timeout { duration_ms: u64 },

    /// A custom error with a message
    #[error("{0}")]
    Custom(String),
}

// Convenience constructors
impl Error {
    /// Create a producer error from any error type
    pub fn producer<E: std::error::Error + Send + Sync + 'static>(error: E) -> Self {
        Error::Producer(Arc::new(error))
    }

    /// Create a processor error from any error type
    pub fn processor<E: std::error::Error + Send + Sync + 'static>(error: E) -> Self {
        Error::Processor(Arc::new(error))
    }

    /// Create a consumer error from any error type
    pub fn consumer<E: std::error::Error + Send + Sync + 'static>(error: E) -> Self {
        Error::Consumer(Arc::new(error))
    }

    /// Create a timeout error
    pub fn timeout(duration_ms: u64) -> Self {
        Error::Timeout { duration_ms }
    }

    /// Create a custom error with a message
    pub fn custom<S: Into<String>>(message: S) -> Self {
        Error::Custom(message.into())
    }

    /// True for the expected-termination signal, as opposed to a failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }

    /// True for caller bugs: negative demand or reading past exhaustion.
    pub fn is_contract_violation(&self) -> bool {
        matches!(self, Error::IllegalDemand(_) | Error::Exhausted)
    }

    /// Build a `Panicked` error from a caught panic payload.
    pub(crate) fn from_panic(payload: Box<dyn std::any::Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };
        Error::Panicked(message)
    }
}

// Common conversions
impl From<tokio::sync::oneshot::error::RecvError> for Error {
    fn from(_: tokio::sync::oneshot::error::RecvError) -> Self {
        Error::ChannelClosed
    }
}

/// `Elapsed` does not carry the deadline, so the duration is reported as 0.
impl From<tokio::time::error::Elapsed> for Error {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        Error::timeout(0)
    }
}

impl From<Box<dyn std::error::Error + Send + Sync>> for Error {
    fn from(e: Box<dyn std::error::Error + Send + Sync>) -> Self {
        Error::Custom(e.to_string())
    }
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Custom(s)
    }
}

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Custom(s.to_string())
    }
}

/// Convenience type alias for Results in this crate
pub type Result<T> = std::result::Result<T, Error>;

/// Helper trait for converting errors into our Error type
pub trait IntoError<T> {
    fn into_producer_error(self) -> Result<T>;
    fn into_consumer_error(self) -> Result<T>;
    fn into_processor_error(self) -> Result<T>;
}

impl<T, E> IntoError<T> for std::result::Result<T, E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn into_producer_error(self) -> Result<T> {
        self.map_err(Error::producer)
    }

    fn into_consumer_error(self) -> Result<T> {
        self.map_err(Error::consumer)
    }

    fn into_processor_error(self) -> Result<T> {
        self.map_err(Error::processor)
    }
}
