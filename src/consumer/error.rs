//! Consumer error types

use crate::consumer::context::ContextError;
use thiserror::Error;

/// Boxed error returned by message processors
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result type for consumer operations
pub type ConsumerResult<T> = Result<T, ConsumerError>;

/// Consumer error types
#[derive(Error, Debug)]
pub enum ConsumerError {
    /// The session or run context ended while the claim was waiting
    #[error("error received from context: {0}")]
    Cancelled(ContextError),

    /// The processor opted out of a message; it was marked anyway
    #[error("message skipped at {topic}/{partition}@{offset}: {reason}")]
    Skipped {
        topic: String,
        partition: i32,
        offset: i64,
        reason: String,
    },

    /// The processor failed; the message was not marked
    #[error("error running handler at {topic}/{partition}@{offset}: {source}")]
    Processing {
        topic: String,
        partition: i32,
        offset: i64,
        #[source]
        source: BoxError,
    },

    /// The group was explicitly and permanently closed
    #[error("consumer group is closed")]
    GroupClosed,

    /// The run context ended for a reason other than voluntary cancellation
    #[error("context error received: {0}")]
    Context(ContextError),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Connection errors
    #[error("Connection error: {0}")]
    Connection(String),

    /// Offset mark/commit errors
    #[error("Commit error: {0}")]
    Commit(String),

    /// Setup/cleanup hook or claim task errors
    #[error("Handler error: {0}")]
    Handler(String),

    /// Kafka client errors
    #[cfg(feature = "kafka")]
    #[error("Kafka error: {0}")]
    Kafka(#[from] rdkafka::error::KafkaError),
}

impl ConsumerError {
    /// Errors that stop the service instead of triggering a rejoin
    pub fn is_fatal(&self) -> bool {
        matches!(self, ConsumerError::GroupClosed | ConsumerError::Config(_))
    }

    /// Whether this error was produced by an ended context
    pub fn is_cancellation(&self) -> bool {
        matches!(self, ConsumerError::Cancelled(_))
    }

    /// Check if the service may rejoin the group after this error
    pub fn is_retryable(&self) -> bool {
        !self.is_fatal()
    }

    /// Get error severity
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            ConsumerError::GroupClosed | ConsumerError::Config(_) => ErrorSeverity::Fatal,
            ConsumerError::Cancelled(_) | ConsumerError::Skipped { .. } => ErrorSeverity::Warning,
            _ => ErrorSeverity::Error,
        }
    }
}

/// Error severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    /// Expected terminations (cancellation, skipped messages)
    Warning,
    /// Errors that abandon the current generation
    Error,
    /// Errors that stop the service
    Fatal,
}
