//! Error types for larder operations

use thiserror::Error;

/// Distributed store errors. Propagated verbatim, never swallowed.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("Store {operation} failed: {reason}")]
    Backend { operation: String, reason: String },

    #[error("Corrupted value under key {key}: {reason}")]
    Corrupted { key: String, reason: String },

    #[error("Storage lock poisoned")]
    LockPoisoned,
}

impl StorageError {
    pub fn backend(operation: impl Into<String>, reason: impl ToString) -> Self {
        StorageError::Backend {
            operation: operation.into(),
            reason: reason.to_string(),
        }
    }
}

/// Mutex and semaphore errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CoordinationError {
    #[error("Semaphore {name} doesn't exist.")]
    NotExist { name: String },

    #[error("Index {index} for semaphore {name} is invalid.")]
    InvalidIndex { name: String, index: usize },

    #[error("Cannot shrink pool, size is {current} and you requested a size of {requested}.")]
    ShrinkRejected { current: usize, requested: usize },

    #[error("Lock {name} is held, gave up after {attempts} attempt(s)")]
    LockHeld { name: String, attempts: u32 },

    #[error("No slot available in semaphore {name} after {attempts} attempt(s)")]
    NoSlotAvailable { name: String, attempts: u32 },
}

/// Failure reported by a caller-supplied producer.
///
/// Carries only the rendered message so one failure can be cloned to every
/// coalesced waiter.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct ProducerError {
    pub message: String,
}

impl ProducerError {
    pub fn new(err: impl std::fmt::Display) -> Self {
        Self {
            message: err.to_string(),
        }
    }
}

impl From<&str> for ProducerError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

impl From<String> for ProducerError {
    fn from(message: String) -> Self {
        Self { message }
    }
}

impl From<serde_json::Error> for ProducerError {
    fn from(err: serde_json::Error) -> Self {
        Self::new(err)
    }
}

/// Coordinator-level errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("Key {key} not found")]
    NotFound { key: String },

    #[error("Value under key {key} is not an object")]
    NotAnObject { key: String },

    #[error(transparent)]
    Producer(#[from] ProducerError),

    #[error("Fetch task failed: {reason}")]
    TaskFailed { reason: String },

    #[error("Value under key {key} does not match the requested type: {reason}")]
    TypeMismatch { key: String, reason: String },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Master error type for all larder errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LarderError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("{0}")]
    Coordination(#[from] CoordinationError),

    #[error("{0}")]
    Cache(#[from] CacheError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

impl From<ProducerError> for LarderError {
    fn from(err: ProducerError) -> Self {
        LarderError::Cache(CacheError::Producer(err))
    }
}

impl LarderError {
    /// The producer failure carried by this error, if any.
    pub fn as_producer_error(&self) -> Option<&ProducerError> {
        match self {
            LarderError::Cache(CacheError::Producer(err)) => Some(err),
            _ => None,
        }
    }
}

/// Result type alias for larder operations.
pub type LarderResult<T> = Result<T, LarderError>;

// =============================================================================
// TESTS
// =============================================================================
