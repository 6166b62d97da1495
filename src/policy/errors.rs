//! Policy store error types
//!
//! Error codes:
//! - POLICY_NO_RECORDS_CREATED (ERROR severity)
//! - POLICY_RECORD_NOT_FOUND (ERROR severity)
//! - POLICY_TRUNCATED_INPUT (FATAL severity) - stored bytes shorter than the layout
//! - POLICY_ENCODE_FAILED (ERROR severity)
//! - POLICY_DECODE_FAILED (ERROR severity) - reader failed before the record was complete
//! - POLICY_CALL_PANICKED (ERROR severity) - a batched write call panicked
//! - POLICY_CONFIG_INVALID (ERROR severity)
//! - POLICY_ENGINE_ERROR (ERROR severity) - wraps the engine error unchanged

use std::fmt;
use std::io;

use thiserror::Error;

use crate::config::ConfigError;

/// Result type for policy store operations
pub type PolicyResult<T> = Result<T, PolicyError>;

/// Severity levels for policy store errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Operation fails, caller continues
    Error,
    /// Persisted state is unreadable
    Fatal,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Error => write!(f, "ERROR"),
            Severity::Fatal => write!(f, "FATAL"),
        }
    }
}

/// Errors surfaced by the policy store.
#[derive(Debug, Error)]
pub enum PolicyError {
    /// The policies bucket has never been created.
    #[error("no policies have been created")]
    NoRecordsCreated,

    /// The bucket exists but holds no record under the requested hash.
    #[error("policy not found")]
    RecordNotFound,

    /// A stored value is shorter than the 40-byte policy layout.
    #[error("truncated policy record")]
    TruncatedInput,

    /// Writing the in-memory encoding failed.
    #[error("failed to encode policy: {0}")]
    Encode(#[source] io::Error),

    /// Reading an encoded policy failed for a reason other than running out
    /// of input.
    #[error("failed to decode policy: {0}")]
    Decode(#[source] io::Error),

    /// A write call panicked inside its transaction. The transaction was
    /// rolled back.
    #[error("write call panicked: {0}")]
    CallPanicked(String),

    /// The store configuration failed validation.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Error raised by the storage engine, passed through as-is.
    #[error(transparent)]
    Engine(#[from] redb::Error),
}

impl PolicyError {
    /// Returns the string error code
    pub fn code(&self) -> &'static str {
        match self {
            PolicyError::NoRecordsCreated => "POLICY_NO_RECORDS_CREATED",
            PolicyError::RecordNotFound => "POLICY_RECORD_NOT_FOUND",
            PolicyError::TruncatedInput => "POLICY_TRUNCATED_INPUT",
            PolicyError::Encode(_) => "POLICY_ENCODE_FAILED",
            PolicyError::Decode(_) => "POLICY_DECODE_FAILED",
            PolicyError::CallPanicked(_) => "POLICY_CALL_PANICKED",
            PolicyError::Config(_) => "POLICY_CONFIG_INVALID",
            PolicyError::Engine(_) => "POLICY_ENGINE_ERROR",
        }
    }

    /// Returns the severity level for this error
    pub fn severity(&self) -> Severity {
        match self {
            PolicyError::TruncatedInput => Severity::Fatal,
            _ => Severity::Error,
        }
    }

    /// Returns whether this error means persisted data cannot be trusted
    pub fn is_fatal(&self) -> bool {
        self.severity() == Severity::Fatal
    }
}

// The engine reports each phase of a transaction with its own error type.
// All of them funnel into the umbrella `redb::Error` so `?` works everywhere.
macro_rules! engine_error_from {
    ($($ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for PolicyError {
                fn from(err: $ty) -> Self {
                    PolicyError::Engine(err.into())
                }
            }
        )*
    };
}

engine_error_from!(
    redb::DatabaseError,
    redb::TransactionError,
    redb::TableError,
    redb::StorageError,
    redb::CommitError,
);
