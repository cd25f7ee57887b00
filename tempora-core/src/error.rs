//! # Error Handling
//!
//! Comprehensive error types for TemporaDB operations.
//!
//! ## Design Principles
//!
//! 1. **Actionable**: Every error should guide the user toward resolution
//! 2. **Contextual**: Errors include relevant context (topics, key lengths)
//! 3. **Recoverable**: Distinguish between fatal and recoverable errors

use thiserror::Error;

/// Result type alias for TemporaDB operations
pub type Result<T> = std::result::Result<T, Error>;

/// Primary error type for TemporaDB
#[derive(Error, Debug)]
pub enum Error {
    // Log Errors
    #[error("log error: {message}")]
    Log { message: String, source: Option<Box<dyn std::error::Error + Send + Sync>> },

    #[error("topic {topic} has policy {actual}, required {expected}")]
    LogPolicyMismatch { topic: String, expected: String, actual: String },

    #[error("log compaction failed: {reason}")]
    Compaction { reason: String },

    // Index Errors
    #[error("corrupt index: {details}")]
    CorruptIndex { details: String },

    #[error("storage error: {message}")]
    Storage { message: String },

    // Ingress Errors
    #[error("malformed id: {message}")]
    MalformedId { message: String },

    #[error("serialization error: {message}")]
    Serialization { message: String },

    // Transaction Errors
    #[error("compare-and-swap precondition failed: expected {expected}, found {actual}")]
    CasMismatch { expected: String, actual: String },

    // System Errors
    #[error("IO error: {message}")]
    Io { message: String, source: std::io::Error },

    #[error("configuration error: {message}")]
    Configuration { message: String },

    #[error("internal error: {message}")]
    Internal { message: String },
}

impl Error {
    /// Check if error is recoverable
    pub fn is_recoverable(&self) -> bool {
        match self {
            Error::Log { .. } => true,
            Error::CasMismatch { .. } => true,
            Error::Io { .. } => false,
            Error::CorruptIndex { .. } => false,
            Error::LogPolicyMismatch { .. } => false,
            _ => true,
        }
    }

    /// Get error code for monitoring
    pub fn error_code(&self) -> &'static str {
        match self {
            Error::Log { .. } => "LOG_ERROR",
            Error::LogPolicyMismatch { .. } => "LOG_POLICY_MISMATCH",
            Error::Compaction { .. } => "COMPACTION_ERROR",
            Error::CorruptIndex { .. } => "CORRUPT_INDEX",
            Error::Storage { .. } => "STORAGE_ERROR",
            Error::MalformedId { .. } => "MALFORMED_ID",
            Error::Serialization { .. } => "SERIALIZATION_ERROR",
            Error::CasMismatch { .. } => "CAS_MISMATCH",
            Error::Io { .. } => "IO_ERROR",
            Error::Configuration { .. } => "CONFIG_ERROR",
            Error::Internal { .. } => "INTERNAL_ERROR",
        }
    }
}

// Conversion from std::io::Error
impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io {
            message: err.to_string(),
            source: err,
        }
    }
}

/// Extension trait for adding context to results
pub trait ResultExt<T> {
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T> ResultExt<T> for Result<T> {
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| Error::Internal {
            message: format!("{}: {}", f(), e),
        })
    }
}
