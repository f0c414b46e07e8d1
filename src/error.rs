//! Error types for doc-stats-walker
//!
//! This module defines the error hierarchy that covers:
//! - Remote document platform errors (lookups, listings, credentials)
//! - Configuration and CLI errors
//! - Worker/task coordination errors
//!
//! Only credential-level and configuration-level errors escape a run.
//! Everything scoped to one root, subtree or batch is converted into a
//! [`Diagnostic`](crate::report::Diagnostic) and attached to the report.

use thiserror::Error;

/// Top-level error type for a statistics run
#[derive(Error, Debug)]
pub enum StatsError {
    /// Remote platform errors that could not be recovered locally
    #[error("Platform error: {0}")]
    Platform(#[from] PlatformError),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Worker/concurrency errors
    #[error("Worker error: {0}")]
    Worker(#[from] WorkerError),

    /// I/O errors (snapshot and output files)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encode/decode errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The caller's credential was rejected; no further progress is possible
    #[error("Credential rejected by the document platform: {reason}")]
    CredentialRejected { reason: String },
}

/// Errors returned by the remote document platform collaborators
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlatformError {
    /// Raw root identifier could not be parsed
    #[error("Invalid document URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    /// Token not known to the platform
    #[error("Document not found: '{token}'")]
    NotFound { token: String },

    /// Credential is valid but may not read this object
    #[error("Permission denied: '{token}'")]
    PermissionDenied { token: String },

    /// Credential itself was rejected
    #[error("Credential rejected: {reason}")]
    CredentialRejected { reason: String },

    /// Call timed out
    #[error("Request timed out after {attempts} attempts")]
    Timeout { attempts: u32 },

    /// Transport-level failure
    #[error("Transport error: {0}")]
    Transport(String),

    /// Platform answered with an error code
    #[error("Platform error {code}: {message}")]
    Protocol { code: i32, message: String },
}

impl PlatformError {
    /// Check if this error means the caller's credential is unusable
    pub fn is_credential_failure(&self) -> bool {
        matches!(self, PlatformError::CredentialRejected { .. })
    }

    /// Check if this error is local to one object (skip and continue)
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            PlatformError::NotFound { .. }
                | PlatformError::PermissionDenied { .. }
                | PlatformError::Timeout { .. }
        )
    }
}

/// Configuration and CLI errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Invalid batch size
    #[error("Invalid batch size {size}: must be between 1 and {max}")]
    InvalidBatchSize { size: usize, max: usize },

    /// Invalid worker count
    #[error("Invalid worker count {count}: must be between 1 and {max}")]
    InvalidWorkerCount { count: usize, max: usize },

    /// Invalid queue size
    #[error("Invalid queue size {size}: must be at least {min}")]
    InvalidQueueSize { size: usize, min: usize },

    /// Invalid in-flight batch limit
    #[error("Invalid in-flight batch limit {count}: must be at least 1")]
    InvalidInflightBatches { count: usize },

    /// Invalid rate limit
    #[error("Invalid rate limit {limit}: must be at least 1 call per period")]
    InvalidRateLimit { limit: u32 },

    /// Invalid rate period
    #[error("Invalid rate period {secs}s: must be between 1 and {max} seconds")]
    InvalidRatePeriod { secs: u64, max: u64 },

    /// Invalid base URL
    #[error("Invalid base URL '{url}': {reason}")]
    InvalidBaseUrl { url: String, reason: String },

    /// No credential supplied
    #[error("No credential supplied: pass --token or set DOC_STATS_TOKEN")]
    MissingCredential,

    /// Unknown ranking key
    #[error("Unknown ranking key '{key}'")]
    InvalidRankKey { key: String },
}

/// Worker/task errors
#[derive(Error, Debug)]
pub enum WorkerError {
    /// Walker worker task panicked
    #[error("Worker {id} panicked: {message}")]
    Panicked { id: usize, message: String },

    /// A pipeline stage task panicked or was cancelled
    #[error("{task} task failed: {message}")]
    TaskFailed { task: &'static str, message: String },

    /// Work queue send failed
    #[error("Failed to send work item: queue closed")]
    QueueSendFailed,

    /// Result channel closed
    #[error("Result channel closed unexpectedly")]
    ResultChannelClosed,
}

/// Result type alias for StatsError
pub type Result<T> = std::result::Result<T, StatsError>;

/// Result type alias for PlatformError
pub type PlatformResult<T> = std::result::Result<T, PlatformError>;

/// Result type alias for ConfigError
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_platform_error_classes() {
        let denied = PlatformError::PermissionDenied {
            token: "doxA".into(),
        };
        assert!(denied.is_recoverable());
        assert!(!denied.is_credential_failure());

        let rejected = PlatformError::CredentialRejected {
            reason: "expired".into(),
        };
        assert!(rejected.is_credential_failure());
        assert!(!rejected.is_recoverable());

        let protocol = PlatformError::Protocol {
            code: 500,
            message: "unavailable".into(),
        };
        assert!(!protocol.is_recoverable());
        assert!(PlatformError::Timeout { attempts: 3 }.is_recoverable());
    }

    #[test]
    fn test_error_conversion() {
        let err = PlatformError::NotFound {
            token: "missing".into(),
        };
        let stats_err: StatsError = err.into();
        assert!(matches!(stats_err, StatsError::Platform(_)));

        let cfg: StatsError = ConfigError::MissingCredential.into();
        assert!(cfg.to_string().contains("DOC_STATS_TOKEN"));
    }
}
