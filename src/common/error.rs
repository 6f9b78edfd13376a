//! Error types for the application.
//!
//! Every error enum reports an [`ErrorClass`] through [`Classify`]; the retry
//! policy and the relay loop only ever look at the class.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::common::messages::MessageStatus;
use crate::common::types::ConversationId;

/// How a failure should be handled by whoever observes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Rate limits, timeouts, dropped connections: retry with backoff.
    Transient,
    /// Rejected payloads, deleted destinations: fail without retry.
    Permanent,
    /// Corrupt or unsupported input: fail without retry.
    Data,
    /// Cannot continue safely (storage unavailable): halt ingest.
    Fatal,
}

/// Classification hook shared by all error enums.
pub trait Classify {
    fn class(&self) -> ErrorClass;

    /// Minimum wait the remote asked for before the next attempt.
    fn retry_after(&self) -> Option<Duration> {
        None
    }

    fn is_transient(&self) -> bool {
        self.class() == ErrorClass::Transient
    }
}

/// Top-level relay error.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Platform error: {0}")]
    Platform(#[from] PlatformError),

    #[error("Media error: {0}")]
    Media(#[from] MediaError),

    #[error("Invalid status transition {from:?} -> {to:?}")]
    InvalidTransition { from: MessageStatus, to: MessageStatus },

    #[error("Conversation {conversation} is not mapped")]
    NotMapped { conversation: ConversationId },

    #[error("Relay is shutting down")]
    Shutdown,

    #[error("Relay halted after a fatal error")]
    Halted,
}

impl Classify for RelayError {
    fn class(&self) -> ErrorClass {
        match self {
            RelayError::Config(_) => ErrorClass::Fatal,
            RelayError::Storage(e) => e.class(),
            RelayError::Platform(e) => e.class(),
            RelayError::Media(e) => e.class(),
            RelayError::InvalidTransition { .. } => ErrorClass::Permanent,
            RelayError::NotMapped { .. } => ErrorClass::Permanent,
            RelayError::Shutdown => ErrorClass::Permanent,
            RelayError::Halted => ErrorClass::Fatal,
        }
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            RelayError::Platform(e) => e.retry_after(),
            _ => None,
        }
    }
}

/// Configuration-related errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    IoError {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {message}")]
    ParseError { message: String },

    #[error("Config validation failed: {message}")]
    ValidationError { message: String },
}

/// Durable storage errors. Losing mapping truth is never retried.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Corrupt state file {path}: {message}")]
    Corrupt { path: PathBuf, message: String },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Mapping for {conversation} already points at group {existing}")]
    GroupAlreadyAssigned {
        conversation: ConversationId,
        existing: String,
    },

    #[error("No mapping for conversation {conversation}")]
    NotFound { conversation: ConversationId },
}

impl StorageError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn corrupt(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Corrupt {
            path: path.into(),
            message: message.into(),
        }
    }
}

impl Classify for StorageError {
    fn class(&self) -> ErrorClass {
        match self {
            StorageError::GroupAlreadyAssigned { .. } | StorageError::NotFound { .. } => {
                ErrorClass::Permanent
            }
            _ => ErrorClass::Fatal,
        }
    }
}

/// Errors reported by a platform transport.
#[derive(Debug, Clone, Error)]
pub enum PlatformError {
    #[error("Rate limited")]
    RateLimited { retry_after: Option<Duration> },

    #[error("Request timed out")]
    Timeout,

    #[error("Network error: {message}")]
    Network { message: String },

    #[error("Transport disconnected")]
    Disconnected,

    #[error("Payload rejected: {message}")]
    Rejected { message: String },

    #[error("Not found: {what}")]
    NotFound { what: String },

    #[error("Protocol error: {message}")]
    Protocol { message: String },
}

impl Classify for PlatformError {
    fn class(&self) -> ErrorClass {
        match self {
            PlatformError::RateLimited { .. }
            | PlatformError::Timeout
            | PlatformError::Network { .. }
            | PlatformError::Disconnected => ErrorClass::Transient,
            PlatformError::Rejected { .. }
            | PlatformError::NotFound { .. }
            | PlatformError::Protocol { .. } => ErrorClass::Permanent,
        }
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            PlatformError::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

/// Media conversion errors.
#[derive(Debug, Error)]
pub enum MediaError {
    #[error("Unsupported media format: {format}")]
    Unsupported { format: String },

    #[error("Conversion of {input} failed: {message}")]
    ConversionFailed { input: PathBuf, message: String },

    #[error("Conversion tool '{tool}' not found")]
    ToolMissing { tool: String },

    #[error("Media I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Media queue saturated after waiting {waited:?}")]
    QueueSaturated { waited: Duration },

    #[error("Media worker pool is closed")]
    PoolClosed,
}

impl Classify for MediaError {
    fn class(&self) -> ErrorClass {
        match self {
            MediaError::QueueSaturated { .. } => ErrorClass::Transient,
            MediaError::PoolClosed => ErrorClass::Permanent,
            _ => ErrorClass::Data,
        }
    }
}

/// Result type alias using RelayError.
pub type RelayResult<T> = std::result::Result<T, RelayError>;

/// Result type alias for storage operations.
pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Result type alias for platform operations.
pub type PlatformResult<T> = std::result::Result<T, PlatformError>;

/// Result type alias for media operations.
pub type MediaResult<T> = std::result::Result<T, MediaError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_platform_error_classes() {
        assert_eq!(
            PlatformError::RateLimited { retry_after: None }.class(),
            ErrorClass::Transient
        );
        assert_eq!(PlatformError::Timeout.class(), ErrorClass::Transient);
        assert_eq!(
            PlatformError::Rejected {
                message: "too big".into()
            }
            .class(),
            ErrorClass::Permanent
        );
        assert_eq!(
            PlatformError::NotFound {
                what: "group".into()
            }
            .class(),
            ErrorClass::Permanent
        );
    }

    #[test]
    fn test_relay_error_delegates_class() {
        let storage: RelayError = StorageError::Serialization("boom".into()).into();
        assert_eq!(storage.class(), ErrorClass::Fatal);

        let media: RelayError = MediaError::Unsupported {
            format: "amr".into(),
        }
        .into();
        assert_eq!(media.class(), ErrorClass::Data);

        let saturated: RelayError = MediaError::QueueSaturated {
            waited: Duration::from_secs(1),
        }
        .into();
        assert!(saturated.is_transient());
    }

    #[test]
    fn test_retry_after_passes_through() {
        let err: RelayError = PlatformError::RateLimited {
            retry_after: Some(Duration::from_secs(7)),
        }
        .into();
        assert_eq!(err.retry_after(), Some(Duration::from_secs(7)));
    }
}
