//! Error types for the export pipeline.

use serde::Serialize;
use thiserror::Error;

/// Outcome of a failed transport call.
///
/// A successful send is `Ok(())`; every failure is classified so the retry
/// controller and the health monitor can decide between retry, fallback and
/// drop without inspecting transport-specific errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ExportError {
    /// Connection refused/reset, timeout, throttling (429/503-equivalent).
    #[error("retryable network error: {0}")]
    RetryableNetwork(String),

    /// Malformed or unexpected response from a flaky peer.
    #[error("retryable protocol error: {0}")]
    RetryableProtocol(String),

    /// Client-side error; sending the same batch again will not help.
    #[error("fatal export error: {0}")]
    Fatal(String),

    /// The peer rejected the framing (wrong protocol for the port).
    #[error("protocol mismatch: {0}")]
    ProtocolMismatch(String),
}

impl ExportError {
    /// Whether the retry controller may try this batch again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ExportError::RetryableNetwork(_) | ExportError::RetryableProtocol(_)
        )
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            ExportError::RetryableNetwork(_) => ErrorClass::RetryableNetwork,
            ExportError::RetryableProtocol(_) => ErrorClass::RetryableProtocol,
            ExportError::Fatal(_) => ErrorClass::Fatal,
            ExportError::ProtocolMismatch(_) => ErrorClass::ProtocolMismatch,
        }
    }
}

/// Classification of the most recent pipeline failure, for introspection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    RetryableNetwork,
    RetryableProtocol,
    Fatal,
    ProtocolMismatch,
    BufferOverflow,
    ShutdownTimeout,
}

impl ErrorClass {
    pub(crate) fn as_u8(self) -> u8 {
        match self {
            ErrorClass::RetryableNetwork => 1,
            ErrorClass::RetryableProtocol => 2,
            ErrorClass::Fatal => 3,
            ErrorClass::ProtocolMismatch => 4,
            ErrorClass::BufferOverflow => 5,
            ErrorClass::ShutdownTimeout => 6,
        }
    }

    pub(crate) fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(ErrorClass::RetryableNetwork),
            2 => Some(ErrorClass::RetryableProtocol),
            3 => Some(ErrorClass::Fatal),
            4 => Some(ErrorClass::ProtocolMismatch),
            5 => Some(ErrorClass::BufferOverflow),
            6 => Some(ErrorClass::ShutdownTimeout),
            _ => None,
        }
    }
}

/// Errors surfaced by pipeline construction and shutdown.
///
/// Nothing on the producer path returns these; transport failures stay
/// inside the pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("failed to build transport: {0}")]
    Transport(String),

    /// Shutdown could not drain every kind before the deadline; the
    /// remaining sends were aborted.
    #[error("shutdown timed out, {pending} export task(s) aborted")]
    ShutdownTimeout { pending: usize },
}
