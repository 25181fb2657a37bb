//! Ranging source error types and recovery hints

use thiserror::Error;

/// Errors raised by a ranging source
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SourceError {
    /// The radio refused to open a subscription
    #[error("subscribe failed: {reason}")]
    SubscribeFailed { reason: String },
    /// Releasing the subscription faulted
    #[error("unsubscribe failed: {reason}")]
    UnsubscribeFailed { reason: String },
    /// The active stream reported an error
    #[error("stream fault: {reason}")]
    StreamFault { reason: String, recoverable: bool },
    /// The event stream closed while the subscription was still wanted
    #[error("event stream ended unexpectedly")]
    StreamEnded,
    /// Policy rejected by the source
    #[error("invalid ranging policy: {parameter} = {value}")]
    InvalidPolicy { parameter: String, value: String },
}

/// Result type for ranging source operations
pub type SourceResult<T> = Result<T, SourceError>;

impl SourceError {
    /// Whether resubscribing has a chance of clearing this error
    pub fn is_recoverable(&self) -> bool {
        match self {
            SourceError::StreamFault { recoverable, .. } => *recoverable,
            SourceError::StreamEnded => true,
            SourceError::SubscribeFailed { .. } => true,
            SourceError::UnsubscribeFailed { .. } => false,
            SourceError::InvalidPolicy { .. } => false,
        }
    }
}
