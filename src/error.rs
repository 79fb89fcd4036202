//! Error types for the broker and the framing codec.

use std::time::Duration;
use thiserror::Error;

/// Failures the broker can run into. Only `Connection` concerns the broker
/// itself; the other variants are scoped to one request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BrokerError {
    /// The host process could not be reached or spawned.
    #[error("host connection failed: {0}")]
    Connection(String),

    /// Writing to an established connection failed.
    #[error("failed to send request to host: {0}")]
    Transmission(String),

    /// The host did not answer within the request window.
    #[error("AI response is taking too long (no reply within {}s). Please try again shortly.", .0.as_secs())]
    HostTimeout(Duration),

    /// The host answered with an explicit error; surfaced verbatim.
    #[error("{0}")]
    HostReported(String),
}

/// Native-messaging framing errors.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("frame of {len} bytes exceeds the {max} byte limit")]
    FrameTooLarge { len: usize, max: usize },

    #[error("invalid JSON payload: {0}")]
    Json(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_reported_is_verbatim() {
        let err = BrokerError::HostReported("unknown type".to_string());
        assert_eq!(err.to_string(), "unknown type");
    }

    #[test]
    fn test_timeout_mentions_window() {
        let err = BrokerError::HostTimeout(Duration::from_secs(8));
        assert!(err.to_string().contains("8s"));
    }
}
