//! # Feed Errors
//!
//! Every failure the controller can run into. Transport and decode failures are
//! absorbed inside the ingestor; only correction failures reach the caller.

use thiserror::Error;

/// The persistent connection could not be opened or was lost.
///
/// Always recovered through the reconnection path, never raised to the host.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("failed to open feed connection to {url}: {reason}")]
    Open { url: String, reason: String },

    #[error("feed connection closed by remote{}", .reason.as_deref().map(|r| format!(": {r}")).unwrap_or_default())]
    Closed { reason: Option<String> },

    #[error("feed connection error: {0}")]
    Protocol(String),
}

/// A message payload that is not a valid detection.
#[derive(Debug, Error)]
#[error("malformed detection payload ({excerpt}): {source}")]
pub struct DecodeError {
    /// The first few characters of the offending payload, for the log line.
    pub excerpt: String,
    #[source]
    pub source: serde_json::Error,
}

impl DecodeError {
    const EXCERPT_CHARS: usize = 80;

    pub fn new(payload: &str, source: serde_json::Error) -> Self {
        let excerpt: String = payload.chars().take(Self::EXCERPT_CHARS).collect();
        Self { excerpt, source }
    }
}

/// The plate-correction request failed. The feed store is left untouched.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CorrectionError {
    #[error("Please enter a valid plate number")]
    EmptyPlate,

    #[error("No changes to update")]
    Unchanged,

    #[error("detection {0} is unknown to the backend")]
    UnknownDetection(String),

    #[error("correction endpoint is not configured")]
    NotConfigured,

    #[error("correction rejected with status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("correction request failed: {0}")]
    Request(String),

    #[error("feed controller is no longer running")]
    ControllerGone,
}

impl CorrectionError {
    /// Whether the operator can simply try again.
    pub fn is_retryable(&self) -> bool {
        match self {
            CorrectionError::Request(_) => true,
            CorrectionError::Rejected { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }
}

/// The start-up snapshot fetch failed; the controller carries on empty.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum InitialFetchError {
    #[error("snapshot request rejected with status {status}")]
    Rejected { status: u16 },

    #[error("snapshot request failed: {0}")]
    Request(String),
}

/// Invalid controller or binary configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error occurred: {0}")]
    IoError(#[from] std::io::Error),

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_error_keeps_a_short_excerpt() {
        let payload = "x".repeat(500);
        let source = serde_json::from_str::<serde_json::Value>(&payload).unwrap_err();
        let err = DecodeError::new(&payload, source);
        assert_eq!(err.excerpt.len(), 80);
    }

    #[test]
    fn closed_error_renders_optional_reason() {
        let bare = TransportError::Closed { reason: None };
        assert_eq!(bare.to_string(), "feed connection closed by remote");
        let with = TransportError::Closed { reason: Some("going away".into()) };
        assert_eq!(with.to_string(), "feed connection closed by remote: going away");
    }

    #[test]
    fn only_transient_correction_failures_are_retryable() {
        assert!(CorrectionError::Request("timeout".into()).is_retryable());
        assert!(CorrectionError::Rejected { status: 503, body: String::new() }.is_retryable());
        assert!(!CorrectionError::Rejected { status: 404, body: String::new() }.is_retryable());
        assert!(!CorrectionError::EmptyPlate.is_retryable());
    }
}
