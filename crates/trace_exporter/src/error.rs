//! Error taxonomy for the export pipeline.
//!
//! Encoding errors are local to one span, transport errors affect a whole batch,
//! and configuration errors are fatal at construction.

use thiserror::Error;

/// A single span could not be turned into a wire record
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EncodingError {
    /// A field does not fit the target numeric width
    #[error("unrepresentable field: {field}")]
    Unrepresentable { field: &'static str },
    /// The encoded record alone exceeds the batch byte budget
    #[error("encoded span of {size} bytes exceeds the {limit} byte batch limit")]
    RecordTooLarge { size: usize, limit: usize },
}

/// A batch could not be delivered to the collector
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Collector answered with a non-2xx status or the request failed outright
    #[error("delivery failed{}: {reason}", status.map(|s| format!(" (status {s})")).unwrap_or_default())]
    DeliveryFailed { status: Option<u16>, reason: String },
    /// The framed datagram does not fit the medium
    #[error("datagram of {size} bytes exceeds the {limit} byte packet limit")]
    OversizedDatagram { size: usize, limit: usize },
    /// Socket setup or write error
    #[error("i/o error: {0}")]
    Io(String),
}

impl From<std::io::Error> for TransportError {
    fn from(e: std::io::Error) -> Self {
        TransportError::Io(e.to_string())
    }
}

/// The exporter configuration is unusable
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("serviceName is required")]
    MissingServiceName,
    #[error("invalid collector endpoint: {0}")]
    InvalidEndpoint(String),
    #[error("invalid {name}: {reason}")]
    InvalidLimit { name: &'static str, reason: String },
    #[error("failed to parse configuration: {0}")]
    Parse(String),
}

/// Outcome error of a flush, publish, or close
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ExportError {
    #[error("encoding error: {0}")]
    Encoding(#[from] EncodingError),
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
    /// The exporter has been closed
    #[error("exporter is closed")]
    Closed,
    /// The final flush did not finish within the shutdown timeout
    #[error("shutdown timed out, {lost} spans lost")]
    ShutdownTimeout { lost: usize },
    /// The flush worker stopped before answering
    #[error("flush worker is gone")]
    WorkerGone,
}

impl ExportError {
    /// Returns `true` if the error means the exporter can no longer send.
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Closed | Self::ShutdownTimeout { .. } | Self::WorkerGone
        )
    }
}

/// An exporter could not be built from its configuration
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SetupError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("transport setup failed: {0}")]
    Transport(#[from] TransportError),
}

/// Outcome of one flush attempt: spans sent, or a typed failure
pub type FlushResult = Result<usize, ExportError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delivery_failed_display() {
        let with_status = TransportError::DeliveryFailed {
            status: Some(503),
            reason: "Service Unavailable".to_string(),
        };
        assert_eq!(
            with_status.to_string(),
            "delivery failed (status 503): Service Unavailable"
        );

        let without_status = TransportError::DeliveryFailed {
            status: None,
            reason: "connection refused".to_string(),
        };
        assert_eq!(without_status.to_string(), "delivery failed: connection refused");
    }

    #[test]
    fn test_terminal_errors() {
        assert!(ExportError::Closed.is_terminal());
        assert!(ExportError::ShutdownTimeout { lost: 3 }.is_terminal());
        assert!(!ExportError::Transport(TransportError::Io("x".into())).is_terminal());
    }
}
