//! Error types for the measurement engine.
//!
//! [`TransferError`] describes a single failed network call and is handled
//! inside a phase. [`SpeedTestError`] is what a caller of the engine sees,
//! with a user-facing message and an optional suggestion.

use std::error::Error;
use std::fmt;

/// Exit codes for the application.
pub mod exit_codes {
    /// Successful execution.
    pub const SUCCESS: i32 = 0;
    /// Network error (connection failed, timeout, etc.).
    pub const NETWORK_ERROR: i32 = 1;
    /// API error (server returned an error response).
    pub const API_ERROR: i32 = 2;
    /// Configuration error (invalid arguments, missing config).
    pub const CONFIG_ERROR: i32 = 3;
    /// A measurement phase could not produce a result.
    pub const PHASE_FAILURE: i32 = 4;
    /// The test was cancelled before it finished.
    pub const CANCELLED: i32 = 130;
    /// Unknown/unexpected error.
    pub const UNKNOWN_ERROR: i32 = 99;
}

/// Failure of one network call against one endpoint.
#[derive(Debug)]
pub enum TransferError {
    /// The server answered with a non-success status code.
    Http(u16),
    /// Connection-level failure (refused, reset, DNS, TLS...).
    Network(String),
    /// The call exceeded its own time bound.
    Timeout,
    /// The response body could not be decoded.
    Decode(String),
}

impl fmt::Display for TransferError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferError::Http(status) => write!(f, "HTTP status {}", status),
            TransferError::Network(msg) => write!(f, "network error: {}", msg),
            TransferError::Timeout => write!(f, "request timed out"),
            TransferError::Decode(msg) => {
                write!(f, "could not decode response: {}", msg)
            }
        }
    }
}

impl Error for TransferError {}

impl From<reqwest::Error> for TransferError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            return TransferError::Timeout;
        }

        if let Some(status) = error.status() {
            return TransferError::Http(status.as_u16());
        }

        if error.is_decode() {
            return TransferError::Decode(error.to_string());
        }

        TransferError::Network(error.to_string())
    }
}

/// Categories of errors that can occur during speed testing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Network connectivity issues.
    Network,
    /// Connection timeout.
    Timeout,
    /// Backend returned an error response.
    Api,
    /// Invalid configuration or arguments.
    Config,
    /// No latency probe produced a usable timing.
    LatencyUnavailable,
    /// Every download endpoint was exhausted.
    DownloadUnavailable,
    /// Every upload endpoint was exhausted.
    UploadUnavailable,
    /// A run was started while another one was in progress.
    AlreadyRunning,
    /// Unknown or unexpected errors.
    Unknown,
}

impl ErrorKind {
    /// Get the exit code for this error kind.
    pub fn exit_code(&self) -> i32 {
        match self {
            ErrorKind::Network => exit_codes::NETWORK_ERROR,
            ErrorKind::Timeout => exit_codes::NETWORK_ERROR,
            ErrorKind::Api => exit_codes::API_ERROR,
            ErrorKind::Config => exit_codes::CONFIG_ERROR,
            ErrorKind::LatencyUnavailable => exit_codes::PHASE_FAILURE,
            ErrorKind::DownloadUnavailable => exit_codes::PHASE_FAILURE,
            ErrorKind::UploadUnavailable => exit_codes::PHASE_FAILURE,
            ErrorKind::AlreadyRunning => exit_codes::CONFIG_ERROR,
            ErrorKind::Unknown => exit_codes::UNKNOWN_ERROR,
        }
    }

    /// Get a user-friendly description of this error kind.
    pub fn description(&self) -> &'static str {
        match self {
            ErrorKind::Network => "Network error",
            ErrorKind::Timeout => "Connection timeout",
            ErrorKind::Api => "API error",
            ErrorKind::Config => "Configuration error",
            ErrorKind::LatencyUnavailable => "Latency test failed",
            ErrorKind::DownloadUnavailable => "Download test failed",
            ErrorKind::UploadUnavailable => "Upload test failed",
            ErrorKind::AlreadyRunning => "Test already running",
            ErrorKind::Unknown => "Unknown error",
        }
    }
}

/// A user-friendly error type for speed test operations.
#[derive(Debug)]
pub struct SpeedTestError {
    /// The kind of error.
    pub kind: ErrorKind,
    /// User-friendly error message.
    pub message: String,
    /// Optional suggestion for how to resolve the error.
    pub suggestion: Option<String>,
    /// The underlying error, if any.
    pub source: Option<Box<dyn Error + Send + Sync>>,
}

impl SpeedTestError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into(), suggestion: None, source: None }
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    pub fn with_source(
        mut self,
        source: impl Error + Send + Sync + 'static,
    ) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    pub fn exit_code(&self) -> i32 {
        self.kind.exit_code()
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Config, message)
    }

    pub fn latency_unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::LatencyUnavailable, message).with_suggestion(
            "The latency endpoints may be blocked. Try --ping-url.",
        )
    }

    pub fn download_unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::DownloadUnavailable, message).with_suggestion(
            "Every download endpoint failed. Check your connection or try \
             --download-url.",
        )
    }

    pub fn upload_unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::UploadUnavailable, message).with_suggestion(
            "Every upload endpoint failed. Check your connection or try \
             --upload-url.",
        )
    }

    pub fn already_running() -> Self {
        Self::new(
            ErrorKind::AlreadyRunning,
            "a test run is already in progress",
        )
    }
}

impl fmt::Display for SpeedTestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind.description(), self.message)?;

        if let Some(ref suggestion) = self.suggestion {
            write!(f, "\n  Suggestion: {}", suggestion)?;
        }

        Ok(())
    }
}

impl Error for SpeedTestError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.source.as_ref().map(|e| e.as_ref() as &(dyn Error + 'static))
    }
}

impl From<TransferError> for SpeedTestError {
    fn from(error: TransferError) -> Self {
        Self::new(classify_error(&error), error.to_string()).with_source(error)
    }
}

/// Classify a transport failure into an ErrorKind.
pub fn classify_error(error: &TransferError) -> ErrorKind {
    match error {
        TransferError::Http(_) | TransferError::Decode(_) => ErrorKind::Api,
        TransferError::Timeout => ErrorKind::Timeout,
        TransferError::Network(msg) => {
            let msg = msg.to_lowercase();
            if msg.contains("timed out") || msg.contains("deadline") {
                ErrorKind::Timeout
            } else {
                ErrorKind::Network
            }
        }
    }
}

/// Format an error for user display.
pub fn format_error_for_display(error: &SpeedTestError) -> String {
    let mut output = format!("Error: {}", error.message);

    if let Some(ref suggestion) = error.suggestion {
        output.push_str(&format!("\n\nSuggestion: {}", suggestion));
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind_exit_codes() {
        assert_eq!(ErrorKind::Network.exit_code(), exit_codes::NETWORK_ERROR);
        assert_eq!(ErrorKind::Timeout.exit_code(), exit_codes::NETWORK_ERROR);
        assert_eq!(ErrorKind::Api.exit_code(), exit_codes::API_ERROR);
        assert_eq!(ErrorKind::Config.exit_code(), exit_codes::CONFIG_ERROR);
        assert_eq!(
            ErrorKind::DownloadUnavailable.exit_code(),
            exit_codes::PHASE_FAILURE
        );
        assert_eq!(
            ErrorKind::UploadUnavailable.exit_code(),
            exit_codes::PHASE_FAILURE
        );
    }

    #[test]
    fn test_speed_test_error_display() {
        let error = SpeedTestError::download_unavailable("all 3 endpoints failed");

        let display = format!("{}", error);
        assert!(display.contains("Download test failed"));
        assert!(display.contains("all 3 endpoints failed"));
        assert!(display.contains("Suggestion"));
    }

    #[test]
    fn test_speed_test_error_source() {
        let error = SpeedTestError::upload_unavailable("no upload succeeded")
            .with_source(TransferError::Http(503));

        let source = error.source().map(|s| s.to_string());
        assert_eq!(source.as_deref(), Some("HTTP status 503"));
    }

    #[test]
    fn test_from_transfer_error() {
        let error = SpeedTestError::from(TransferError::Http(503));

        assert_eq!(error.kind, ErrorKind::Api);
        assert!(error.source.is_some());
        assert_eq!(error.exit_code(), exit_codes::API_ERROR);
    }

    #[test]
    fn test_classify_error() {
        assert_eq!(classify_error(&TransferError::Http(404)), ErrorKind::Api);
        assert_eq!(classify_error(&TransferError::Timeout), ErrorKind::Timeout);
        assert_eq!(
            classify_error(&TransferError::Network(
                "connection refused".to_string()
            )),
            ErrorKind::Network
        );
        assert_eq!(
            classify_error(&TransferError::Network(
                "operation timed out".to_string()
            )),
            ErrorKind::Timeout
        );
    }

    #[test]
    fn test_format_error_for_display() {
        let error = SpeedTestError::config("--pings must be at least 1");
        let output = format_error_for_display(&error);
        assert_eq!(output, "Error: --pings must be at least 1");
    }
}
