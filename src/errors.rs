//! Print pipeline error types
//!
//! This module provides the structured error type shared by every stage of the
//! print pipeline: web map assembly, remote service calls and job execution.
//!
//! # Propagation
//!
//! - Legend lookups never surface these errors; a failed lookup degrades the
//!   layer's legend count instead.
//! - Assembly errors (`InvalidMapState`) abort the whole pipeline.
//! - Job errors (`JobFailed`, `JobCancelled`) are handed to the caller as-is.
//!
//! # Examples
//!
//! ```rust
//! use webmap_print::errors::PrintError;
//!
//! let err = PrintError::JobFailed(serde_json::json!("Layout not found"));
//! assert!(err.is_job_error());
//! assert_eq!(err.error_code(), "JOB_FAILED");
//! ```

use serde_json::Value;
use thiserror::Error;

/// Errors raised while assembling, submitting or tracking a print.
#[derive(Error, Debug)]
pub enum PrintError {
    /// A remote endpoint could not be reached or answered with a failure status
    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    /// Transport-level HTTP failure
    #[cfg(feature = "http")]
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The metadata endpoint kept answering with an authentication challenge
    #[error("Authentication required ({code}): {message}")]
    AuthenticationRequired {
        /// Challenge code reported by the service
        code: i64,
        /// Challenge message reported by the service
        message: String,
    },

    /// An expected service parameter is missing from the service metadata
    #[error("Service parameter '{0}' is not published by the print service")]
    ConfigurationMismatch(String),

    /// The remote job reported an error; the payload is kept verbatim
    #[error("Print job failed: {0}")]
    JobFailed(Value),

    /// The job was cancelled by the client
    #[error("Print job was cancelled")]
    JobCancelled,

    /// The live map state cannot be turned into a print document
    #[error("Invalid map state: {0}")]
    InvalidMapState(String),

    /// A remote response did not have the expected shape
    #[error("Invalid service response: {0}")]
    InvalidResponse(String),

    /// JSON encoding or decoding failed
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Conditional template checks did not allow the print to go ahead
    #[error("{0}")]
    TemplateConditions(String),

    /// Invalid local configuration
    #[error("Configuration error: {0}")]
    Config(String),
}

impl PrintError {
    /// Check if this error was produced by the remote job itself
    pub fn is_job_error(&self) -> bool {
        matches!(self, PrintError::JobFailed(_) | PrintError::JobCancelled)
    }

    /// Check if this error may be absorbed by degrading a derived value
    pub fn is_degradable(&self) -> bool {
        match self {
            PrintError::ServiceUnavailable(_)
            | PrintError::InvalidResponse(_)
            | PrintError::ConfigurationMismatch(_) => true,
            #[cfg(feature = "http")]
            PrintError::Http(_) => true,
            _ => false,
        }
    }

    /// Get error code for API responses
    pub fn error_code(&self) -> &'static str {
        match self {
            PrintError::ServiceUnavailable(_) => "SERVICE_UNAVAILABLE",
            #[cfg(feature = "http")]
            PrintError::Http(_) => "SERVICE_UNAVAILABLE",
            PrintError::AuthenticationRequired { .. } => "UNAUTHORIZED",
            PrintError::ConfigurationMismatch(_) => "CONFIGURATION_MISMATCH",
            PrintError::JobFailed(_) => "JOB_FAILED",
            PrintError::JobCancelled => "JOB_CANCELLED",
            PrintError::InvalidMapState(_)
            | PrintError::TemplateConditions(_)
            | PrintError::Config(_) => "VALIDATION_FAILED",
            PrintError::InvalidResponse(_) | PrintError::Serialization(_) => "INVALID_RESPONSE",
        }
    }
}

/// Result type alias for print operations
pub type PrintResult<T> = Result<T, PrintError>;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_job_failed_keeps_payload() {
        let payload = json!({"code": 500, "message": "Layout missing"});
        let err = PrintError::JobFailed(payload.clone());
        match &err {
            PrintError::JobFailed(inner) => assert_eq!(inner, &payload),
            other => panic!("unexpected error {other:?}"),
        }
        assert!(err.is_job_error());
        assert!(!err.is_degradable());
        assert_eq!(err.error_code(), "JOB_FAILED");
    }

    #[test]
    fn test_job_cancelled() {
        let err = PrintError::JobCancelled;
        assert_eq!(err.to_string(), "Print job was cancelled");
        assert!(err.is_job_error());
        assert_eq!(err.error_code(), "JOB_CANCELLED");
    }

    #[test]
    fn test_authentication_required() {
        let err = PrintError::AuthenticationRequired {
            code: 499,
            message: "Token Required".to_string(),
        };
        assert_eq!(err.to_string(), "Authentication required (499): Token Required");
        assert_eq!(err.error_code(), "UNAUTHORIZED");
    }

    #[test]
    fn test_service_errors_are_degradable() {
        assert!(PrintError::ServiceUnavailable("legend".to_string()).is_degradable());
        assert!(PrintError::ConfigurationMismatch("Format".to_string()).is_degradable());
        assert!(!PrintError::InvalidMapState("duplicate id".to_string()).is_degradable());
    }

    #[test]
    fn test_result_alias() {
        let result: PrintResult<()> = Err(PrintError::Config("missing url".to_string()));
        assert!(result.is_err());
    }
}
