use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while building or driving a classifier backend.
///
/// These never reach the caller of [`Detector::check`](crate::Detector::check): model
/// loading swallows them into the loaded/unloaded state, and per-request failures are
/// reported as [`ErrorKind`] inside a [`DetectionResult`](crate::DetectionResult).
#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("Filesystem error: {operation} failed for {path:?}")]
    FileSystem {
        path: PathBuf,
        operation: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Model error: {operation} failed")]
    Model {
        operation: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Validation error: {field} {reason}")]
    Validation { field: String, reason: String },
}

pub type Result<T> = std::result::Result<T, DetectorError>;

impl DetectorError {
    pub fn model(
        operation: impl Into<String>,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self::Model {
            operation: operation.into(),
            source: source.into(),
        }
    }

    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Why a single detection request failed.
///
/// Every variant is terminal for the request it belongs to. Callers that receive one
/// may issue a fresh request but must not read it as a "safe" verdict.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    #[error("Detection failed: NSFW model initialization failed")]
    ModelNotLoaded,

    #[error("Detection failed: image has no representation the classifier accepts")]
    InvalidImageFormat,

    #[error("Detection failed: classifier rejected the request")]
    SubmissionError,

    #[error("Detection failed: classifier reported an error")]
    BackendError,

    #[error("Detection failed: no NSFW observation found")]
    NoObservation,
}

/// Error returned synchronously by a backend that refuses a request before running it.
#[derive(Error, Debug)]
#[error("request rejected: {reason}")]
pub struct SubmissionError {
    pub reason: String,
}

impl SubmissionError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl From<ort::Error> for DetectorError {
    fn from(err: ort::Error) -> Self {
        Self::model("ort operation", err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds_display_distinct_messages() {
        let kinds = [
            ErrorKind::ModelNotLoaded,
            ErrorKind::InvalidImageFormat,
            ErrorKind::SubmissionError,
            ErrorKind::BackendError,
            ErrorKind::NoObservation,
        ];
        let messages: std::collections::HashSet<String> =
            kinds.iter().map(|k| k.to_string()).collect();
        assert_eq!(messages.len(), kinds.len());
    }

    #[test]
    fn test_validation_error_names_field_and_reason() {
        let err = DetectorError::validation("labels", "must not be empty");
        assert_eq!(err.to_string(), "Validation error: labels must not be empty");
    }

    #[test]
    fn test_model_error_keeps_source() {
        use std::error::Error as _;

        let err = DetectorError::model("warm-up", "output tensor missing");
        assert_eq!(err.to_string(), "Model error: warm-up failed");
        assert_eq!(err.source().unwrap().to_string(), "output tensor missing");
    }
}
