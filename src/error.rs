//! Error types for the scoring engine.
//!
//! - `TransportError`: a remote collaborator could not be reached or answered garbage.
//!   Recovered locally by fallbacks; never fatal.
//! - `ValidationError`: a rejected mutation or submission. Nothing changed.
//! - `SubmissionError`: a failed submit. Local state is untouched and the call may be retried.
//! - `StoreError`: the local key-value store failed to read or write.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{operation} failed: {message}")]
pub struct TransportError {
    pub operation: String,
    pub message: String,
}

impl TransportError {
    pub fn new(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("missing {0} in scoring context")]
    MissingContext(&'static str),
    #[error("no rubric loaded for the active form")]
    RubricNotLoaded,
    #[error("unknown aspect {0}")]
    UnknownAspect(String),
    #[error("unknown category {0}")]
    UnknownCategory(String),
    #[error("unknown quality tier {0:?}")]
    UnknownTier(String),
    #[error("score input {input:?} for aspect {aspect_id} is not a number")]
    NotNumeric { aspect_id: String, input: String },
    #[error("score {value} for aspect {aspect_id} is outside 0..={max}")]
    OutOfRange {
        aspect_id: String,
        value: i64,
        max: u32,
    },
    #[error("team {0} is not registered for the selected event")]
    TeamNotVisible(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubmissionError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("submission rejected: {0}")]
    Rejected(String),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl SubmissionError {
    /// Rejections and transport failures leave local state intact, so the judge may try again.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, SubmissionError::Validation(_))
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("store encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_validation_failures_are_final() {
        let validation = SubmissionError::from(ValidationError::MissingContext("team"));
        let rejected = SubmissionError::Rejected("closed".to_string());
        let transport = SubmissionError::from(TransportError::new("SubmitScores", "timeout"));
        assert!(!validation.is_retryable());
        assert!(rejected.is_retryable());
        assert!(transport.is_retryable());
    }

    #[test]
    fn messages_name_the_failing_piece() {
        let err = ValidationError::OutOfRange {
            aspect_id: "a1".to_string(),
            value: 40,
            max: 35,
        };
        assert_eq!(err.to_string(), "score 40 for aspect a1 is outside 0..=35");
        assert_eq!(
            TransportError::new("GetRubric(4)", "connection refused").to_string(),
            "GetRubric(4) failed: connection refused"
        );
    }
}
