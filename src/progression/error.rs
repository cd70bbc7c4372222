use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressionErrorKind {
    NotFound,
    InvalidState,
    Validation,
    Persistence,
    Internal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("{message}")]
pub struct ProgressionError {
    pub kind: ProgressionErrorKind,
    pub message: String,
}

impl ProgressionError {
    pub fn new(kind: ProgressionErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Persistence failures commit nothing and may be repeated as-is.
    pub fn retryable(&self) -> bool {
        matches!(self.kind, ProgressionErrorKind::Persistence)
    }
}

pub fn not_found(message: impl Into<String>) -> ProgressionError {
    ProgressionError::new(ProgressionErrorKind::NotFound, message)
}

pub fn invalid_state(message: impl Into<String>) -> ProgressionError {
    ProgressionError::new(ProgressionErrorKind::InvalidState, message)
}

pub fn validation_error(message: impl Into<String>) -> ProgressionError {
    ProgressionError::new(ProgressionErrorKind::Validation, message)
}

pub fn persistence_failure(message: impl Into<String>) -> ProgressionError {
    ProgressionError::new(ProgressionErrorKind::Persistence, message)
}

pub fn internal_error(message: impl Into<String>) -> ProgressionError {
    ProgressionError::new(ProgressionErrorKind::Internal, message)
}
