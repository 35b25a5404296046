//! Error types.
//!
//! The library reports failures through [`ModelError`]; the `morph` binary
//! converts them into an [`AppError`] carrying a process exit code.

use thiserror::Error;

/// Failures raised while building or evaluating a model.
#[derive(Error, Debug)]
pub enum ModelError {
    /// Malformed or mismatched grid/coordinate arrays.
    #[error("data shape error in '{name}': {reason}")]
    DataShape { name: String, reason: String },

    /// A string-referenced parameter or function is not registered.
    #[error("missing reference: '{0}' is not registered in the workspace")]
    MissingReference(String),

    /// The source-region value of a scale link is zero.
    #[error("degenerate scale for '{name}': source value is zero (target={target})")]
    DegenerateScale { name: String, target: f64 },

    /// A name is registered twice.
    #[error("duplicate name: '{0}' is already registered")]
    DuplicateName(String),

    /// A literal range or coordinate is outside its admissible domain.
    #[error("invalid range for '{name}': {reason}")]
    InvalidRange { name: String, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ModelError {
    pub fn data_shape(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::DataShape {
            name: name.into(),
            reason: reason.into(),
        }
    }

    pub fn invalid_range(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidRange {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Exit code used by the binary for this error kind.
    pub fn exit_code(&self) -> u8 {
        match self {
            ModelError::Io(_) | ModelError::Json(_) | ModelError::InvalidRange { .. } => 2,
            ModelError::DataShape { .. } => 3,
            ModelError::MissingReference(_)
            | ModelError::DegenerateScale { .. }
            | ModelError::DuplicateName(_) => 4,
        }
    }
}

pub type Result<T> = std::result::Result<T, ModelError>;

#[derive(Clone)]
pub struct AppError {
    exit_code: u8,
    message: String,
}

impl AppError {
    pub fn new(exit_code: u8, message: impl Into<String>) -> Self {
        Self {
            exit_code,
            message: message.into(),
        }
    }

    pub fn exit_code(&self) -> u8 {
        self.exit_code
    }
}

impl From<ModelError> for AppError {
    fn from(err: ModelError) -> Self {
        AppError::new(err.exit_code(), err.to_string())
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::fmt::Debug for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppError")
            .field("exit_code", &self.exit_code)
            .field("message", &self.message)
            .finish()
    }
}

impl std::error::Error for AppError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_errors_map_to_exit_codes() {
        let err: AppError = ModelError::data_shape("mean", "empty grid").into();
        assert_eq!(err.exit_code(), 3);
        assert!(err.to_string().contains("mean"));

        let err: AppError = ModelError::MissingReference("f_jpsi".into()).into();
        assert_eq!(err.exit_code(), 4);
    }
}
