use thiserror::Error;

use crate::path::Path;

pub type Result<T> = std::result::Result<T, FormError>;

/// Errors raised while building or configuring a form.
///
/// Validation failures are not errors: they are [`ValidationError`] data
/// attached to a field. Runtime usage mistakes (reading a path that does not
/// exist) log a warning and return `None`/`false` instead.
///
/// [`ValidationError`]: crate::validation::ValidationError
#[derive(Debug, Error)]
pub enum FormError {
    #[error("invalid schema: {message}")]
    InvalidSchema { message: String },

    #[error("behavior on `{target}` would feed back into its own source `{source_path}`")]
    Cycle { target: Path, source_path: Path },

    #[error("unsupported path `{path}`: {reason}")]
    UnsupportedPath { path: Path, reason: String },

    #[error("config error: {0}")]
    Config(#[from] toml::de::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl FormError {
    #[must_use]
    pub fn invalid_schema(message: impl Into<String>) -> Self {
        Self::InvalidSchema {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn unsupported_path(path: Path, reason: impl Into<String>) -> Self {
        Self::UnsupportedPath {
            path,
            reason: reason.into(),
        }
    }
}
