//! Pipeline errors.

use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::gateway::ProviderError;
use crate::key::PartitionKey;

/// Failure categories used for reporting and policy.
///
/// `MissingInput` and `GenerationFailure` skip one unit and the stage carries
/// on; `ConfigurationError` stops the run before any stage starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    MissingInput,
    GenerationFailure,
    ConfigurationError,
    Io,
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("missing input: {0}")]
    MissingInput(String),
    #[error("invalid input in {path}: {message}")]
    InvalidInput { path: PathBuf, message: String },
    #[error("generation failed for {key}: {source}")]
    Generation {
        key: PartitionKey,
        #[source]
        source: ProviderError,
    },
    #[error("configuration error: {0}")]
    Config(String),
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl PipelineError {
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    pub fn invalid(path: impl AsRef<Path>, message: impl Into<String>) -> Self {
        Self::InvalidInput {
            path: path.as_ref().to_path_buf(),
            message: message.into(),
        }
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            Self::MissingInput(_) | Self::InvalidInput { .. } | Self::Csv(_) => {
                ErrorClass::MissingInput
            }
            Self::Generation { source, .. } if source.is_config() => {
                ErrorClass::ConfigurationError
            }
            Self::Generation { .. } => ErrorClass::GenerationFailure,
            Self::Config(_) => ErrorClass::ConfigurationError,
            Self::Io { .. } | Self::Json(_) => ErrorClass::Io,
        }
    }
}
