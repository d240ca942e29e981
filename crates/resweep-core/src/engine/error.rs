use thiserror::Error;

use super::config::ConfigError;
use super::dispatch::{Device, InferenceError};
use crate::core::grid::FieldIoError;
use crate::core::io::StructureIoError;
use std::path::PathBuf;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Unsupported {kind} file format: {}", path.display())]
    UnsupportedFormat { kind: &'static str, path: PathBuf },

    #[error(transparent)]
    Structure(StructureIoError),

    #[error(transparent)]
    Field(FieldIoError),

    #[error("Invalid batch shape: expected {expected} entries, got {actual}")]
    InvalidBatchShape { expected: usize, actual: usize },

    #[error("Inference worker on device {device} failed: {source}")]
    WorkerFailure {
        device: Device,
        #[source]
        source: InferenceError,
    },

    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Initialization failed: {0}")]
    Initialization(String),

    #[error("Internal logic error: {0}")]
    Internal(String),
}

impl From<StructureIoError> for EngineError {
    fn from(err: StructureIoError) -> Self {
        match err {
            StructureIoError::UnsupportedFormat(path) => Self::UnsupportedFormat {
                kind: "structure",
                path,
            },
            other => Self::Structure(other),
        }
    }
}

impl From<FieldIoError> for EngineError {
    fn from(err: FieldIoError) -> Self {
        match err {
            FieldIoError::UnsupportedFormat(path) => Self::UnsupportedFormat { kind: "map", path },
            other => Self::Field(other),
        }
    }
}
