use std::path::PathBuf;

use crate::model::DocumentFormat;

#[derive(Debug, thiserror::Error)]
pub enum DocfillError {
    #[error("unsupported document format '{extension}' for {path}. Supported: .xlsx, .xlsm, .docx, .docm, .pdf")]
    UnsupportedFormat { path: PathBuf, extension: String },

    #[error("failed to parse {format} document {path}: {reason}")]
    DocumentParse {
        path: PathBuf,
        format: DocumentFormat,
        reason: String,
    },

    #[error("failed to write filled {format} document for {path}: {reason}")]
    FillWrite {
        path: PathBuf,
        format: DocumentFormat,
        reason: String,
    },

    #[error("cannot fill {format} document {path}: {reason}")]
    UnsupportedOperation {
        path: PathBuf,
        format: DocumentFormat,
        reason: String,
    },

    #[error("deadline exceeded while {stage} {path}")]
    DeadlineExceeded { path: PathBuf, stage: String },

    #[error("failed to load presets from {path}: {reason}")]
    PresetLoad { path: PathBuf, reason: String },

    #[error("invalid preset: {0}")]
    PresetInvalid(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
