use std::io;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum GpioError {
    #[error("Resource unavailable: {}: {source}", .path.display())]
    ResourceUnavailable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Write incomplete: {}: expected {expected} bytes, wrote {written}", .path.display())]
    WriteIncomplete {
        path: PathBuf,
        expected: usize,
        written: usize,
        #[source]
        source: Option<io::Error>,
    },
    #[error("Read failed: {}: {reason}", .path.display())]
    ReadFailed { path: PathBuf, reason: String },
    #[error("Invalid state: {} was never opened", .path.display())]
    InvalidState { path: PathBuf },
    #[error("Stop signal error: {0}")]
    Signal(#[source] io::Error),
    #[error("Configuration error: {0}")]
    Config(String),
}

impl GpioError {
    pub(crate) fn unavailable(path: impl Into<PathBuf>, source: io::Error) -> Self {
        GpioError::ResourceUnavailable {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn read_failed(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        GpioError::ReadFailed {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, GpioError>;
