use std::io;
use std::path::PathBuf;
use thiserror::Error;

pub type FlowResult<T> = Result<T, FlowError>;

#[derive(Debug, Error)]
pub enum FlowError {
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
    #[error("interpolation needs at least 2 distinct frequencies, got {points}")]
    InterpolationUnderdetermined { points: usize },
    #[error("frequency {0} is not a point of the interpolation grid")]
    FrequencyOffGrid(u64),
    #[error("length mismatch: {predicted} predicted values vs {truth} ground-truth values")]
    LengthMismatch { predicted: usize, truth: usize },
    #[error("i/o error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl FlowError {
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        FlowError::Io {
            path: path.into(),
            source,
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        FlowError::InvalidConfiguration(msg.into())
    }
}
