use std::path::PathBuf;
use thiserror::Error;

/// Failure taxonomy for a recording session.
///
/// `SelectionCancelled` and the audio retry path are recoverable; everything
/// else ends the session. The controller always settles back in `Idle` so a
/// new session can be started.
#[derive(Debug, Error)]
pub enum RecorderError {
    #[error("capture source selection cancelled")]
    SelectionCancelled,

    #[error("could not parse geometry from picker output: {0:?}")]
    BadGeometry(String),

    #[error("output directory is not writable: {0}")]
    OutputDirNotWritable(PathBuf),

    #[error("failed to launch encoder: {0}")]
    EncoderSpawn(#[source] std::io::Error),

    #[error("encoder failed: {0}")]
    EncoderFailed(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, RecorderError>;
