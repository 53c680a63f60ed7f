use std::path::PathBuf;

use thiserror::Error;

use crate::position::Position;

/// Errors raised while resolving files and positions.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(
        "position ({line}, {col}) is outside the file",
        line = .0.line,
        col = .0.col
    )]
    OutOfBounds(Position),

    #[error("offset {0} is outside the file")]
    OffsetOutOfBounds(usize),

    #[error("unknown project: {0}")]
    UnknownProject(String),

    #[error("file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("file I/O error: {0}")]
    Io(#[from] std::io::Error),
}
