use std::path::PathBuf;

use thiserror::Error;
use tokio::task::JoinError;

use crate::models::Coordinate;

/// Rejected configuration. Raised once at startup, before the display is touched.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid JSON config: {0}")]
    Json(#[from] serde_json::Error),

    #[error("line {line}: {message}")]
    Malformed { line: usize, message: String },

    #[error("record {record}: invalid method: {method}")]
    UnknownMethod { record: usize, method: String },

    #[error("record {record}: invalid color: {name}")]
    UnknownColor { record: usize, name: String },

    #[error("record {record}: coordinate ({x}, {y}) is outside the {width}x{height} grid")]
    OutOfGrid {
        record: usize,
        x: i64,
        y: i64,
        width: u8,
        height: u8,
    },

    #[error("record {record}: {field} must be greater than zero")]
    ZeroDuration { record: usize, field: &'static str },

    #[error("scroll_speed must be between 0 and {max} seconds per column, got {value}")]
    ScrollSpeed { value: f32, max: f32 },

    #[error("no report record configured")]
    MissingReport,

    #[error("record {record}: duplicate report record (first at record {first})")]
    DuplicateReport { record: usize, first: usize },
}

#[derive(Debug, Error)]
pub enum DisplayError {
    #[error("pixel {at} is outside the {width}x{height} display")]
    OutOfBounds { at: Coordinate, width: u8, height: u8 },

    #[error("display I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Anything that stops the program before the first loop starts.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to initialise display: {0}")]
    Display(#[from] DisplayError),
}

/// Unrecoverable failure inside one of the supervised loops.
#[derive(Debug, Error)]
pub enum LoopError {
    #[error("{task}: display write failed: {source}")]
    Display {
        task: String,
        #[source]
        source: DisplayError,
    },

    #[error("{task}: render worker failed: {source}")]
    Render {
        task: String,
        #[source]
        source: JoinError,
    },

    #[error("{task} panicked: {source}")]
    Panicked {
        task: String,
        #[source]
        source: JoinError,
    },

    #[error("{task} exited unexpectedly")]
    Exited { task: String },
}

impl LoopError {
    /// Name of the loop that failed.
    pub fn task(&self) -> &str {
        match self {
            LoopError::Display { task, .. }
            | LoopError::Render { task, .. }
            | LoopError::Panicked { task, .. }
            | LoopError::Exited { task } => task,
        }
    }
}
