use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WaypointsError {
    #[error("unknown profile: {0}")]
    UnknownProfile(String),

    #[error("invalid phase: {0} (expected 1-4 or requirements|interfaces|tests|implementation)")]
    InvalidPhase(String),

    #[error("invalid transition from phase {from} to {to}: {reason}")]
    InvalidTransition { from: u8, to: u8, reason: String },

    #[error("no active workflow for session '{0}': run 'waypoints init' first")]
    NotActive(String),

    #[error("corrupt state file {path}: {reason}")]
    CorruptState { path: PathBuf, reason: String },

    #[error("malformed config {path}: {reason}")]
    MalformedConfig { path: PathBuf, reason: String },

    #[error("directory not found: {0}")]
    MissingDirectory(PathBuf),

    #[error("home directory not found: set HOME or CLAUDE_CONFIG_DIR")]
    HomeNotFound,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, WaypointsError>;
