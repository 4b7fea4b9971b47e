use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("No home directory")]
    NoHomeDir,

    #[error("Task not found: {0}")]
    TaskNotFound(String),

    #[error("Invalid status: {0}")]
    InvalidStatus(String),

    #[error("Invalid transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Dependency {dep} of task {task} is not completed")]
    DependencyUnmet { task: String, dep: String },

    #[error("{} is claimed by another holder: {holder}", path.display())]
    LockHeld { path: PathBuf, holder: String },

    #[error("{} is not held by {holder}", path.display())]
    LockNotHeld { path: PathBuf, holder: String },

    #[error("Worker pool is full (max: {max})")]
    PoolFull { max: usize },

    #[error("Worker not found: {0}")]
    WorkerNotFound(String),

    #[error("Turn aborted: {0}")]
    TurnAborted(String),

    #[error("Validation error: {0}")]
    Validation(String),
}

pub type Result<T> = std::result::Result<T, Error>;
