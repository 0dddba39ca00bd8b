use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ContractError {
    #[error("Invalid goal id format.")]
    InvalidGoalId { id: String },
    #[error("Goal not found.")]
    GoalNotFound { id: String },
    #[error("file system error at '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("serialization error: {source}")]
    Serialization {
        #[from]
        source: serde_json::Error,
    },
}

impl ContractError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

pub type ContractResult<T> = Result<T, ContractError>;
