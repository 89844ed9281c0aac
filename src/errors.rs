use std::io;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TaskError {
    #[error("failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("task '{0}' has already been started")]
    AlreadyStarted(String),

    #[error("malformed resumption record: {0}")]
    Record(#[from] serde_json::Error),

    #[error("invalid resumption record: {0}")]
    InvalidRecord(String),

    #[error("unknown task kind: {0}")]
    UnknownKind(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, TaskError>;
