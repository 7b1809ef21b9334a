use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, CallbackError>;

#[derive(Debug, Error)]
pub enum CallbackError {
    #[error("invalid callback configuration: {0}")]
    Configuration(String),

    #[error(
        "cannot find a checkpoint state in {}; register a checkpoint-producing train callback \
         (e.g. ModelSaver) before any test callback",
        dir.display()
    )]
    MissingCheckpoint { dir: PathBuf },

    #[error("secondary context is not initialized; before_train must run before epoch triggers")]
    ContextNotInitialized,

    #[error("graph error: {0}")]
    Graph(String),

    #[error("session error: {0}")]
    Session(String),

    #[error("checkpoint error: {0}")]
    Checkpoint(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    TomlParse(#[from] toml::de::Error),

    /// Raised by a callback or the model; passed through unmodified.
    #[error(transparent)]
    External(#[from] anyhow::Error),
}
