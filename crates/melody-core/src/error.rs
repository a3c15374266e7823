use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MelodyError {
    #[error("flow spec not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("invalid flow spec {}: {reason}", path.display())]
    Parse { path: PathBuf, reason: String },

    #[error("pulumi operation failed on stack '{stack}': {message}")]
    Operation { stack: String, message: String },

    #[error("invalid stack name component '{0}': must be non-empty and contain no '.' or '/'")]
    InvalidStackName(String),

    #[error("project '{0}' is listed more than once in the run")]
    DuplicateProject(String),

    #[error("pulumi CLI not found: install it or pass --pulumi <path>")]
    PulumiNotFound,

    #[error("checkpoint does not match this run: {0}")]
    CheckpointMismatch(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, MelodyError>;
