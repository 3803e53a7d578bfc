use thiserror::Error;

#[derive(Error, Debug)]
pub enum TraceError {
    #[error("Log entry {path} has neither a kind nor a type")]
    MissingKind { path: String },

    #[error("Invalid position {0:?} in execution log")]
    InvalidPosition(String),

    #[error("Execution log does not contain a JSON array")]
    NotAnArray,

    #[error("Malformed execution log: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
