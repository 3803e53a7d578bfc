use thiserror::Error;
use verilane_backends::BackendError;
use verilane_trace::TraceError;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("No session is open for {0}")]
    UnknownSession(String),

    #[error("No backend is selected")]
    NoBackend,

    #[error("Unknown backend: {0}")]
    UnknownBackend(String),

    #[error("No execution trace is available, verify the file first")]
    NoTrace,

    #[error("Invalid client index {0}")]
    InvalidClientIndex(usize),

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error(transparent)]
    Trace(#[from] TraceError),
}

impl SessionError {
    /// One-line message for the user, if the error warrants one
    pub fn hint(&self) -> Option<String> {
        match self {
            SessionError::Backend(e) => e.hint(),
            SessionError::NoBackend => Some("Select a verification backend first".to_string()),
            SessionError::UnknownBackend(name) => Some(format!("There is no backend named {name}")),
            _ => None,
        }
    }
}
