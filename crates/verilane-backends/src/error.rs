//! Backend error types

use std::time::Duration;
use thiserror::Error;

/// Errors produced while managing a verification backend
#[derive(Error, Debug)]
pub enum BackendError {
    /// The backend or one of its stages is misconfigured. Fatal before any
    /// process is started.
    #[error("Invalid backend configuration: {0}")]
    Configuration(String),

    /// A process could not be launched
    #[error("Failed to start backend process: {0}")]
    Startup(String),

    /// The Java runtime is missing or too old
    #[error("Incompatible Java runtime: {0}")]
    RuntimeIncompatible(String),

    /// The peer server never answered its liveness probe
    #[error("Backend server did not become reachable after {attempts} probes")]
    ProbeExhausted { attempts: u32 },

    #[error("Backend is not ready")]
    NotReady,

    #[error("Backend is already starting")]
    AlreadyStarting,

    /// The backend stream or server answered unexpectedly
    #[error("Communication with backend failed: {0}")]
    Communication(String),

    #[error("Backend operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("Operation not supported by the {0} engine")]
    Unsupported(String),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl BackendError {
    /// One-line message suitable for surfacing to the user.
    ///
    /// Returns `None` for conditions that are only logged.
    pub fn hint(&self) -> Option<String> {
        match self {
            BackendError::Configuration(msg) => Some(format!("Backend configuration error: {msg}")),
            BackendError::Startup(msg) => Some(format!("Backend could not be started: {msg}")),
            BackendError::RuntimeIncompatible(msg) => Some(format!(
                "A Java runtime of version 1.8 or newer is required: {msg}"
            )),
            BackendError::ProbeExhausted { .. } => {
                Some("The verification server could not be reached".to_string())
            }
            BackendError::NotReady => Some("No backend is ready".to_string()),
            BackendError::Timeout(duration) => {
                Some(format!("The backend did not respond within {duration:?}"))
            }
            BackendError::AlreadyStarting
            | BackendError::Communication(_)
            | BackendError::Unsupported(_)
            | BackendError::Http(_)
            | BackendError::Io(_) => None,
        }
    }
}
