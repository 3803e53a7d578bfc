//! The process-strategy contract

use crate::config::{BackendConfig, EngineKind, ManagerSettings, StageConfig};
use crate::error::BackendError;
use crate::process::StageEvent;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Identifies an in-flight verification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "kind")]
pub enum JobRef {
    /// A local process (the stage process or the peer-server client)
    Process { pid: u32 },
    /// A job id handed out by an HTTP server
    Job { id: u64 },
}

/// A started stage: its job reference and its ordered output
#[derive(Debug)]
pub struct StageRun {
    pub job: JobRef,
    pub events: mpsc::Receiver<StageEvent>,
}

/// Uniform lifecycle contract over the process strategies
#[async_trait]
pub trait BackendService: Send + Sync {
    fn engine(&self) -> EngineKind;

    fn is_ready(&self) -> bool;

    /// Start `backend`. Returns immediately when it is already ready and
    /// fails with [`BackendError::AlreadyStarting`] while a start is running.
    async fn start(&self, backend: &BackendConfig) -> Result<(), BackendError>;

    /// Shut the backend down, forcing it if it does not comply
    async fn stop(&self) -> Result<(), BackendError>;

    /// Cancel the running verification (`job`, or the last one started)
    /// without touching a persistent server
    async fn stop_verification(&self, job: Option<JobRef>) -> Result<(), BackendError>;

    /// Run `stage` on `file`
    async fn start_stage_process(
        &self,
        file: &Path,
        stage: &StageConfig,
    ) -> Result<StageRun, BackendError>;

    /// Drop cached results for `file`, or for everything when `None`
    async fn flush_cache(&self, _file: Option<&Path>) -> Result<String, BackendError> {
        Err(BackendError::Unsupported(self.engine().to_string()))
    }

    /// OS pid of the persistent server, if any
    fn server_pid(&self) -> Option<u32> {
        None
    }
}

/// A shareable backend service
pub type BoxedBackendService = Arc<dyn BackendService>;

/// Create the strategy for `engine`
pub fn create_service(engine: EngineKind, settings: Arc<ManagerSettings>) -> BoxedBackendService {
    match engine {
        EngineKind::None => Arc::new(crate::single_shot::SingleShotService::new(settings)),
        EngineKind::PeerServer => Arc::new(crate::peer_server::PeerServerService::new(settings)),
        EngineKind::HttpServer => Arc::new(crate::http_server::HttpServerService::new(settings)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_service_matches_engine() {
        let settings = Arc::new(ManagerSettings::default());
        for engine in [EngineKind::None, EngineKind::PeerServer, EngineKind::HttpServer] {
            let service = create_service(engine, Arc::clone(&settings));
            assert_eq!(service.engine(), engine);
            assert!(!service.is_ready());
            assert!(service.server_pid().is_none());
        }
    }

    #[test]
    fn test_job_ref_serialization() {
        let job = JobRef::Job { id: 7 };
        let json = serde_json::to_string(&job).unwrap();
        assert_eq!(json, r#"{"kind":"job","id":7}"#);
    }
}
