//! The selected backend and the service running it

use std::sync::Arc;
use verilane_backends::{create_service, BackendConfig, BoxedBackendService, ManagerSettings};

/// The backend every session currently verifies with.
///
/// Owned by the controller; replaced on backend selection and torn down when
/// the backend is stopped.
#[derive(Clone)]
pub struct BackendContext {
    pub backend: Arc<BackendConfig>,
    pub service: BoxedBackendService,
}

impl BackendContext {
    pub fn new(backend: BackendConfig, service: BoxedBackendService) -> Self {
        Self {
            backend: Arc::new(backend),
            service,
        }
    }

    /// Create the service for `backend`'s engine
    pub fn for_backend(backend: BackendConfig, settings: Arc<ManagerSettings>) -> Self {
        let service = create_service(backend.engine, settings);
        Self::new(backend, service)
    }

    pub fn name(&self) -> &str {
        &self.backend.name
    }
}

impl std::fmt::Debug for BackendContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendContext")
            .field("backend", &self.backend.name)
            .field("engine", &self.service.engine())
            .field("ready", &self.service.is_ready())
            .finish()
    }
}
