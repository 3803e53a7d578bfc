//! Single-shot strategy: one local process per verification

use crate::command::{CommandContext, CommandLine};
use crate::config::{BackendConfig, EngineKind, ManagerSettings, StageConfig};
use crate::detection::ensure_runtime;
use crate::error::BackendError;
use crate::process::{kill_process_tree, spawn_streaming, ExitWatch};
use crate::readiness::Readiness;
use crate::service::{BackendService, JobRef, StageRun};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Runs every stage as its own process. Nothing outlives a verification.
pub struct SingleShotService {
    settings: Arc<ManagerSettings>,
    readiness: Arc<Readiness>,
    backend: Mutex<Option<BackendConfig>>,
    running: Mutex<HashMap<u32, ExitWatch>>,
    last_pid: Mutex<Option<u32>>,
}

impl SingleShotService {
    pub fn new(settings: Arc<ManagerSettings>) -> Self {
        Self {
            settings,
            readiness: Readiness::new(),
            backend: Mutex::new(None),
            running: Mutex::new(HashMap::new()),
            last_pid: Mutex::new(None),
        }
    }

    /// Command for `stage` on `file`
    pub fn stage_command(
        &self,
        backend: &BackendConfig,
        file: &Path,
        stage: &StageConfig,
    ) -> Result<CommandLine, BackendError> {
        let ctx = CommandContext::new(&self.settings.tools, &backend.paths)
            .with_main_method(&stage.main_method)
            .with_file(file)
            .with_caching_disabled(self.settings.disable_caching);
        let mut args = ctx.expand_arguments(&self.settings.single_shot.command_template);
        args.extend(ctx.expand_arguments(&stage.custom_arguments));
        CommandLine::from_args(args).ok_or_else(|| {
            BackendError::Configuration(format!("stage '{}' expands to an empty command", stage.name))
        })
    }
}

#[async_trait]
impl BackendService for SingleShotService {
    fn engine(&self) -> EngineKind {
        EngineKind::None
    }

    fn is_ready(&self) -> bool {
        self.readiness.is_ready()
    }

    async fn start(&self, backend: &BackendConfig) -> Result<(), BackendError> {
        if self.readiness.is_ready() && self.backend.lock().await.as_ref() == Some(backend) {
            return Ok(());
        }
        backend.validate()?;
        let attempt = self.readiness.begin_attempt()?;

        if let Err(e) = ensure_runtime(&self.settings, &self.settings.single_shot.command_template).await {
            self.readiness.set_failed(attempt);
            return Err(e);
        }

        *self.backend.lock().await = Some(backend.clone());
        self.readiness.set_ready(attempt);
        info!(backend = %backend.name, "Single-shot backend ready");
        Ok(())
    }

    async fn stop(&self) -> Result<(), BackendError> {
        // no persistent process to shut down
        self.readiness.set_stopped();
        *self.backend.lock().await = None;
        Ok(())
    }

    async fn stop_verification(&self, job: Option<JobRef>) -> Result<(), BackendError> {
        let pid = match job {
            Some(JobRef::Process { pid }) => Some(pid),
            Some(JobRef::Job { .. }) => None,
            None => *self.last_pid.lock().await,
        };
        let Some(pid) = pid else {
            debug!("No running verification to stop");
            return Ok(());
        };

        let watch = self.running.lock().await.remove(&pid);
        let Some(mut watch) = watch else {
            return Ok(());
        };
        if watch.has_exited() {
            return Ok(());
        }

        info!(pid, "Stopping verification process");
        kill_process_tree(pid).await?;

        let grace = self
            .backend
            .lock()
            .await
            .as_ref()
            .map(BackendConfig::stopping_timeout)
            .unwrap_or_else(|| std::time::Duration::from_secs(5));
        if !watch.wait(grace).await {
            warn!(pid, "Verification process did not exit after kill");
            return Err(BackendError::Timeout(grace));
        }
        Ok(())
    }

    async fn start_stage_process(
        &self,
        file: &Path,
        stage: &StageConfig,
    ) -> Result<StageRun, BackendError> {
        if !self.readiness.is_ready() {
            return Err(BackendError::NotReady);
        }
        let backend = self.backend.lock().await.clone().ok_or(BackendError::NotReady)?;
        let command = self.stage_command(&backend, file, stage)?;
        let working_dir = file.parent().filter(|dir| dir.is_dir());
        let process = spawn_streaming(&command, working_dir)?;

        let mut running = self.running.lock().await;
        running.retain(|_, watch| !watch.has_exited());
        running.insert(process.pid, process.exited);
        *self.last_pid.lock().await = Some(process.pid);

        debug!(pid = process.pid, stage = %stage.name, "Stage process started");
        Ok(StageRun {
            job: JobRef::Process { pid: process.pid },
            events: process.events,
        })
    }
}
