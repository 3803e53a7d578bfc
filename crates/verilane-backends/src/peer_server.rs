//! Peer-server strategy: one long-lived server, one light client per stage

use crate::command::{CommandContext, CommandLine};
use crate::config::{BackendConfig, EngineKind, ManagerSettings, StageConfig};
use crate::detection::ensure_runtime;
use crate::error::BackendError;
use crate::process::{
    discover_server_pid, kill_process_tree, spawn_streaming, ExitWatch, StageEvent,
};
use crate::readiness::Readiness;
use crate::service::{BackendService, JobRef, StageRun};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Something that can tell whether the server answers
#[async_trait]
pub trait LivenessProbe: Send + Sync {
    async fn probe(&self) -> bool;
}

/// Probe by running a client command whose output contains `marker` once
/// the server is up
pub struct CommandProbe {
    pub command: CommandLine,
    pub marker: String,
    pub timeout: Duration,
}

#[async_trait]
impl LivenessProbe for CommandProbe {
    async fn probe(&self) -> bool {
        let mut cmd = self.command.to_command();
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        match tokio::time::timeout(self.timeout, cmd.output()).await {
            Ok(Ok(output)) => {
                let stdout = String::from_utf8_lossy(&output.stdout);
                let stderr = String::from_utf8_lossy(&output.stderr);
                stdout.contains(&self.marker) || stderr.contains(&self.marker)
            }
            Ok(Err(e)) => {
                debug!("Liveness probe could not run: {}", e);
                false
            }
            Err(_) => false,
        }
    }
}

/// Probe until the server answers, sleeping `interval` between attempts.
///
/// Returns the number of the successful attempt, or
/// [`BackendError::ProbeExhausted`] after `max_attempts` failures.
pub async fn wait_until_alive(
    probe: &dyn LivenessProbe,
    interval: Duration,
    max_attempts: u32,
) -> Result<u32, BackendError> {
    for attempt in 1..=max_attempts {
        if probe.probe().await {
            debug!(attempt, "Server answered liveness probe");
            return Ok(attempt);
        }
        if attempt < max_attempts {
            tokio::time::sleep(interval).await;
        }
    }
    Err(BackendError::ProbeExhausted {
        attempts: max_attempts,
    })
}

struct ServerHandle {
    launched_pid: u32,
    exited: ExitWatch,
}

/// Keeps one server process and reaches it through client invocations
pub struct PeerServerService {
    settings: Arc<ManagerSettings>,
    readiness: Arc<Readiness>,
    backend: Mutex<Option<BackendConfig>>,
    server: Arc<Mutex<Option<ServerHandle>>>,
    server_pid: Arc<AtomicU32>,
    clients: Mutex<HashMap<u32, ExitWatch>>,
    last_client: Mutex<Option<u32>>,
}

impl PeerServerService {
    pub fn new(settings: Arc<ManagerSettings>) -> Self {
        Self {
            settings,
            readiness: Readiness::new(),
            backend: Mutex::new(None),
            server: Arc::new(Mutex::new(None)),
            server_pid: Arc::new(AtomicU32::new(0)),
            clients: Mutex::new(HashMap::new()),
            last_client: Mutex::new(None),
        }
    }

    fn context(&self, backend: &BackendConfig) -> CommandContext {
        CommandContext::new(&self.settings.tools, &backend.paths)
            .with_port(self.settings.peer_server.port)
            .with_caching_disabled(self.settings.disable_caching)
    }

    fn client_command(&self, ctx: &CommandContext) -> Result<CommandLine, BackendError> {
        CommandLine::from_args(ctx.expand_arguments(&self.settings.peer_server.client_template))
            .ok_or_else(|| BackendError::Configuration("empty peer-server client command".to_string()))
    }

    /// Client command running `stage` on `file`
    pub fn stage_command(
        &self,
        backend: &BackendConfig,
        file: &Path,
        stage: &StageConfig,
    ) -> Result<CommandLine, BackendError> {
        let ctx = self
            .context(backend)
            .with_main_method(&stage.main_method)
            .with_file(file);
        let mut command = self.client_command(&ctx)?;
        if !stage.main_method.is_empty() {
            command = command.arg(stage.main_method.clone());
        }
        Ok(command.args(ctx.expand_arguments(&stage.custom_arguments)))
    }

    async fn request_shutdown(&self, backend: &BackendConfig) -> bool {
        let Ok(command) = self.client_command(&self.context(backend)) else {
            return false;
        };
        let command = command.arg(self.settings.peer_server.shutdown_argument.clone());
        let mut cmd = command.to_command();
        cmd.stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        match tokio::time::timeout(backend.stopping_timeout(), cmd.status()).await {
            Ok(Ok(status)) => status.success(),
            _ => false,
        }
    }

    async fn kill_server(&self) {
        let handle = self.server.lock().await.take();
        let pid = self.server_pid.swap(0, Ordering::SeqCst);
        if let Some(mut handle) = handle {
            if !handle.exited.has_exited() {
                for target in [pid, handle.launched_pid] {
                    if target != 0 {
                        if let Err(e) = kill_process_tree(target).await {
                            warn!(pid = target, "Failed to kill server: {}", e);
                        }
                    }
                }
                handle.exited.wait(Duration::from_secs(5)).await;
            }
        }
    }

    async fn start_server(&self, backend: &BackendConfig, attempt: u64) -> Result<(), BackendError> {
        ensure_runtime(&self.settings, &self.settings.peer_server.server_template).await?;

        // a server from an earlier session may still hold the port
        if self.request_shutdown(backend).await {
            debug!("Stopped stale peer server");
        }

        let ctx = self.context(backend);
        let command =
            CommandLine::from_args(ctx.expand_arguments(&self.settings.peer_server.server_template))
                .ok_or_else(|| BackendError::Configuration("empty peer-server command".to_string()))?;
        let mut process = spawn_streaming(&command, None)?;
        let launched_pid = process.pid;

        tokio::spawn(async move {
            while let Some(event) = process.events.recv().await {
                match event {
                    StageEvent::Stdout(text) | StageEvent::Stderr(text) => {
                        debug!(pid = launched_pid, "server: {}", text.trim_end());
                    }
                    StageEvent::Exited(code) => {
                        info!(pid = launched_pid, ?code, "Peer server exited");
                    }
                    StageEvent::Failed(_) => {}
                }
            }
        });

        let server_pid = discover_server_pid(launched_pid).await;
        self.server_pid.store(server_pid, Ordering::SeqCst);
        *self.server.lock().await = Some(ServerHandle {
            launched_pid,
            exited: process.exited,
        });

        let server = Arc::clone(&self.server);
        let pid_slot = Arc::clone(&self.server_pid);
        let timeout = self.readiness.arm_timeout(attempt, self.settings.start_timeout(), move || {
            tokio::spawn(async move {
                if server.lock().await.take().is_some() {
                    let pid = pid_slot.swap(0, Ordering::SeqCst);
                    for target in [pid, launched_pid] {
                        if target != 0 {
                            let _ = kill_process_tree(target).await;
                        }
                    }
                }
            });
        });

        let probe = CommandProbe {
            command: self
                .client_command(&ctx)?
                .arg(self.settings.peer_server.probe_target.clone()),
            marker: self.settings.peer_server.probe_marker.clone(),
            timeout: Duration::from_secs(5),
        };
        let result = wait_until_alive(
            &probe,
            self.settings.peer_server.probe_interval(),
            self.settings.peer_server.probe_attempts,
        )
        .await;
        if result.is_err() {
            timeout.abort();
        }
        result.map(|attempts| {
            info!(server_pid, attempts, "Peer server is up");
        })
    }
}

#[async_trait]
impl BackendService for PeerServerService {
    fn engine(&self) -> EngineKind {
        EngineKind::PeerServer
    }

    fn is_ready(&self) -> bool {
        self.readiness.is_ready()
    }

    async fn start(&self, backend: &BackendConfig) -> Result<(), BackendError> {
        if self.readiness.is_ready() && self.backend.lock().await.as_ref() == Some(backend) {
            return Ok(());
        }
        backend.validate()?;
        if self.readiness.is_ready() {
            self.stop().await?;
        }
        let attempt = self.readiness.begin_attempt()?;
        *self.backend.lock().await = Some(backend.clone());

        match self.start_server(backend, attempt).await {
            Ok(()) if self.readiness.set_ready(attempt) => Ok(()),
            Ok(()) => Err(BackendError::Timeout(self.settings.start_timeout())),
            Err(e) => {
                warn!("Peer server start failed: {}", e);
                self.readiness.set_failed(attempt);
                self.kill_server().await;
                Err(e)
            }
        }
    }

    async fn stop(&self) -> Result<(), BackendError> {
        let backend = self.backend.lock().await.clone();
        self.readiness.set_stopped();
        let Some(backend) = backend else {
            return Ok(());
        };

        let grace = backend.stopping_timeout();
        let asked = self.request_shutdown(&backend).await;
        let exited = match self.server.lock().await.as_mut() {
            Some(handle) => asked && handle.exited.wait(grace).await,
            None => true,
        };
        if exited {
            self.server.lock().await.take();
            self.server_pid.store(0, Ordering::SeqCst);
            info!("Peer server stopped");
        } else {
            warn!("Peer server ignored shutdown request, killing it");
            self.kill_server().await;
        }
        Ok(())
    }

    async fn stop_verification(&self, job: Option<JobRef>) -> Result<(), BackendError> {
        let pid = match job {
            Some(JobRef::Process { pid }) => Some(pid),
            Some(JobRef::Job { .. }) => None,
            None => *self.last_client.lock().await,
        };
        let Some(pid) = pid else {
            return Ok(());
        };
        if pid == self.server_pid.load(Ordering::SeqCst) {
            warn!(pid, "Refusing to stop the peer server as a verification");
            return Ok(());
        }

        let Some(mut watch) = self.clients.lock().await.remove(&pid) else {
            return Ok(());
        };
        if watch.has_exited() {
            return Ok(());
        }
        info!(pid, "Stopping verification client");
        kill_process_tree(pid).await?;
        let grace = self
            .backend
            .lock()
            .await
            .as_ref()
            .map(BackendConfig::stopping_timeout)
            .unwrap_or_else(|| Duration::from_secs(5));
        if !watch.wait(grace).await {
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
        let process = spawn_streaming(&command, file.parent().filter(|dir| dir.is_dir()))?;

        let mut clients = self.clients.lock().await;
        clients.retain(|_, watch| !watch.has_exited());
        clients.insert(process.pid, process.exited);
        *self.last_client.lock().await = Some(process.pid);

        Ok(StageRun {
            job: JobRef::Process { pid: process.pid },
            events: process.events,
        })
    }

    fn server_pid(&self) -> Option<u32> {
        match self.server_pid.load(Ordering::SeqCst) {
            0 => None,
            pid => Some(pid),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct CountingProbe {
        calls: AtomicUsize,
        succeed_on: Option<usize>,
    }

    #[async_trait]
    impl LivenessProbe for CountingProbe {
        async fn probe(&self) -> bool {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            self.succeed_on == Some(call)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_exhaustion_after_twenty_attempts() {
        let probe = CountingProbe {
            calls: AtomicUsize::new(0),
            succeed_on: None,
        };
        let started = tokio::time::Instant::now();
        let result = wait_until_alive(&probe, Duration::from_millis(200), 20).await;

        assert!(matches!(
            result,
            Err(BackendError::ProbeExhausted { attempts: 20 })
        ));
        assert_eq!(probe.calls.load(Ordering::SeqCst), 20);
        assert_eq!(started.elapsed(), Duration::from_millis(19 * 200));
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_success_stops_early() {
        let probe = CountingProbe {
            calls: AtomicUsize::new(0),
            succeed_on: Some(3),
        };
        let result = wait_until_alive(&probe, Duration::from_millis(200), 20).await;
        assert_eq!(result.unwrap(), 3);
        assert_eq!(probe.calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_stage_command_uses_client_prefix() {
        let mut settings = ManagerSettings::default();
        settings.peer_server.port = 9000;
        let service = PeerServerService::new(Arc::new(settings));
        let backend = BackendConfig {
            name: "silicon".to_string(),
            backend_type: "silicon".to_string(),
            engine: EngineKind::PeerServer,
            stages: vec![StageConfig {
                name: "verify".to_string(),
                is_verification: true,
                main_method: "viper.silicon.SiliconRunner".to_string(),
                custom_arguments: "$disableCaching$ $fileToVerify$".to_string(),
                ..Default::default()
            }],
            paths: Vec::new(),
            timeout_ms: None,
            stopping_timeout_ms: None,
            helper_chain: Vec::new(),
        };
        let cmd = service
            .stage_command(&backend, Path::new("/w/a.vpr"), &backend.stages[0])
            .unwrap();
        assert_eq!(cmd.program, "ng");
        assert_eq!(
            cmd.args,
            vec!["--nailgun-port", "9000", "viper.silicon.SiliconRunner", "/w/a.vpr"]
        );
    }
}
