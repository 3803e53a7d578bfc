//! HTTP-server strategy: one long-lived server, jobs posted over HTTP and
//! results pulled as a stream of JSON messages

use crate::command::{quote_argument, CommandContext, CommandLine};
use crate::config::{BackendConfig, EngineKind, HttpServerPolicy, ManagerSettings, StageConfig};
use crate::detection::ensure_runtime;
use crate::error::BackendError;
use crate::process::{
    discover_server_pid, find_child_chain, kill_all, kill_process_tree, spawn_streaming,
    ExitWatch, StageEvent, Utf8Chunker,
};
use crate::readiness::Readiness;
use crate::service::{BackendService, JobRef, StageRun};
use async_trait::async_trait;
use futures_util::StreamExt;
use regex::Regex;
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Extract the base URL from the server's "online at" announcement
pub fn parse_ready_line(line: &str) -> Option<String> {
    static READY: OnceLock<Option<Regex>> = OnceLock::new();
    let re = READY
        .get_or_init(|| Regex::new(r"online at ([/a-zA-Z0-9:.\-_]+):(\d+)").ok())
        .as_ref()?;
    let caps = re.captures(line)?;
    let host = &caps[1];
    let port = &caps[2];
    if host.contains("://") {
        Some(format!("{host}:{port}"))
    } else {
        Some(format!("http://{host}:{port}"))
    }
}

/// Helper processes a backend leaves below the server after a job
pub fn default_helper_chain(backend: &BackendConfig) -> Vec<String> {
    if !backend.helper_chain.is_empty() {
        return backend.helper_chain.clone();
    }
    if !backend.is_carbon() {
        return Vec::new();
    }
    let chain: &[&str] = if cfg!(windows) {
        &["Boogie.exe", "z3.exe"]
    } else if cfg!(target_os = "macos") {
        &["sh", "mono"]
    } else {
        &["Boogie"]
    };
    chain.iter().map(|name| name.to_string()).collect()
}

#[derive(Debug, Deserialize)]
struct JobResponse {
    id: Option<u64>,
    msg: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MessageResponse {
    msg: Option<String>,
}

struct OwnedServer {
    launched_pid: u32,
    exited: ExitWatch,
}

#[derive(Default)]
struct HttpState {
    base_url: Option<String>,
    backend: Option<BackendConfig>,
    server: Option<OwnedServer>,
    pulls: HashMap<u64, JoinHandle<()>>,
    last_job: Option<u64>,
}

/// Talks to a verification server over HTTP
pub struct HttpServerService {
    settings: Arc<ManagerSettings>,
    readiness: Arc<Readiness>,
    client: reqwest::Client,
    state: Mutex<HttpState>,
    server_pid: AtomicU32,
}

impl HttpServerService {
    pub fn new(settings: Arc<ManagerSettings>) -> Self {
        Self {
            settings,
            readiness: Readiness::new(),
            client: reqwest::Client::new(),
            state: Mutex::new(HttpState::default()),
            server_pid: AtomicU32::new(0),
        }
    }

    async fn base_url(&self) -> Result<String, BackendError> {
        if !self.readiness.is_ready() {
            return Err(BackendError::NotReady);
        }
        self.state.lock().await.base_url.clone().ok_or(BackendError::NotReady)
    }

    /// Argument line posted for `stage` on `file`
    pub fn job_argument(&self, backend: &BackendConfig, file: &Path, stage: &StageConfig) -> String {
        let ctx = CommandContext::new(&self.settings.tools, &backend.paths)
            .with_main_method(&stage.main_method)
            .with_file(file)
            .with_caching_disabled(self.settings.disable_caching);
        let mut parts = vec![backend.backend_type.clone()];
        parts.extend(
            ctx.expand_arguments(&stage.custom_arguments)
                .iter()
                .map(|arg| quote_argument(arg)),
        );
        parts.join(" ")
    }

    async fn launch(&self, command_template: &str, backend: &BackendConfig, attempt: u64) -> Result<String, BackendError> {
        ensure_runtime(&self.settings, command_template).await?;
        let ctx = CommandContext::new(&self.settings.tools, &backend.paths);
        let command = CommandLine::from_args(ctx.expand_arguments(command_template))
            .ok_or_else(|| BackendError::Configuration("empty HTTP server command".to_string()))?;
        let mut process = spawn_streaming(&command, None)?;
        let launched_pid = process.pid;
        self.state.lock().await.server = Some(OwnedServer {
            launched_pid,
            exited: process.exited.clone(),
        });

        let limit = self.settings.start_timeout();
        let readiness = Arc::clone(&self.readiness);
        let timeout = readiness.arm_timeout(attempt, limit, move || {
            warn!(pid = launched_pid, "HTTP server did not announce itself in time");
        });

        let announced = tokio::time::timeout(limit, async {
            let mut pending = String::new();
            while let Some(event) = process.events.recv().await {
                match event {
                    StageEvent::Stdout(text) => {
                        pending.push_str(&text);
                        while let Some(newline) = pending.find('\n') {
                            let line: String = pending.drain(..=newline).collect();
                            debug!(pid = launched_pid, "server: {}", line.trim_end());
                            if let Some(url) = parse_ready_line(&line) {
                                return Some(url);
                            }
                        }
                        if let Some(url) = parse_ready_line(&pending) {
                            return Some(url);
                        }
                    }
                    StageEvent::Stderr(text) => {
                        debug!(pid = launched_pid, "server stderr: {}", text.trim_end());
                    }
                    StageEvent::Exited(code) => {
                        warn!(pid = launched_pid, ?code, "HTTP server exited during startup");
                        return None;
                    }
                    StageEvent::Failed(_) => {}
                }
            }
            None
        })
        .await;
        timeout.abort();

        let url = match announced {
            Ok(Some(url)) => url,
            Ok(None) => {
                return Err(BackendError::Startup(
                    "HTTP server exited before announcing its address".to_string(),
                ))
            }
            Err(_) => return Err(BackendError::Timeout(limit)),
        };

        // keep draining so the server never blocks on a full pipe
        tokio::spawn(async move {
            while let Some(event) = process.events.recv().await {
                match event {
                    StageEvent::Stdout(text) | StageEvent::Stderr(text) => {
                        debug!(pid = launched_pid, "server: {}", text.trim_end());
                    }
                    StageEvent::Exited(code) => {
                        info!(pid = launched_pid, ?code, "HTTP server exited");
                    }
                    StageEvent::Failed(_) => {}
                }
            }
        });

        let pid = discover_server_pid(launched_pid).await;
        self.server_pid.store(pid, Ordering::SeqCst);
        Ok(url)
    }

    async fn kill_owned_server(&self) {
        let server = self.state.lock().await.server.take();
        let pid = self.server_pid.swap(0, Ordering::SeqCst);
        if let Some(mut server) = server {
            if server.exited.has_exited() {
                return;
            }
            for target in [pid, server.launched_pid] {
                if target != 0 {
                    if let Err(e) = kill_process_tree(target).await {
                        warn!(pid = target, "Failed to kill HTTP server: {}", e);
                    }
                }
            }
            server.exited.wait(Duration::from_secs(5)).await;
        }
    }

    fn spawn_pull(&self, url: String, id: u64, tx: mpsc::Sender<StageEvent>) -> JoinHandle<()> {
        let client = self.client.clone();
        tokio::spawn(async move {
            let response = match client.get(&url).send().await.and_then(|r| r.error_for_status()) {
                Ok(response) => response,
                Err(e) => {
                    let _ = tx.send(StageEvent::Failed(e.to_string())).await;
                    let _ = tx.send(StageEvent::Exited(None)).await;
                    return;
                }
            };
            let mut stream = response.bytes_stream();
            let mut chunker = Utf8Chunker::default();
            while let Some(chunk) = stream.next().await {
                match chunk {
                    Ok(bytes) => {
                        let text = chunker.push(&bytes);
                        if !text.is_empty() {
                            let _ = tx.send(StageEvent::Stdout(text)).await;
                        }
                    }
                    Err(e) => {
                        warn!(job = id, "Result stream broke: {}", e);
                        let _ = tx.send(StageEvent::Failed(e.to_string())).await;
                        let _ = tx.send(StageEvent::Exited(None)).await;
                        return;
                    }
                }
            }
            let rest = chunker.finish();
            if !rest.is_empty() {
                let _ = tx.send(StageEvent::Stdout(rest)).await;
            }
            debug!(job = id, "Result stream finished");
            let _ = tx.send(StageEvent::Exited(Some(0))).await;
        })
    }
}

#[async_trait]
impl BackendService for HttpServerService {
    fn engine(&self) -> EngineKind {
        EngineKind::HttpServer
    }

    fn is_ready(&self) -> bool {
        self.readiness.is_ready()
    }

    async fn start(&self, backend: &BackendConfig) -> Result<(), BackendError> {
        if self.readiness.is_ready() {
            // one server serves every backend; only the job argument changes
            backend.validate()?;
            self.state.lock().await.backend = Some(backend.clone());
            return Ok(());
        }
        backend.validate()?;
        let attempt = self.readiness.begin_attempt()?;

        let url = match &self.settings.http_server.policy {
            HttpServerPolicy::Attach { address } => Ok(address.trim_end_matches('/').to_string()),
            HttpServerPolicy::Create { command_template } => {
                self.launch(command_template, backend, attempt).await
            }
        };
        match url {
            Ok(url) => {
                {
                    let mut state = self.state.lock().await;
                    state.base_url = Some(url.clone());
                    state.backend = Some(backend.clone());
                }
                if !self.readiness.set_ready(attempt) {
                    return Err(BackendError::Timeout(self.settings.start_timeout()));
                }
                info!(%url, "HTTP verification server ready");
                Ok(())
            }
            Err(e) => {
                self.readiness.set_failed(attempt);
                self.kill_owned_server().await;
                Err(e)
            }
        }
    }

    async fn stop(&self) -> Result<(), BackendError> {
        let (url, owns_server, grace) = {
            let state = self.state.lock().await;
            let grace = state
                .backend
                .as_ref()
                .map(BackendConfig::stopping_timeout)
                .unwrap_or_else(|| Duration::from_secs(5));
            (state.base_url.clone(), state.server.is_some(), grace)
        };
        self.readiness.set_stopped();

        if owns_server {
            if let Some(url) = &url {
                let request = self.client.get(format!("{url}/exit")).timeout(grace).send();
                match request.await {
                    Ok(response) => {
                        let body: Option<MessageResponse> = response.json().await.ok();
                        debug!(msg = ?body.and_then(|b| b.msg), "Exit request answered");
                    }
                    Err(e) => debug!("Exit request failed: {}", e),
                }
            }
            let exited = self
                .state
                .lock()
                .await
                .server
                .as_ref()
                .map(|server| server.exited.clone());
            if let Some(mut exited) = exited {
                if exited.wait(grace).await {
                    self.state.lock().await.server.take();
                    self.server_pid.store(0, Ordering::SeqCst);
                } else {
                    warn!("HTTP server ignored exit request, killing it");
                    self.kill_owned_server().await;
                }
            }
        }

        let mut state = self.state.lock().await;
        for (_, pull) in state.pulls.drain() {
            pull.abort();
        }
        state.base_url = None;
        Ok(())
    }

    async fn stop_verification(&self, job: Option<JobRef>) -> Result<(), BackendError> {
        let id = match job {
            Some(JobRef::Job { id }) => Some(id),
            Some(JobRef::Process { .. }) => None,
            None => self.state.lock().await.last_job,
        };
        let Some(id) = id else {
            return Ok(());
        };
        let url = self.base_url().await?;
        let backend = self.state.lock().await.backend.clone();

        // helpers are found before the discard since killing the job reparents them
        let server_pid = self.server_pid.load(Ordering::SeqCst);
        let helpers = match &backend {
            Some(backend) if server_pid != 0 => {
                find_child_chain(server_pid, &default_helper_chain(backend)).await
            }
            _ => Vec::new(),
        };

        info!(job = id, "Discarding verification job");
        let discarded = match self.client.get(format!("{url}/discard/{id}")).send().await {
            Ok(response) => {
                let status = response.status();
                let body: Option<MessageResponse> = response.json().await.ok();
                if !status.is_success() {
                    warn!(job = id, %status, "Discard was rejected");
                } else {
                    debug!(job = id, msg = ?body.and_then(|b| b.msg), "Job discarded");
                }
                Ok(())
            }
            Err(e) => {
                warn!(job = id, "Discard request failed: {}", e);
                Err(BackendError::from(e))
            }
        };

        if !helpers.is_empty() {
            debug!(?helpers, "Killing leftover helper processes");
            kill_all(&helpers).await;
        }

        let pull = self.state.lock().await.pulls.remove(&id);
        if let Some(mut pull) = pull {
            let grace = backend
                .as_ref()
                .map(BackendConfig::stopping_timeout)
                .unwrap_or_else(|| Duration::from_secs(5));
            if tokio::time::timeout(grace, &mut pull).await.is_err() {
                pull.abort();
            }
        }
        discarded
    }

    async fn start_stage_process(
        &self,
        file: &Path,
        stage: &StageConfig,
    ) -> Result<StageRun, BackendError> {
        let url = self.base_url().await?;
        let backend = self
            .state
            .lock()
            .await
            .backend
            .clone()
            .ok_or(BackendError::NotReady)?;

        let arg = self.job_argument(&backend, file, stage);
        debug!(%arg, "Posting verification job");
        let response = self
            .client
            .post(format!("{url}/verify"))
            .json(&json!({ "arg": arg }))
            .send()
            .await?;
        let job: JobResponse = response.json().await?;
        let id = match (job.id, job.msg) {
            (Some(id), _) => id,
            (None, Some(msg)) => return Err(BackendError::Communication(msg)),
            (None, None) => {
                return Err(BackendError::Communication(
                    "server answered without a job id".to_string(),
                ))
            }
        };

        let (tx, rx) = mpsc::channel(256);
        let pull = self.spawn_pull(format!("{url}/verify/{id}"), id, tx);
        let mut state = self.state.lock().await;
        state.pulls.retain(|_, handle| !handle.is_finished());
        state.pulls.insert(id, pull);
        state.last_job = Some(id);

        Ok(StageRun {
            job: JobRef::Job { id },
            events: rx,
        })
    }

    async fn flush_cache(&self, file: Option<&Path>) -> Result<String, BackendError> {
        let url = self.base_url().await?;
        let backend = self.state.lock().await.backend.clone();
        let request = match (file, backend) {
            (Some(file), Some(backend)) => self.client.post(format!("{url}/cache/flush")).json(&json!({
                "backend": backend.backend_type,
                "file": file.to_string_lossy(),
            })),
            _ => self.client.get(format!("{url}/cache/flush")),
        };
        let response = request.send().await?.error_for_status()?;
        let body: MessageResponse = response.json().await?;
        let msg = body.msg.unwrap_or_else(|| "cache flushed".to_string());
        info!(%msg, "Cache flush answered");
        Ok(msg)
    }

    fn server_pid(&self) -> Option<u32> {
        match self.server_pid.load(Ordering::SeqCst) {
            0 => None,
            pid => Some(pid),
        }
    }
}
