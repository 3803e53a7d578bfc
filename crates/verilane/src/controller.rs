//! The controller facade the UI layer talks to

use crate::context::BackendContext;
use crate::error::SessionError;
use crate::notify::{Notification, Notifier};
use crate::outcome::Outcome;
use crate::pipeline::{self, RunRequest};
use crate::session::{path_of, VerificationSession};
use crate::settings::SessionSettings;
use crate::state::{StateChange, VerificationState};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};
use verilane_backends::{BackendConfig, BackendError, BoxedBackendService};
use verilane_trace::{HeapGraph, Move, Navigator, StepType};

type SharedSession = Arc<Mutex<VerificationSession>>;

/// Owns the sessions of all open files and the selected backend
pub struct Controller {
    settings: Arc<SessionSettings>,
    notifier: Notifier,
    sessions: Mutex<HashMap<String, SharedSession>>,
    context: Mutex<Option<BackendContext>>,
}

impl Controller {
    /// Create a controller and the receiver of its notifications
    pub fn new(settings: SessionSettings) -> (Self, mpsc::UnboundedReceiver<Notification>) {
        let (notifier, rx) = Notifier::channel();
        let controller = Self {
            settings: Arc::new(settings),
            notifier,
            sessions: Mutex::new(HashMap::new()),
            context: Mutex::new(None),
        };
        (controller, rx)
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    /// Start tracking `file`. Opening an open file is a no-op.
    pub async fn open(&self, file: &str) {
        self.session_or_open(file).await;
    }

    /// Stop any verification of `file` and forget its session
    pub async fn close(&self, file: &str) -> Result<(), SessionError> {
        let session = self.session(file).await?;
        self.abort(&session).await;
        self.sessions.lock().await.remove(file);
        debug!(file, "Closed session");
        Ok(())
    }

    async fn session(&self, file: &str) -> Result<SharedSession, SessionError> {
        self.sessions
            .lock()
            .await
            .get(file)
            .cloned()
            .ok_or_else(|| SessionError::UnknownSession(file.to_string()))
    }

    async fn session_or_open(&self, file: &str) -> SharedSession {
        let mut sessions = self.sessions.lock().await;
        Arc::clone(
            sessions
                .entry(file.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(VerificationSession::new(file)))),
        )
    }

    async fn ready_context(&self) -> Result<BackendContext, SessionError> {
        let context = self
            .context
            .lock()
            .await
            .clone()
            .ok_or(SessionError::NoBackend)?;
        if !context.service.is_ready() {
            return Err(BackendError::NotReady.into());
        }
        Ok(context)
    }

    /// Verify `file` with the selected backend.
    ///
    /// Returns `false` when an automatic verification is refused because
    /// the previous one ended in an error.
    pub async fn verify(&self, file: &str, manually_triggered: bool) -> Result<bool, SessionError> {
        let context = match self.ready_context().await {
            Ok(context) => context,
            Err(e) => {
                if let Some(hint) = e.hint() {
                    self.notifier.hint(hint);
                }
                return Err(e);
            }
        };
        let session = self.session_or_open(file).await;

        if !manually_triggered && session.lock().await.last_outcome == Some(Outcome::Error) {
            info!(file, "Not verifying automatically after a failed verification");
            self.notifier.send(Notification::VerificationNotStarted {
                file: file.to_string(),
            });
            return Ok(false);
        }

        self.stop_all_verifications().await;

        let mut guard = session.lock().await;
        let attempt = guard.begin_run(manually_triggered);
        info!(file, attempt, backend = context.name(), "Starting verification");
        let request = RunRequest {
            attempt,
            context,
            settings: Arc::clone(&self.settings),
            session: Arc::clone(&session),
            notifier: self.notifier.clone(),
        };
        guard.task = Some(tokio::spawn(pipeline::run(request)));
        Ok(true)
    }

    /// Abort the verification of `file`. Returns `false` when none runs.
    pub async fn stop_verification(&self, file: &str) -> Result<bool, SessionError> {
        let session = self.session(file).await?;
        Ok(self.abort(&session).await)
    }

    async fn stop_all_verifications(&self) {
        let sessions: Vec<SharedSession> = self.sessions.lock().await.values().cloned().collect();
        for session in sessions {
            self.abort(&session).await;
        }
    }

    /// Cooperative abort: flag first, then wait for the backend to confirm
    async fn abort(&self, session: &SharedSession) -> bool {
        let (file, job, task) = {
            let mut session = session.lock().await;
            if !session.running {
                return false;
            }
            session.aborting = true;
            (session.file.clone(), session.job.take(), session.task.take())
        };
        info!(file = %file, ?job, "Aborting verification");

        let context = self.context.lock().await.clone();
        if let Some(context) = context {
            if let Err(e) = context.service.stop_verification(job).await {
                warn!(file = %file, "Stopping verification failed: {}", e);
            }
        }
        // without a recorded job the stage may still be spawning; the run
        // stops that job itself once it sees the abort
        if let Some(task) = task.filter(|_| job.is_some()) {
            task.abort();
        }

        let mut session = session.lock().await;
        session.running = false;
        session.last_outcome = Some(Outcome::Aborted);
        let change = session.enter(VerificationState::Ready).finished(
            Outcome::Aborted,
            session.diagnostics.len(),
            session.elapsed,
            false,
            session.manually_triggered,
        );
        self.notifier.state(change);
        true
    }

    /// Select the backend named `name` and start it
    pub async fn select_backend(&self, name: &str) -> Result<(), SessionError> {
        let backend = self
            .settings
            .backend(name)
            .cloned()
            .ok_or_else(|| SessionError::UnknownBackend(name.to_string()))?;
        backend.validate()?;
        let context = BackendContext::for_backend(backend, Arc::new(self.settings.manager.clone()));
        self.start_backend(context).await
    }

    /// Start a backend with an explicitly constructed service
    pub async fn select_backend_with(
        &self,
        backend: BackendConfig,
        service: BoxedBackendService,
    ) -> Result<(), SessionError> {
        backend.validate()?;
        self.start_backend(BackendContext::new(backend, service)).await
    }

    async fn start_backend(&self, context: BackendContext) -> Result<(), SessionError> {
        self.stop_all_verifications().await;
        let previous = self.context.lock().await.take();
        if let Some(previous) = previous {
            let same_service = Arc::ptr_eq(&previous.service, &context.service);
            if !same_service {
                self.shutdown(&previous).await;
            }
        }

        info!(backend = context.name(), engine = %context.service.engine(), "Starting backend");
        self.notifier.state(StateChange::new(VerificationState::Starting));
        if let Err(e) = context.service.start(&context.backend).await {
            warn!(backend = context.name(), "Backend failed to start: {}", e);
            let e = SessionError::from(e);
            self.notifier.hint(e.hint().unwrap_or_else(|| e.to_string()));
            self.notifier.state(StateChange::new(VerificationState::Stopped));
            return Err(e);
        }

        self.notifier.send(Notification::BackendReady {
            name: context.backend.name.clone(),
            engine: context.service.engine(),
        });
        self.notifier.state(StateChange::new(VerificationState::Ready));
        *self.context.lock().await = Some(context);
        Ok(())
    }

    async fn shutdown(&self, context: &BackendContext) {
        self.notifier.state(StateChange::new(VerificationState::Stopping));
        if let Err(e) = context.service.stop().await {
            warn!(backend = context.name(), "Stopping backend failed: {}", e);
        }
    }

    /// Stop all verifications and the backend itself
    pub async fn stop_backend(&self) -> Result<(), SessionError> {
        self.stop_all_verifications().await;
        let context = self
            .context
            .lock()
            .await
            .take()
            .ok_or(SessionError::NoBackend)?;
        self.shutdown(&context).await;
        self.notifier.state(StateChange::new(VerificationState::Stopped));
        Ok(())
    }

    /// Drop the backend's cached results for `file`, or for all files
    pub async fn flush_cache(&self, file: Option<&str>) -> Result<String, SessionError> {
        let context = self.ready_context().await?;
        let path = file.map(path_of);
        let message = context.service.flush_cache(path.as_deref()).await?;
        info!(backend = context.name(), "Flushed cache: {}", message);
        Ok(message)
    }

    /// Step the debugger from `client_index` and publish the heap graph of
    /// the target
    pub async fn move_debugger(
        &self,
        file: &str,
        client_index: usize,
        step: StepType,
    ) -> Result<Move, SessionError> {
        let session = self.session(file).await?;
        let mut session = session.lock().await;
        let (target, graph, navigator) = {
            let trace = session.trace.as_ref().ok_or(SessionError::NoTrace)?;
            let navigator = if self.settings.advanced_navigation {
                Navigator::Advanced
            } else {
                session
                    .navigator
                    .clone()
                    .unwrap_or_else(|| Navigator::simple(trace, client_index))
            };
            let target = navigator
                .step(trace, client_index, step)
                .ok_or(SessionError::InvalidClientIndex(client_index))?;
            (target, trace.heap_graph(target.client_index), navigator)
        };
        if let Navigator::Simple { .. } = navigator {
            session.navigator = Some(navigator);
        }
        if let Some(graph) = graph {
            self.notifier.send(Notification::HeapGraph {
                file: file.to_string(),
                graph,
            });
        }
        Ok(target)
    }

    /// The execution path leading to `client_index`; simple-mode steps
    /// follow it from now on
    pub async fn execution_path(&self, file: &str, client_index: usize) -> Result<Vec<usize>, SessionError> {
        let session = self.session(file).await?;
        let mut session = session.lock().await;
        let navigator = {
            let trace = session.trace.as_ref().ok_or(SessionError::NoTrace)?;
            trace
                .server_index(client_index)
                .ok_or(SessionError::InvalidClientIndex(client_index))?;
            Navigator::simple(trace, client_index)
        };
        let path = match &navigator {
            Navigator::Simple { path } => path.clone(),
            Navigator::Advanced => Vec::new(),
        };
        session.navigator = Some(navigator);
        Ok(path)
    }

    /// Heap graph of the record at `client_index`, also published
    pub async fn heap_graph(&self, file: &str, client_index: usize) -> Result<HeapGraph, SessionError> {
        let session = self.session(file).await?;
        let session = session.lock().await;
        let graph = session
            .trace
            .as_ref()
            .ok_or(SessionError::NoTrace)?
            .heap_graph(client_index)
            .ok_or(SessionError::InvalidClientIndex(client_index))?;
        self.notifier.send(Notification::HeapGraph {
            file: file.to_string(),
            graph: graph.clone(),
        });
        Ok(graph)
    }

    pub async fn state(&self, file: &str) -> Option<VerificationState> {
        let session = self.session(file).await.ok()?;
        let state = session.lock().await.state;
        Some(state)
    }

    pub async fn last_outcome(&self, file: &str) -> Option<Outcome> {
        let session = self.session(file).await.ok()?;
        let outcome = session.lock().await.last_outcome;
        outcome
    }

    pub async fn is_running(&self, file: &str) -> bool {
        let Ok(session) = self.session(file).await else {
            return false;
        };
        let running = session.lock().await.running;
        running
    }
}
