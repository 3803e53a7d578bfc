//! Per-file verification session state

use crate::diagnostics::Diagnostic;
use crate::notify::{Notification, Notifier};
use crate::outcome::{Milestones, Outcome};
use crate::state::{StateChange, VerificationState};
use std::path::PathBuf;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};
use verilane_backends::JobRef;
use verilane_protocol::{
    classify_stderr, CounterexampleModel, Definition, OutlineMember, Progress, StderrClass,
    VerificationEvent,
};
use verilane_trace::{ExecutionTrace, Navigator};

/// Local path of a file identifier (`file://` URIs or plain paths)
pub fn path_of(file: &str) -> PathBuf {
    PathBuf::from(file.strip_prefix("file://").unwrap_or(file))
}

/// Everything the controller knows about one open file
#[derive(Debug)]
pub struct VerificationSession {
    pub file: String,
    pub path: PathBuf,
    pub state: VerificationState,
    pub running: bool,
    pub aborting: bool,
    pub manually_triggered: bool,
    /// Bumped on every verification start; pipeline tasks carrying an older
    /// attempt are stale
    pub attempt: u64,
    pub diagnostics: Vec<Diagnostic>,
    pub milestones: Milestones,
    pub progress: Progress,
    /// Time reported by the backend
    pub elapsed: Duration,
    pub model: CounterexampleModel,
    pub outline: Vec<OutlineMember>,
    pub definitions: Vec<Definition>,
    pub internal_errors: Vec<String>,
    pub last_outcome: Option<Outcome>,
    pub trace: Option<ExecutionTrace>,
    /// Simple-mode navigator for the execution path last requested
    pub navigator: Option<Navigator>,
    pub job: Option<JobRef>,
    pub task: Option<JoinHandle<()>>,
    usage_reported: bool,
}

impl VerificationSession {
    pub fn new(file: impl Into<String>) -> Self {
        let file = file.into();
        let path = path_of(&file);
        Self {
            file,
            path,
            state: VerificationState::Stopped,
            running: false,
            aborting: false,
            manually_triggered: false,
            attempt: 0,
            diagnostics: Vec::new(),
            milestones: Milestones::default(),
            progress: Progress::default(),
            elapsed: Duration::ZERO,
            model: CounterexampleModel::new(),
            outline: Vec::new(),
            definitions: Vec::new(),
            internal_errors: Vec::new(),
            last_outcome: None,
            trace: None,
            navigator: None,
            job: None,
            task: None,
            usage_reported: false,
        }
    }

    /// Prepare a new run and return its attempt number
    pub fn begin_run(&mut self, manually_triggered: bool) -> u64 {
        self.attempt += 1;
        self.running = true;
        self.aborting = false;
        self.manually_triggered = manually_triggered;
        self.internal_errors.clear();
        self.trace = None;
        self.navigator = None;
        self.job = None;
        self.usage_reported = false;
        self.reset_stage_results();
        self.attempt
    }

    /// Forget what the previous verification stage reported
    pub fn reset_stage_results(&mut self) {
        self.diagnostics.clear();
        self.milestones = Milestones::default();
        self.progress = Progress::default();
        self.elapsed = Duration::ZERO;
        self.model.clear();
        self.outline.clear();
        self.definitions.clear();
    }

    /// Whether a pipeline task of `attempt` may still act on the session
    pub fn is_current(&self, attempt: u64) -> bool {
        self.attempt == attempt && self.running && !self.aborting
    }

    /// Set the state and build the matching notification payload
    pub fn enter(&mut self, state: VerificationState) -> StateChange {
        self.state = state;
        StateChange::new(state).file(&self.file)
    }

    /// Apply one decoded event of a verification stage
    pub fn apply_event(&mut self, event: VerificationEvent, notifier: &Notifier) {
        match event {
            VerificationEvent::Start { backend_type } => {
                debug!(file = %self.file, "Backend {} started verifying", backend_type);
                notifier.state(self.enter(VerificationState::VerificationRunning).progress(0.0));
            }
            VerificationEvent::VerificationStart {
                predicates,
                methods,
                functions,
            } => {
                self.progress = Progress::new(predicates, methods, functions);
                notifier.state(
                    self.enter(VerificationState::VerificationRunning)
                        .progress(self.progress.percent()),
                );
            }
            VerificationEvent::EntityVerified { kind, name } => {
                self.progress.record(kind);
                trace!(file = %self.file, ?kind, "Verified {}", name);
                notifier.state(
                    self.enter(VerificationState::VerificationRunning)
                        .progress(self.progress.percent()),
                );
            }
            VerificationEvent::Error { errors } => {
                for report in &errors {
                    self.milestones.observe(report);
                    self.diagnostics.push(Diagnostic::from(report));
                }
                self.publish_diagnostics(notifier);
            }
            VerificationEvent::End { elapsed } => {
                self.elapsed = elapsed;
                notifier.state(
                    self.enter(VerificationState::VerificationReporting)
                        .progress(100.0),
                );
            }
            VerificationEvent::Stopped => {
                info!(file = %self.file, "Backend stopped the verification");
            }
            VerificationEvent::Outline { members } => self.outline = members,
            VerificationEvent::Definitions { definitions } => self.definitions = definitions,
            VerificationEvent::Model { line } => self.model.extend(&line),
            VerificationEvent::UsageHelp => {
                if !self.usage_reported {
                    self.usage_reported = true;
                    notifier.hint(
                        "The backend printed its usage instead of verifying, check the stage arguments",
                    );
                }
            }
            VerificationEvent::Unhandled { msg_type, body } => {
                notifier.send(Notification::Unhandled {
                    file: self.file.clone(),
                    msg_type,
                    body,
                });
            }
        }
    }

    /// Handle one stderr line of a stage
    pub fn apply_stderr(&mut self, line: &str, notifier: &Notifier) {
        match classify_stderr(line) {
            StderrClass::StackTrace => trace!(file = %self.file, "{}", line.trim()),
            StderrClass::Hint(message) => {
                warn!(file = %self.file, "{}", message);
                notifier.hint(message);
            }
            StderrClass::InternalError(message) => {
                error!(file = %self.file, "Backend internal error: {}", message);
                self.internal_errors.push(message);
            }
            StderrClass::Ignored => {}
            StderrClass::Other => debug!(file = %self.file, "stderr: {}", line.trim_end()),
        }
    }

    pub fn publish_diagnostics(&self, notifier: &Notifier) {
        notifier.send(Notification::Diagnostics {
            file: self.file.clone(),
            diagnostics: self.diagnostics.clone(),
        });
    }

    /// Start positions of all diagnostics
    pub fn error_starts(&self) -> Vec<verilane_protocol::Position> {
        self.diagnostics.iter().map(|d| d.range.start).collect()
    }
}
