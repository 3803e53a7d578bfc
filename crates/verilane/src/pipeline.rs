//! One verification run: stage execution, chaining and post-processing

use crate::context::BackendContext;
use crate::notify::{Notification, Notifier};
use crate::outcome::{classify, Outcome};
use crate::session::VerificationSession;
use crate::settings::SessionSettings;
use crate::stages::StageTracker;
use crate::state::VerificationState;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, trace, warn};
use verilane_backends::{StageConfig, StageEvent};
use verilane_protocol::{Decoded, OutputDecoder, StructuredContext};
use verilane_trace::{decorations, parse_log, ExecutionTrace};

/// Everything a run task needs
pub(crate) struct RunRequest {
    pub attempt: u64,
    pub context: BackendContext,
    pub settings: Arc<SessionSettings>,
    pub session: Arc<Mutex<VerificationSession>>,
    pub notifier: Notifier,
}

/// How consuming a stage's output ended
enum StageEnd {
    Exited(Option<i32>),
    /// The run was superseded or aborted
    Stale,
}

impl RunRequest {
    async fn is_current(&self) -> bool {
        self.session.lock().await.is_current(self.attempt)
    }

    /// Apply decoded events unless the run went stale
    async fn apply(&self, decoded: Vec<Decoded>) -> bool {
        let mut session = self.session.lock().await;
        if !session.is_current(self.attempt) {
            return false;
        }
        for item in decoded {
            match item {
                Ok(event) => session.apply_event(event, &self.notifier),
                Err(e) => warn!(file = %session.file, "Dropping malformed backend output: {}", e),
            }
        }
        true
    }

    async fn apply_stderr(&self, lines: Vec<String>) -> bool {
        let mut session = self.session.lock().await;
        if !session.is_current(self.attempt) {
            return false;
        }
        for line in &lines {
            session.apply_stderr(line, &self.notifier);
        }
        true
    }
}

/// Split complete lines off `buffer`
fn take_lines(buffer: &mut String, chunk: &str) -> Vec<String> {
    buffer.push_str(chunk);
    let Some(last) = buffer.rfind('\n') else {
        return Vec::new();
    };
    let rest = buffer.split_off(last + 1);
    let complete = std::mem::replace(buffer, rest);
    complete.lines().map(str::to_string).collect()
}

/// Drive a run from the first stage to Ready
pub(crate) async fn run(request: RunRequest) {
    let backend = Arc::clone(&request.context.backend);
    let Some(first) = backend.first_stage() else {
        request.notifier.hint(format!("Backend {} has no stages", backend.name));
        finish(&request, Outcome::Error, false).await;
        return;
    };

    let mut tracker = StageTracker::new();
    let mut stage = first;
    let mut last_verification: Option<Outcome> = None;

    loop {
        tracker.record(stage);
        if stage.is_verification && last_verification.is_some() {
            let mut session = request.session.lock().await;
            if !session.is_current(request.attempt) {
                return;
            }
            session.reset_stage_results();
        }

        let Some(outcome) = run_stage(&request, stage).await else {
            debug!(attempt = request.attempt, "Discarding results of a superseded run");
            return;
        };
        info!(stage = %stage.name, ?outcome, "Stage finished");
        if stage.is_verification {
            last_verification = Some(outcome);
        }

        match tracker.next(&backend, stage, outcome) {
            Some(next) => {
                info!("Chaining stage {} after {}", next.name, stage.name);
                stage = next;
            }
            None => break,
        }
    }

    match last_verification {
        Some(outcome) if outcome.stage_outcome().is_some() => post_process(&request, outcome).await,
        Some(outcome) => finish(&request, outcome, false).await,
        None => finish(&request, Outcome::Success, false).await,
    }
}

/// Run one stage to its exit. `None` when the run went stale.
async fn run_stage(request: &RunRequest, stage: &StageConfig) -> Option<Outcome> {
    let backend = &request.context.backend;
    let path = {
        let mut session = request.session.lock().await;
        if !session.is_current(request.attempt) {
            return None;
        }
        let change = session
            .enter(VerificationState::VerificationRunning)
            .stage(&stage.name)
            .progress(0.0);
        request.notifier.state(change);
        session.path.clone()
    };

    let service = &request.context.service;
    let run = match service.start_stage_process(&path, stage).await {
        Ok(run) => run,
        Err(e) => {
            warn!(stage = %stage.name, "Failed to start stage: {}", e);
            let message = e.hint().unwrap_or_else(|| e.to_string());
            request.notifier.hint(message);
            let mut session = request.session.lock().await;
            if !session.is_current(request.attempt) {
                return None;
            }
            session.internal_errors.push(e.to_string());
            return Some(Outcome::Error);
        }
    };
    let job = run.job;
    {
        let mut session = request.session.lock().await;
        if !session.is_current(request.attempt) {
            drop(session);
            if let Err(e) = service.stop_verification(Some(job)).await {
                debug!("Stopping superseded stage failed: {}", e);
            }
            return None;
        }
        session.job = Some(job);
    }

    let mut decoder = OutputDecoder::new(StructuredContext::new(backend.backend_type.clone()));
    let output = consume(request, stage, run.events, &mut decoder);
    let end = match backend.timeout() {
        Some(limit) => match tokio::time::timeout(limit, output).await {
            Ok(end) => end,
            Err(_) => {
                warn!(stage = %stage.name, ?limit, "Verification timed out");
                if let Err(e) = service.stop_verification(Some(job)).await {
                    warn!("Stopping timed out verification failed: {}", e);
                }
                let mut session = request.session.lock().await;
                if !session.is_current(request.attempt) {
                    return None;
                }
                session.job = None;
                session
                    .internal_errors
                    .push(format!("Stage {} timed out after {:?}", stage.name, limit));
                return Some(Outcome::Timeout);
            }
        },
        None => output.await,
    };

    let StageEnd::Exited(code) = end else {
        return None;
    };
    let mut session = request.session.lock().await;
    if !session.is_current(request.attempt) {
        return None;
    }
    session.job = None;
    let outcome = if stage.is_verification {
        classify(
            session.diagnostics.len(),
            code,
            session.milestones,
            session.aborting,
        )
    } else if code == Some(0) {
        Outcome::Success
    } else {
        Outcome::Error
    };
    debug!(stage = %stage.name, ?code, ?outcome, "Classified stage exit");
    Some(outcome)
}

async fn consume(
    request: &RunRequest,
    stage: &StageConfig,
    mut events: mpsc::Receiver<StageEvent>,
    decoder: &mut OutputDecoder,
) -> StageEnd {
    let mut stderr = String::new();
    while let Some(event) = events.recv().await {
        match event {
            StageEvent::Stdout(chunk) => {
                trace!(stage = %stage.name, "stdout: {}", chunk.trim_end());
                if !stage.is_verification {
                    continue;
                }
                if !request.apply(decoder.feed(&chunk)).await {
                    return StageEnd::Stale;
                }
            }
            StageEvent::Stderr(chunk) => {
                let lines = take_lines(&mut stderr, &chunk);
                if !request.apply_stderr(lines).await {
                    return StageEnd::Stale;
                }
            }
            StageEvent::Failed(message) => {
                warn!(stage = %stage.name, "Backend stream failed: {}", message);
                let mut session = request.session.lock().await;
                if !session.is_current(request.attempt) {
                    return StageEnd::Stale;
                }
                session.internal_errors.push(message);
            }
            StageEvent::Exited(code) => return flush(request, stage, decoder, stderr, code).await,
        }
    }
    flush(request, stage, decoder, stderr, None).await
}

async fn flush(
    request: &RunRequest,
    stage: &StageConfig,
    decoder: &mut OutputDecoder,
    stderr: String,
    code: Option<i32>,
) -> StageEnd {
    let mut current = true;
    if stage.is_verification {
        current = request.apply(decoder.finish()).await;
    }
    if current && !stderr.trim().is_empty() {
        current = request.apply_stderr(vec![stderr]).await;
    }
    if current {
        StageEnd::Exited(code)
    } else {
        StageEnd::Stale
    }
}

/// Publish diagnostics, load the execution trace and announce Ready
async fn post_process(request: &RunRequest, outcome: Outcome) {
    let (error_starts, model) = {
        let mut session = request.session.lock().await;
        if !session.is_current(request.attempt) {
            return;
        }
        session.publish_diagnostics(&request.notifier);
        let change = session.enter(VerificationState::PostProcessing);
        request.notifier.state(change);
        (session.error_starts(), session.model.clone())
    };

    let log_path = request.settings.execution_log_path();
    let trace = match tokio::fs::read_to_string(&log_path).await {
        Ok(content) => match parse_log(&content).and_then(|entries| ExecutionTrace::build(&entries)) {
            Ok(mut trace) => {
                let flagged = trace.mark_error_states(&error_starts, &model);
                debug!(records = trace.records().len(), flagged, "Loaded execution trace");
                Some(trace)
            }
            Err(e) => {
                warn!(path = %log_path.display(), "Failed to load execution trace: {}", e);
                None
            }
        },
        Err(e) => {
            debug!(path = %log_path.display(), "No execution trace: {}", e);
            None
        }
    };

    {
        let mut session = request.session.lock().await;
        if !session.is_current(request.attempt) {
            return;
        }
        if let Some(trace) = trace {
            let mut global_info = trace.outline();
            if !model.is_empty() {
                global_info.push_str("\n\nCounterexample:\n");
                global_info.push_str(&model.pretty());
            }
            request.notifier.send(Notification::Decorations {
                file: session.file.clone(),
                decorations: decorations(&trace, request.settings.theme),
                global_info,
            });
            session.trace = Some(trace);
            session.navigator = None;
        }
    }
    finish(request, outcome, true).await;
}

/// Announce Ready and close the run
async fn finish(request: &RunRequest, outcome: Outcome, verification_completed: bool) {
    let mut session = request.session.lock().await;
    if !session.is_current(request.attempt) {
        return;
    }
    if outcome == Outcome::Error {
        if let Some(note) = session.internal_errors.first() {
            request
                .notifier
                .hint(format!("Verification of {} failed: {}", session.file, note));
        }
    }
    if !verification_completed {
        session.publish_diagnostics(&request.notifier);
    }
    session.running = false;
    session.job = None;
    session.last_outcome = Some(outcome);
    let change = session.enter(VerificationState::Ready).finished(
        outcome,
        session.diagnostics.len(),
        session.elapsed,
        verification_completed,
        session.manually_triggered,
    );
    request.notifier.state(change);
}
