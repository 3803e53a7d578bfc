//! Session lifecycle states and the state-change payload

use crate::outcome::Outcome;
use serde::Serialize;
use std::fmt;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum VerificationState {
    #[default]
    Stopped,
    /// The backend is being started
    Starting,
    VerificationRunning,
    /// The backend finished and is printing its report
    VerificationReporting,
    /// Loading the execution trace and computing decorations
    PostProcessing,
    Ready,
    /// The backend is shutting down
    Stopping,
}

impl fmt::Display for VerificationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            VerificationState::Stopped => "stopped",
            VerificationState::Starting => "starting",
            VerificationState::VerificationRunning => "verification running",
            VerificationState::VerificationReporting => "verification reporting",
            VerificationState::PostProcessing => "post processing",
            VerificationState::Ready => "ready",
            VerificationState::Stopping => "stopping",
        };
        f.write_str(name)
    }
}

/// State-change notification
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StateChange {
    pub new_state: VerificationState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,
    /// Percent of verified entities
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub success: Option<Outcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_count: Option<usize>,
    /// Seconds reported by the backend
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verification_completed: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manually_triggered: Option<bool>,
}

impl StateChange {
    pub fn new(new_state: VerificationState) -> Self {
        Self {
            new_state,
            file: None,
            stage: None,
            progress: None,
            success: None,
            error_count: None,
            time: None,
            verification_completed: None,
            manually_triggered: None,
        }
    }

    pub fn file(mut self, file: impl Into<String>) -> Self {
        self.file = Some(file.into());
        self
    }

    pub fn stage(mut self, stage: impl Into<String>) -> Self {
        self.stage = Some(stage.into());
        self
    }

    pub fn progress(mut self, percent: f64) -> Self {
        self.progress = Some(percent);
        self
    }

    /// Completion details of a run
    pub fn finished(
        mut self,
        outcome: Outcome,
        error_count: usize,
        elapsed: Duration,
        verification_completed: bool,
        manually_triggered: bool,
    ) -> Self {
        self.success = Some(outcome);
        self.error_count = Some(error_count);
        self.time = Some(elapsed.as_secs_f64());
        self.verification_completed = Some(verification_completed);
        self.manually_triggered = Some(manually_triggered);
        self
    }
}
