//! Classification of a finished verification stage

use serde::Serialize;
use verilane_backends::StageOutcome;
use verilane_protocol::ErrorReport;

/// How a verification ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Outcome {
    Success,
    ParsingFailed,
    TypecheckingFailed,
    VerificationFailed,
    Aborted,
    Error,
    Timeout,
}

impl Outcome {
    /// The transition-table key for chaining, if this outcome chains at all
    pub fn stage_outcome(self) -> Option<StageOutcome> {
        match self {
            Outcome::Success => Some(StageOutcome::Success),
            Outcome::ParsingFailed => Some(StageOutcome::ParsingError),
            Outcome::TypecheckingFailed => Some(StageOutcome::TypeCheckingError),
            Outcome::VerificationFailed => Some(StageOutcome::VerificationError),
            Outcome::Aborted | Outcome::Error | Outcome::Timeout => None,
        }
    }

    pub fn is_success(self) -> bool {
        self == Outcome::Success
    }
}

/// Front-end phases the backend got through.
///
/// Both start reached; errors tagged as parse or type-check errors clear
/// them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Milestones {
    pub parsing_completed: bool,
    pub type_checking_completed: bool,
}

impl Default for Milestones {
    fn default() -> Self {
        Self {
            parsing_completed: true,
            type_checking_completed: true,
        }
    }
}

impl Milestones {
    pub fn observe(&mut self, error: &ErrorReport) {
        if error.is_parse_error() {
            self.parsing_completed = false;
            self.type_checking_completed = false;
        } else if error.is_typecheck_error() {
            self.type_checking_completed = false;
        }
    }
}

/// Classify a stage exit.
///
/// A missing exit code (killed by a signal) counts as nonzero.
pub fn classify(
    diagnostic_count: usize,
    exit_code: Option<i32>,
    milestones: Milestones,
    aborting: bool,
) -> Outcome {
    if diagnostic_count == 0 {
        return match exit_code {
            Some(0) => Outcome::Success,
            _ if aborting => Outcome::Aborted,
            _ => Outcome::Error,
        };
    }
    if !milestones.parsing_completed {
        Outcome::ParsingFailed
    } else if !milestones.type_checking_completed {
        Outcome::TypecheckingFailed
    } else {
        Outcome::VerificationFailed
    }
}
