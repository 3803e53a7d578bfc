//! Bounded stage chaining

use std::collections::HashMap;
use tracing::info;
use verilane_backends::{BackendConfig, StageConfig};

use crate::outcome::Outcome;

/// Executions of each stage within one run.
///
/// A stage may run again only if it is a verification stage, it ran once
/// so far, and the stage that just finished is not a verification stage.
#[derive(Debug, Clone, Default)]
pub struct StageTracker {
    executions: HashMap<String, u32>,
    last_was_verification: Option<bool>,
}

impl StageTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn executions(&self, stage: &str) -> u32 {
        self.executions.get(stage).copied().unwrap_or(0)
    }

    pub fn may_run(&self, stage: &StageConfig) -> bool {
        let count = self.executions(&stage.name);
        count == 0
            || (stage.is_verification && self.last_was_verification == Some(false) && count <= 1)
    }

    pub fn record(&mut self, stage: &StageConfig) {
        *self.executions.entry(stage.name.clone()).or_insert(0) += 1;
        self.last_was_verification = Some(stage.is_verification);
    }

    /// The stage to run after `finished` ended with `outcome`, if the
    /// transition table names one and the guard allows it.
    ///
    /// Non-verification stages always follow their success transition.
    pub fn next<'a>(
        &self,
        backend: &'a BackendConfig,
        finished: &StageConfig,
        outcome: Outcome,
    ) -> Option<&'a StageConfig> {
        let key = if finished.is_verification {
            outcome.stage_outcome()?
        } else {
            verilane_backends::StageOutcome::Success
        };
        let next = backend.stage(finished.next_stage(key)?)?;
        if self.may_run(next) {
            Some(next)
        } else {
            info!(
                "Not running stage {} again after {} ({} executions)",
                next.name,
                finished.name,
                self.executions(&next.name)
            );
            None
        }
    }
}
