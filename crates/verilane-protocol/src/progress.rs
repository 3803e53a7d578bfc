//! Verification progress

use crate::events::EntityKind;
use serde::{Deserialize, Serialize};

/// Counts of entities to verify and entities verified so far
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Progress {
    pub total_predicates: u32,
    pub total_methods: u32,
    pub total_functions: u32,
    pub verified_predicates: u32,
    pub verified_methods: u32,
    pub verified_functions: u32,
}

impl Progress {
    pub fn new(predicates: u32, methods: u32, functions: u32) -> Self {
        Self {
            total_predicates: predicates,
            total_methods: methods,
            total_functions: functions,
            ..Default::default()
        }
    }

    pub fn record(&mut self, kind: EntityKind) {
        match kind {
            EntityKind::Method => self.verified_methods += 1,
            EntityKind::Function => self.verified_functions += 1,
            EntityKind::Predicate => self.verified_predicates += 1,
        }
    }

    pub fn total(&self) -> u32 {
        self.total_predicates + self.total_methods + self.total_functions
    }

    pub fn verified(&self) -> u32 {
        self.verified_predicates + self.verified_methods + self.verified_functions
    }

    /// Verified entities over total entities, in `[0, 1]`.
    ///
    /// Zero when nothing is to be verified.
    pub fn fraction(&self) -> f64 {
        let total = self.total();
        if total == 0 {
            return 0.0;
        }
        (f64::from(self.verified()) / f64::from(total)).min(1.0)
    }

    pub fn percent(&self) -> f64 {
        self.fraction() * 100.0
    }
}
