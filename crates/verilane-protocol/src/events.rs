//! The unified event set both output formats decode into

use crate::position::{Position, Range};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Kind of a verified program entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EntityKind {
    Method,
    Function,
    Predicate,
}

impl EntityKind {
    pub fn parse(text: &str) -> Option<Self> {
        match text.to_ascii_lowercase().as_str() {
            "method" => Some(EntityKind::Method),
            "function" => Some(EntityKind::Function),
            "predicate" => Some(EntityKind::Predicate),
            _ => None,
        }
    }
}

/// One error reported by the backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorReport {
    pub tag: Option<String>,
    pub start: Position,
    pub end: Position,
    pub message: String,
    pub cached: bool,
}

impl ErrorReport {
    pub fn is_parse_error(&self) -> bool {
        self.tag.as_deref() == Some("parser.error")
    }

    pub fn is_typecheck_error(&self) -> bool {
        self.tag.as_deref() == Some("typechecker.error")
    }
}

/// A member of the program outline
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutlineMember {
    pub kind: String,
    pub name: String,
    pub file: Option<String>,
    pub location: Option<Range>,
}

/// A named definition and the scope it is visible in
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Definition {
    pub kind: String,
    pub name: String,
    pub location: Option<Range>,
    pub scope: Option<Range>,
}

/// Everything a verification stage can report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "type")]
pub enum VerificationEvent {
    /// The backend started; `backend_type` names its family
    Start { backend_type: String },
    /// Verification began with the given entity counts
    VerificationStart {
        predicates: u32,
        methods: u32,
        functions: u32,
    },
    EntityVerified { kind: EntityKind, name: String },
    Error { errors: Vec<ErrorReport> },
    End { elapsed: Duration },
    /// The backend aborted the job
    Stopped,
    Outline { members: Vec<OutlineMember> },
    Definitions { definitions: Vec<Definition> },
    /// One `"name" -> value` line of a counterexample model
    Model { line: String },
    /// The backend printed its usage instead of verifying
    UsageHelp,
    /// A structured message of a type without a dedicated event
    Unhandled {
        msg_type: String,
        body: serde_json::Value,
    },
}

impl VerificationEvent {
    /// Whether the stage is past verification once this event arrives
    pub fn ends_verification(&self) -> bool {
        matches!(self, VerificationEvent::End { .. } | VerificationEvent::Stopped)
    }
}
