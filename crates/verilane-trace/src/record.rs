//! Execution records and verifiable units

use crate::state::StateSnapshot;
use serde::Serialize;
use std::fmt;
use verilane_protocol::Position;

/// What a record does to the symbolic state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum RecordKind {
    Execute,
    Evaluate,
    Consume,
    Produce,
    Other,
}

impl RecordKind {
    /// Parse an action type. Unknown types map to [`RecordKind::Other`].
    pub fn parse(text: &str) -> Self {
        match text.trim().to_ascii_lowercase().as_str() {
            "execute" => RecordKind::Execute,
            "eval" | "evaluate" => RecordKind::Evaluate,
            "consume" => RecordKind::Consume,
            "produce" => RecordKind::Produce,
            _ => RecordKind::Other,
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RecordKind::Execute => "EXECUTE",
            RecordKind::Evaluate => "EVAL",
            RecordKind::Consume => "CONSUME",
            RecordKind::Produce => "PRODUCE",
            RecordKind::Other => "OTHER",
        };
        f.write_str(name)
    }
}

/// Kind of a top-level log entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum UnitKind {
    Method,
    Predicate,
    Function,
}

impl UnitKind {
    pub fn parse(text: &str) -> Option<Self> {
        match text.trim().to_ascii_lowercase().as_str() {
            "method" => Some(UnitKind::Method),
            "predicate" => Some(UnitKind::Predicate),
            "function" => Some(UnitKind::Function),
            _ => None,
        }
    }
}

impl fmt::Display for UnitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            UnitKind::Method => "Method",
            UnitKind::Predicate => "Predicate",
            UnitKind::Function => "Function",
        };
        f.write_str(name)
    }
}

/// One node of the execution tree, addressed by its server index
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRecord {
    /// Server index: position in the flattened, preorder record list
    pub index: usize,
    pub kind: RecordKind,
    /// The raw `type` or `kind` from the log
    pub label: String,
    pub position: Option<Position>,
    pub formula: String,
    pub depth: usize,
    pub parent: Option<usize>,
    pub previous_sibling: Option<usize>,
    pub next_sibling: Option<usize>,
    pub children: Vec<usize>,
    /// Index of the verifiable unit this record belongs to
    pub unit: usize,
    pub state: Option<StateSnapshot>,
    pub is_error_state: bool,
    pub is_branch_marker: bool,
    /// Inside a well-formedness check
    pub is_wellformedness_check: bool,
    pub decoration_eligible: bool,
    /// Client index, present iff the record is decoration eligible
    pub client_index: Option<usize>,
}

impl ExecutionRecord {
    /// `EXECUTE 3:5 x := 1`, positions one-based
    pub fn header(&self) -> String {
        let position = self
            .position
            .map_or_else(|| "<no position>".to_string(), |p| p.to_string());
        format!("{} {} {}", self.kind, position, self.formula)
    }
}

/// A method, predicate or function and its records
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifiableUnit {
    pub name: String,
    pub kind: UnitKind,
    pub index: usize,
    /// First server index of the unit (its root)
    pub start_index: usize,
    /// Last server index of the unit
    pub end_index: usize,
    pub root: usize,
}

impl VerifiableUnit {
    pub fn contains(&self, server_index: usize) -> bool {
        (self.start_index..=self.end_index).contains(&server_index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_kind_parse() {
        assert_eq!(RecordKind::parse("eval"), RecordKind::Evaluate);
        assert_eq!(RecordKind::parse("Evaluate"), RecordKind::Evaluate);
        assert_eq!(RecordKind::parse("CONSUME"), RecordKind::Consume);
        assert_eq!(RecordKind::parse("comment"), RecordKind::Other);
    }

    #[test]
    fn test_unit_kind_parse() {
        assert_eq!(UnitKind::parse("Method"), Some(UnitKind::Method));
        assert_eq!(UnitKind::parse(" function "), Some(UnitKind::Function));
        assert_eq!(UnitKind::parse("domain"), None);
    }
}
