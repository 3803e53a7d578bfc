//! Stepping through a built trace
//!
//! The navigator works in one of two modes:
//!
//! - **Simple**: movement is restricted to the execution path leading to a
//!   selected record (see [`ExecutionTrace::execution_path`]).
//! - **Advanced**: the whole tree is walked by server index, comparing
//!   depths.
//!
//! Callers speak client indices only; a move that has no target stays on the
//! current record.

use crate::trace::ExecutionTrace;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::trace;
use verilane_protocol::Position;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StepType {
    Stay,
    Next,
    Back,
    In,
    Out,
    Continue,
}

impl fmt::Display for StepType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StepType::Stay => "stay",
            StepType::Next => "next",
            StepType::Back => "back",
            StepType::In => "in",
            StepType::Out => "out",
            StepType::Continue => "continue",
        };
        f.write_str(name)
    }
}

impl std::str::FromStr for StepType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "stay" => Ok(StepType::Stay),
            "next" => Ok(StepType::Next),
            "back" => Ok(StepType::Back),
            "in" => Ok(StepType::In),
            "out" => Ok(StepType::Out),
            "continue" => Ok(StepType::Continue),
            other => Err(format!("unknown step type: {other}")),
        }
    }
}

/// Where a step ended up
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Move {
    pub client_index: usize,
    pub server_index: usize,
    /// Source position of the target, `0:0` when it has none
    pub position: Position,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Navigator {
    /// Restricted to an execution path, given as client indices with the
    /// selected record first
    Simple { path: Vec<usize> },
    Advanced,
}

impl ExecutionTrace {
    /// The linear trace leading to a record, as client indices starting with
    /// the record itself and ending towards its unit root.
    ///
    /// The walk goes to the previous server index, or to the parent when the
    /// current record is a branch marker so the other branch is skipped.
    /// Records deeper than any record already on the path are dropped.
    pub fn execution_path(&self, client_index: usize) -> Vec<usize> {
        let Some(start) = self.server_index(client_index) else {
            return Vec::new();
        };
        let Some(unit) = self.unit_of(start) else {
            return Vec::new();
        };
        let mut path = Vec::new();
        let mut min_depth = usize::MAX;
        let mut current = Some(start);

        while let Some(index) = current {
            let Some(record) = self.record(index) else {
                break;
            };
            if record.depth <= min_depth {
                min_depth = record.depth;
                if let Some(client) = record.client_index {
                    path.push(client);
                }
            }
            if index <= unit.start_index {
                break;
            }
            current = if record.is_branch_marker {
                record.parent
            } else {
                Some(index - 1)
            };
        }
        path
    }
}

impl Navigator {
    pub fn simple(trace: &ExecutionTrace, client_index: usize) -> Self {
        Navigator::Simple {
            path: trace.execution_path(client_index),
        }
    }

    /// Compute the target of a step from `current` (a client index).
    ///
    /// Returns `None` when `current` is not a client index of `trace`.
    pub fn step(&self, trace: &ExecutionTrace, current: usize, step: StepType) -> Option<Move> {
        let current_server = trace.server_index(current)?;
        let target_client = match self {
            Navigator::Simple { path } => step_simple(path, current, step),
            Navigator::Advanced => step_advanced(trace, current_server, step)
                .and_then(|server| trace.client_index(server))
                .unwrap_or(current),
        };
        let server_index = trace.server_index(target_client)?;
        trace!(from = current, to = target_client, "Step {}", step);
        Some(Move {
            client_index: target_client,
            server_index,
            position: trace.position_of(server_index),
        })
    }
}

fn step_simple(path: &[usize], current: usize, step: StepType) -> usize {
    let Some(&first) = path.first() else {
        return current;
    };
    let Some(at) = path.iter().position(|&c| c == current) else {
        return first;
    };
    match step {
        StepType::Stay => current,
        StepType::In | StepType::Next => at.checked_sub(1).map_or(current, |i| path[i]),
        StepType::Back | StepType::Out => path.get(at + 1).copied().unwrap_or(current),
        StepType::Continue => first,
    }
}

fn step_advanced(trace: &ExecutionTrace, current: usize, step: StepType) -> Option<usize> {
    let records = trace.records();
    let depth = records.get(current)?.depth;
    let after = || records.iter().skip(current + 1).filter(|r| r.decoration_eligible);
    let found = match step {
        StepType::Stay => return Some(current),
        StepType::In => after().next(),
        StepType::Next => after().find(|r| r.depth <= depth),
        StepType::Out => after().find(|r| r.depth < depth),
        StepType::Back => records[..current]
            .iter()
            .rev()
            .find(|r| r.decoration_eligible && r.depth <= depth),
        StepType::Continue => after()
            .find(|r| r.is_error_state)
            .or_else(|| {
                records[..=current]
                    .iter()
                    .find(|r| r.decoration_eligible && r.is_error_state)
            }),
    };
    found.map(|r| r.index)
}
