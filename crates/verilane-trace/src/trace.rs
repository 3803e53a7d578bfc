//! Building the record forest from a persisted log

use crate::error::TraceError;
use crate::log::LogEntry;
use crate::record::{ExecutionRecord, RecordKind, UnitKind, VerifiableUnit};
use crate::state::StateSnapshot;
use tracing::{debug, info, warn};
use verilane_protocol::{CounterexampleModel, Position};

const WELLFORMEDNESS_CHECK: &str = "WellformednessCheck";

/// All records of one completed run, with both index spaces.
///
/// Records are stored in preorder; a record's position in that list is its
/// server index. Decoration-eligible records additionally get a dense client
/// index, assigned in the same order.
#[derive(Debug, Clone, Default)]
pub struct ExecutionTrace {
    records: Vec<ExecutionRecord>,
    units: Vec<VerifiableUnit>,
    client_to_server: Vec<usize>,
}

struct Builder {
    records: Vec<ExecutionRecord>,
}

impl Builder {
    fn push(
        &mut self,
        entry: &LogEntry,
        parent: Option<usize>,
        depth: usize,
        unit: usize,
        in_wellformedness_check: bool,
        path: &str,
    ) -> Result<usize, TraceError> {
        let label = entry.label().ok_or_else(|| TraceError::MissingKind {
            path: path.to_string(),
        })?;
        let position = match entry.pos.as_deref() {
            Some(text) => {
                Position::parse(text).map_err(|_| TraceError::InvalidPosition(text.to_string()))?
            }
            None => None,
        };
        let kind = match entry.action.as_deref() {
            Some(action) => {
                let kind = RecordKind::parse(action);
                if kind == RecordKind::Other {
                    debug!("Unknown action type {:?} at {}", action, path);
                }
                kind
            }
            None => RecordKind::Other,
        };
        let is_wellformedness_check =
            in_wellformedness_check || entry.kind.as_deref() == Some(WELLFORMEDNESS_CHECK);
        let is_branch_marker = entry
            .kind
            .as_deref()
            .is_some_and(|k| k.to_ascii_lowercase().starts_with("branch"));

        let index = self.records.len();
        let previous_sibling = match parent {
            Some(p) => self.records[p].children.last().copied(),
            None => None,
        };
        if let Some(previous) = previous_sibling {
            self.records[previous].next_sibling = Some(index);
        }
        if let Some(p) = parent {
            self.records[p].children.push(index);
        }

        self.records.push(ExecutionRecord {
            index,
            kind,
            label: label.to_string(),
            position,
            formula: entry.value.clone().unwrap_or_default(),
            depth,
            parent,
            previous_sibling,
            next_sibling: None,
            children: Vec::with_capacity(entry.children.len()),
            unit,
            state: entry.prestate.as_ref().map(StateSnapshot::from_prestate),
            is_error_state: false,
            is_branch_marker,
            is_wellformedness_check,
            decoration_eligible: position.is_some() && !is_wellformedness_check,
            client_index: None,
        });

        let child_depth = if is_branch_marker { depth } else { depth + 1 };
        for (i, child) in entry.children.iter().enumerate() {
            self.push(
                child,
                Some(index),
                child_depth,
                unit,
                is_wellformedness_check,
                &format!("{path}.{i}"),
            )?;
        }
        Ok(index)
    }
}

impl ExecutionTrace {
    /// Build the forest. Each top-level entry becomes a verifiable unit whose
    /// root is the entry itself; entries of unknown kind are skipped.
    pub fn build(entries: &[LogEntry]) -> Result<Self, TraceError> {
        let mut builder = Builder {
            records: Vec::new(),
        };
        let mut units = Vec::new();

        for (i, entry) in entries.iter().enumerate() {
            let label = entry.label().ok_or_else(|| TraceError::MissingKind {
                path: i.to_string(),
            })?;
            let Some(kind) = UnitKind::parse(label) else {
                warn!("Skipping top-level log entry {} of unknown kind {:?}", i, label);
                continue;
            };
            let unit = units.len();
            let start_index = builder.records.len();
            let root = builder.push(entry, None, 0, unit, false, &i.to_string())?;
            units.push(VerifiableUnit {
                name: entry.value.clone().unwrap_or_default(),
                kind,
                index: unit,
                start_index,
                end_index: builder.records.len() - 1,
                root,
            });
        }

        let mut records = builder.records;
        let mut client_to_server = Vec::new();
        for record in &mut records {
            if record.decoration_eligible {
                record.client_index = Some(client_to_server.len());
                client_to_server.push(record.index);
            }
        }
        report_trivial_records(&records);

        info!(
            units = units.len(),
            records = records.len(),
            "Execution tree loaded"
        );
        Ok(Self {
            records,
            units,
            client_to_server,
        })
    }

    pub fn records(&self) -> &[ExecutionRecord] {
        &self.records
    }

    pub fn record(&self, server_index: usize) -> Option<&ExecutionRecord> {
        self.records.get(server_index)
    }

    pub fn units(&self) -> &[VerifiableUnit] {
        &self.units
    }

    pub fn unit_of(&self, server_index: usize) -> Option<&VerifiableUnit> {
        self.record(server_index).and_then(|r| self.units.get(r.unit))
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Number of decoration-eligible records
    pub fn client_count(&self) -> usize {
        self.client_to_server.len()
    }

    pub fn server_index(&self, client_index: usize) -> Option<usize> {
        self.client_to_server.get(client_index).copied()
    }

    pub fn client_index(&self, server_index: usize) -> Option<usize> {
        self.record(server_index).and_then(|r| r.client_index)
    }

    /// The record's position, `0:0` when it has none
    pub fn position_of(&self, server_index: usize) -> Position {
        self.record(server_index)
            .and_then(|r| r.position)
            .unwrap_or_default()
    }

    /// Flag every record located at one of the error starts and attach
    /// concrete values from the model. Returns the number of flagged records.
    pub fn mark_error_states(&mut self, error_starts: &[Position], model: &CounterexampleModel) -> usize {
        let mut flagged = 0;
        for record in &mut self.records {
            let Some(position) = record.position else {
                continue;
            };
            if error_starts.contains(&position) {
                record.is_error_state = true;
                if let Some(state) = &mut record.state {
                    state.fill_in_concrete_values(model);
                }
                flagged += 1;
            }
        }
        flagged
    }

    /// Server indices of eligible records ordered by position, then index
    pub fn eligible_by_position(&self) -> Vec<usize> {
        let mut eligible: Vec<(Position, usize)> = self
            .records
            .iter()
            .filter(|r| r.decoration_eligible)
            .filter_map(|r| r.position.map(|p| (p, r.index)))
            .collect();
        eligible.sort_unstable();
        eligible.into_iter().map(|(_, index)| index).collect()
    }

    /// One line per record: client index, server index and indented header
    pub fn outline(&self) -> String {
        let mut out = String::new();
        for record in &self.records {
            let client = record
                .client_index
                .map_or_else(String::new, |c| c.to_string());
            out.push_str(&format!(
                "{:>5} ({:>5}) |{} {}\n",
                client,
                record.index,
                "  ".repeat(record.depth),
                record.header()
            ));
        }
        out
    }
}

/// A record without a position whose descendants are eligible cannot be
/// shown itself but hides nothing either. Only logged.
fn report_trivial_records(records: &[ExecutionRecord]) {
    let mut eligible_below = vec![false; records.len()];
    for record in records.iter().rev() {
        eligible_below[record.index] = record
            .children
            .iter()
            .any(|&c| records[c].decoration_eligible || eligible_below[c]);
    }
    for record in records {
        if record.position.is_none() && !record.is_wellformedness_check && eligible_below[record.index]
        {
            debug!(
                index = record.index,
                "Trivial record {:?} has a non-trivial descendant", record.label
            );
        }
    }
}
