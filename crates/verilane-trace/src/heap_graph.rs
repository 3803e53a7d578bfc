//! Heap-graph descriptions for a selected record
//!
//! Rendering is left to the client; this is the data it renders from.

use crate::record::UnitKind;
use crate::state::{HeapChunk, StoreBinding};
use crate::trace::ExecutionTrace;
use serde::Serialize;
use verilane_protocol::Position;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HeapGraph {
    pub client_index: usize,
    pub server_index: usize,
    pub store: Vec<StoreBinding>,
    pub heap: Vec<HeapChunk>,
    pub old_heap: Vec<HeapChunk>,
    pub path_conditions: Vec<String>,
    pub position: Position,
    pub unit_name: String,
    pub unit_kind: UnitKind,
    /// Server index of the unit root
    pub unit_offset: usize,
    pub is_error_state: bool,
    /// Header, state and an error note as text
    pub state_info: String,
}

impl ExecutionTrace {
    /// Describe the state at a client index
    pub fn heap_graph(&self, client_index: usize) -> Option<HeapGraph> {
        let server_index = self.server_index(client_index)?;
        let record = self.record(server_index)?;
        let unit = self.unit_of(server_index)?;
        let state = record.state.clone().unwrap_or_default();

        let mut state_info = String::new();
        if record.is_error_state {
            state_info.push_str("Error state, see the counterexample\n");
        }
        state_info.push_str(&record.header());
        state_info.push('\n');
        state_info.push_str(&state.describe());
        if !state.heap_unchanged() && !state.old_heap.is_empty() {
            state_info.push_str("Old heap:\n");
            for chunk in &state.old_heap {
                state_info.push_str(&format!("    {chunk}\n"));
            }
        }

        Some(HeapGraph {
            client_index,
            server_index,
            path_conditions: state.path_conditions.iter().map(|pc| pc.raw.clone()).collect(),
            store: state.store,
            heap: state.heap,
            old_heap: state.old_heap,
            position: record.position.unwrap_or_default(),
            unit_name: unit.name.clone(),
            unit_kind: unit.kind,
            unit_offset: unit.start_index,
            is_error_state: record.is_error_state,
            state_info,
        })
    }
}
