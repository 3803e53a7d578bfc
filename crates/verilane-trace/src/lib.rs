//! Execution trace reconstruction and debug navigation
//!
//! After a verification run the backend persists a nested symbolic-execution
//! log. This crate turns it into an [`ExecutionTrace`]: a forest of
//! [`VerifiableUnit`]s whose [`ExecutionRecord`]s live in one arena and refer
//! to each other by index.
//!
//! Records have two indices. The server index is the record's position in
//! preorder. The client index numbers only decoration-eligible records (known
//! position, outside well-formedness checks) and is what editors and the
//! [`Navigator`] speak.

#![allow(clippy::module_name_repetitions)] // TraceError, ExecutionTrace read better in callers
#![allow(clippy::doc_markdown)] // Missing backticks - low priority
#![allow(clippy::uninlined_format_args)] // Named args are clearer
#![allow(clippy::missing_errors_doc)] // Error variants are documented on TraceError
#![allow(clippy::must_use_candidate)] // Accessors don't need must_use

pub mod decorations;
pub mod error;
pub mod heap_graph;
pub mod log;
pub mod navigator;
pub mod record;
pub mod state;
pub mod trace;

pub use decorations::{decorations, Decoration, StateColors, Theme};
pub use error::TraceError;
pub use heap_graph::HeapGraph;
pub use log::{parse_log, read_log, LogEntry, Prestate, StoreEntry};
pub use navigator::{Move, Navigator, StepType};
pub use record::{ExecutionRecord, RecordKind, UnitKind, VerifiableUnit};
pub use state::{
    split_heap_chunk, split_path_conditions, ChunkName, ConditionKind, HeapChunk, PathCondition,
    PermissionKind, StateSnapshot, StoreBinding, ValueKind,
};
pub use trace::ExecutionTrace;
