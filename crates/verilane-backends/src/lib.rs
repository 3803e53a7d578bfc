//! Process lifecycle management for external verification backends
//!
//! A backend is driven through one of three interchangeable strategies that
//! all implement [`BackendService`]:
//!
//! - **Single-shot** ([`single_shot`]): every stage is its own process.
//! - **Peer server** ([`peer_server`]): a long-lived server reached through a
//!   light client process per stage. Start probes the server until it answers.
//! - **HTTP server** ([`http_server`]): a long-lived server that accepts jobs
//!   over HTTP and streams results back as JSON messages.
//!
//! Readiness and start-attempt bookkeeping lives in [`readiness`] and is
//! composed into each strategy.

// Crate-level lint configuration for pedantic clippy
#![allow(clippy::module_name_repetitions)] // BackendService, BackendError read better in callers
#![allow(clippy::doc_markdown)] // Missing backticks - low priority
#![allow(clippy::uninlined_format_args)] // Named args are clearer
#![allow(clippy::missing_errors_doc)] // Error variants are documented on BackendError
#![allow(clippy::must_use_candidate)] // Accessors don't need must_use
#![allow(clippy::return_self_not_must_use)] // Builder pattern doesn't need must_use
#![allow(clippy::option_if_let_else)] // Style preference

pub mod command;
pub mod config;
pub mod detection;
pub mod error;
pub mod http_server;
pub mod peer_server;
pub mod process;
pub mod readiness;
pub mod service;
pub mod single_shot;

pub use command::{CommandContext, CommandLine};
pub use config::{
    BackendConfig, EngineKind, HttpServerPolicy, HttpServerSettings, ManagerSettings,
    PeerServerSettings, SingleShotSettings, StageConfig, StageOutcome, ToolPaths,
};
pub use error::BackendError;
pub use process::{kill_process_tree, StageEvent};
pub use readiness::Readiness;
pub use service::{create_service, BackendService, BoxedBackendService, JobRef, StageRun};
