//! Per-file verification sessions
//!
//! The [`Controller`] owns one [`VerificationSession`] per open file and the
//! selected backend. A verification runs as a spawned task that starts the
//! backend's stages one after another, decodes their output into events,
//! chains stages through the backend's transition table and, once a
//! verification stage finished, loads the execution trace the backend
//! persisted and publishes decorations for it.
//!
//! Everything the UI layer needs to show arrives as [`Notification`]s on the
//! channel returned by [`Controller::new`].

#![allow(clippy::module_name_repetitions)] // SessionError, SessionSettings read better in callers
#![allow(clippy::doc_markdown)] // Missing backticks - low priority
#![allow(clippy::uninlined_format_args)] // Named args are clearer
#![allow(clippy::missing_errors_doc)] // Error variants are documented on SessionError
#![allow(clippy::must_use_candidate)] // Accessors don't need must_use
#![allow(clippy::return_self_not_must_use)] // Builder pattern doesn't need must_use
#![allow(clippy::let_and_return)] // Guard temporaries must be dropped before returning

pub mod context;
pub mod controller;
pub mod diagnostics;
pub mod error;
pub mod notify;
pub mod outcome;
mod pipeline;
pub mod session;
pub mod settings;
pub mod stages;
pub mod state;

pub use context::BackendContext;
pub use controller::Controller;
pub use diagnostics::{Diagnostic, Severity};
pub use error::SessionError;
pub use notify::{Notification, Notifier};
pub use outcome::{classify, Milestones, Outcome};
pub use session::{path_of, VerificationSession};
pub use settings::SessionSettings;
pub use stages::StageTracker;
pub use state::{StateChange, VerificationState};
