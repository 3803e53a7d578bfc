//! Outbound notifications to the UI layer

use crate::diagnostics::Diagnostic;
use crate::state::StateChange;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::debug;
use verilane_backends::EngineKind;
use verilane_trace::{Decoration, HeapGraph};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase", tag = "kind")]
pub enum Notification {
    StateChange(StateChange),
    Diagnostics {
        file: String,
        diagnostics: Vec<Diagnostic>,
    },
    Decorations {
        file: String,
        decorations: Vec<Decoration>,
        /// Record outline and counterexample model as text
        global_info: String,
    },
    HeapGraph {
        file: String,
        graph: HeapGraph,
    },
    /// One-line message for the user
    Hint { message: String },
    BackendReady { name: String, engine: EngineKind },
    VerificationNotStarted { file: String },
    /// A structured backend message without a dedicated event
    Unhandled {
        file: String,
        msg_type: String,
        body: serde_json::Value,
    },
}

/// Sending half of the notification channel
#[derive(Debug, Clone)]
pub struct Notifier {
    tx: mpsc::UnboundedSender<Notification>,
}

impl Notifier {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Notification>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Deliver a notification. Dropped silently once the receiver is gone.
    pub fn send(&self, notification: Notification) {
        if self.tx.send(notification).is_err() {
            debug!("Notification receiver closed");
        }
    }

    pub fn state(&self, change: StateChange) {
        self.send(Notification::StateChange(change));
    }

    pub fn hint(&self, message: impl Into<String>) {
        self.send(Notification::Hint {
            message: message.into(),
        });
    }
}
