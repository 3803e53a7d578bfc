//! Editor diagnostics

use serde::Serialize;
use verilane_protocol::{ErrorReport, Range};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Severity {
    Error,
    Warning,
    Information,
    Hint,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Diagnostic {
    pub range: Range,
    pub message: String,
    pub severity: Severity,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    /// Reported from the backend's result cache
    pub cached: bool,
}

impl From<&ErrorReport> for Diagnostic {
    fn from(report: &ErrorReport) -> Self {
        let severity = match report.tag.as_deref() {
            Some(tag) if tag.ends_with(".warning") => Severity::Warning,
            _ => Severity::Error,
        };
        let message = if report.cached {
            format!("{} (cached)", report.message)
        } else {
            report.message.clone()
        };
        Self {
            range: Range::new(report.start, report.end),
            message,
            severity,
            tag: report.tag.clone(),
            cached: report.cached,
        }
    }
}
