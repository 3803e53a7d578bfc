//! The persisted symbolic-execution log
//!
//! After a run the backend writes a JavaScript file whose payload is a JSON
//! array of nested entries. Action entries carry a `type`, opaque entries a
//! `kind`:
//!
//! ```json
//! [{"kind": "Method", "value": "main", "children": [
//!     {"type": "execute", "pos": "3:5", "value": "x := 1", "children": [],
//!      "prestate": {"store": [{"type": "Int", "value": "x -> x@1"}],
//!                   "heap": [], "oldHeap": [], "pcs": []}}]}]
//! ```

use crate::error::TraceError;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// One entry of the persisted log
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pos: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default)]
    pub children: Vec<LogEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prestate: Option<Prestate>,
}

impl LogEntry {
    /// The action type, falling back to the opaque kind
    pub fn label(&self) -> Option<&str> {
        self.action.as_deref().or(self.kind.as_deref())
    }
}

/// State attached to an action entry
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Prestate {
    pub store: Vec<StoreEntry>,
    pub heap: Vec<String>,
    pub old_heap: Vec<String>,
    pub pcs: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreEntry {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub value_type: String,
    pub value: String,
}

/// Parse the log file contents. Anything before the first `[` (such as a
/// `var executionTreeData = ` assignment) is ignored.
pub fn parse_log(content: &str) -> Result<Vec<LogEntry>, TraceError> {
    let start = content.find('[').ok_or(TraceError::NotAnArray)?;
    Ok(serde_json::from_str(content[start..].trim_end().trim_end_matches(';'))?)
}

pub fn read_log(path: &Path) -> Result<Vec<LogEntry>, TraceError> {
    let content = std::fs::read_to_string(path)?;
    parse_log(&content)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_strips_assignment_prefix() {
        let log = parse_log(
            "var executionTreeData = [{\"kind\":\"Method\",\"value\":\"m\",\"children\":[\n{\"type\":\"execute\",\"pos\":\"1:1\",\"value\":\"skip\"}]}];\n",
        )
        .unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].label(), Some("Method"));
        assert_eq!(log[0].children[0].label(), Some("execute"));
        assert!(log[0].children[0].prestate.is_none());
    }

    #[test]
    fn test_prestate_fields() {
        let log = parse_log(
            r#"[{"type":"produce","pos":"<no position>","prestate":{"store":[{"name":"x","type":"Ref","value":"x@1"}],"heap":["x@1.f -> 2 # W"],"oldHeap":[],"pcs":["x@1 != Null"]}}]"#,
        )
        .unwrap();
        let prestate = log[0].prestate.as_ref().unwrap();
        assert_eq!(prestate.store[0].name.as_deref(), Some("x"));
        assert_eq!(prestate.store[0].value_type, "Ref");
        assert_eq!(prestate.heap.len(), 1);
        assert_eq!(prestate.pcs, vec!["x@1 != Null".to_string()]);
    }

    #[test]
    fn test_read_log_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("executionTreeData.js");
        std::fs::write(&path, "var executionTreeData = [];\n").unwrap();
        assert!(read_log(&path).unwrap().is_empty());
        assert!(matches!(
            read_log(&dir.path().join("missing.js")),
            Err(TraceError::Io(_))
        ));
    }

    #[test]
    fn test_not_an_array() {
        assert!(matches!(parse_log("{}"), Err(TraceError::NotAnArray)));
        assert!(matches!(parse_log("[{]"), Err(TraceError::Json(_))));
    }
}
