//! Controller settings

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use verilane_backends::{BackendConfig, ManagerSettings};
use verilane_trace::Theme;

/// Everything the controller is configured with
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionSettings {
    pub manager: ManagerSettings,
    pub backends: Vec<BackendConfig>,
    pub workspace_root: PathBuf,
    /// Where the backend persists its execution log
    pub execution_log_path: Option<PathBuf>,
    pub theme: Theme,
    /// Walk the whole execution tree instead of the path to the selected
    /// record
    pub advanced_navigation: bool,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            manager: ManagerSettings::default(),
            backends: Vec::new(),
            workspace_root: PathBuf::from("."),
            execution_log_path: None,
            theme: Theme::default(),
            advanced_navigation: false,
        }
    }
}

impl SessionSettings {
    /// Configured log path, or `.vscode/executionTreeData.js` in the workspace
    pub fn execution_log_path(&self) -> PathBuf {
        self.execution_log_path.clone().unwrap_or_else(|| {
            self.workspace_root
                .join(".vscode")
                .join("executionTreeData.js")
        })
    }

    pub fn backend(&self, name: &str) -> Option<&BackendConfig> {
        self.backends.iter().find(|b| b.name == name)
    }
}
