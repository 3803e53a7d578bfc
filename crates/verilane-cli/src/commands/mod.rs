//! Command implementations

pub mod trace;
pub mod verify;

use std::path::Path;
use tracing::info;
use verilane::SessionSettings;

/// Read settings from `path`, or use the defaults
pub fn load_settings(path: Option<&Path>) -> Result<SessionSettings, Box<dyn std::error::Error>> {
    let Some(path) = path else {
        return Ok(SessionSettings::default());
    };
    if !path.exists() {
        return Err(format!("Settings file not found: {}", path.display()).into());
    }
    let content = std::fs::read_to_string(path)?;
    let settings: SessionSettings = serde_json::from_str(&content)?;
    info!(path = %path.display(), backends = settings.backends.len(), "Loaded settings");
    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_settings() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"advancedNavigation": true}"#).unwrap();
        assert!(load_settings(Some(&path)).unwrap().advanced_navigation);
        assert_eq!(load_settings(None).unwrap(), SessionSettings::default());
        assert!(load_settings(Some(&dir.path().join("missing.json"))).is_err());
    }
}
