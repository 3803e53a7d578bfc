//! Java runtime detection

use crate::config::ManagerSettings;
use crate::error::BackendError;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::OnceLock;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

/// Result of checking the Java runtime
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeDetection {
    Compatible { java_path: PathBuf, version: String },
    Incompatible(String),
    NotFound(String),
}

/// Java version as `(major, minor, patch)`
pub fn parse_java_version(output: &str) -> Option<(u32, u32, u32)> {
    static DOTTED: OnceLock<Option<Regex>> = OnceLock::new();
    static QUOTED: OnceLock<Option<Regex>> = OnceLock::new();

    let dotted = DOTTED.get_or_init(|| Regex::new(r"([1-9]\d*)\.(\d+)\.(\d+)").ok());
    if let Some(caps) = dotted.as_ref().and_then(|re| re.captures(output)) {
        let major = caps[1].parse().ok()?;
        let minor = caps[2].parse().ok()?;
        let patch = caps[3].parse().ok()?;
        return Some((major, minor, patch));
    }

    // releases such as `openjdk version "21" 2023-09-19`
    let quoted = QUOTED.get_or_init(|| Regex::new(r#"version "([1-9]\d*)""#).ok());
    let caps = quoted.as_ref()?.captures(output)?;
    Some((caps[1].parse().ok()?, 0, 0))
}

/// Java 1.8 or any later major release
pub fn is_supported_version((major, minor, _): (u32, u32, u32)) -> bool {
    major > 1 || minor >= 8
}

/// Check that `java` exists and is recent enough
pub async fn detect_java(configured: Option<&Path>, timeout: Duration) -> RuntimeDetection {
    let java_path = if let Some(path) = configured {
        if path.exists() {
            path.to_path_buf()
        } else {
            return RuntimeDetection::NotFound(format!(
                "Configured Java path does not exist: {}",
                path.display()
            ));
        }
    } else {
        match which::which("java") {
            Ok(path) => path,
            Err(_) => {
                return RuntimeDetection::NotFound(
                    "java not found on PATH. Install a Java runtime or configure its path."
                        .to_string(),
                )
            }
        }
    };

    let mut cmd = Command::new(&java_path);
    cmd.arg("-version")
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    match tokio::time::timeout(timeout, cmd.output()).await {
        Ok(Ok(output)) => {
            // java prints its version on stderr
            let text = format!(
                "{}{}",
                String::from_utf8_lossy(&output.stderr),
                String::from_utf8_lossy(&output.stdout)
            );
            match parse_java_version(&text) {
                Some(version) if is_supported_version(version) => {
                    let version = format!("{}.{}.{}", version.0, version.1, version.2);
                    debug!(%version, path = %java_path.display(), "Detected Java runtime");
                    RuntimeDetection::Compatible { java_path, version }
                }
                Some((major, minor, patch)) => RuntimeDetection::Incompatible(format!(
                    "found Java {major}.{minor}.{patch} at {}",
                    java_path.display()
                )),
                None => RuntimeDetection::Incompatible(format!(
                    "could not read version from `{} -version`",
                    java_path.display()
                )),
            }
        }
        Ok(Err(e)) => RuntimeDetection::NotFound(format!(
            "Failed to execute {}: {}",
            java_path.display(),
            e
        )),
        Err(_) => RuntimeDetection::NotFound("java -version timed out".to_string()),
    }
}

/// Fail unless a usable Java runtime exists, when `template` launches one
pub async fn ensure_runtime(settings: &ManagerSettings, template: &str) -> Result<(), BackendError> {
    if !settings.check_runtime || !template.contains("$javaExe$") {
        return Ok(());
    }
    match detect_java(settings.tools.java.as_deref(), Duration::from_secs(10)).await {
        RuntimeDetection::Compatible { .. } => Ok(()),
        RuntimeDetection::Incompatible(msg) => Err(BackendError::RuntimeIncompatible(msg)),
        RuntimeDetection::NotFound(msg) => Err(BackendError::Startup(msg)),
    }
}
