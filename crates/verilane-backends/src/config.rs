//! Backend, stage and strategy configuration

use crate::error::BackendError;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

/// How a backend's processes are kept alive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum EngineKind {
    /// One process per verification
    #[default]
    None,
    /// Long-lived server reached through a lightweight client process
    PeerServer,
    /// Long-lived server reached over HTTP with streamed results
    HttpServer,
}

impl std::fmt::Display for EngineKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineKind::None => write!(f, "single-shot"),
            EngineKind::PeerServer => write!(f, "peer-server"),
            EngineKind::HttpServer => write!(f, "http-server"),
        }
    }
}

/// Outcome of a finished stage, used to select the next stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StageOutcome {
    ParsingError,
    TypeCheckingError,
    VerificationError,
    Success,
}

/// One step of a backend's pipeline
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct StageConfig {
    pub name: String,
    pub is_verification: bool,
    /// Entry point substituted for `$mainMethod$`
    pub main_method: String,
    /// Argument template, see [`crate::command`] for placeholders
    pub custom_arguments: String,
    pub on_parsing_error: Option<String>,
    pub on_type_checking_error: Option<String>,
    pub on_verification_error: Option<String>,
    pub on_success: Option<String>,
}

impl StageConfig {
    /// Name of the stage to run after this one finished with `outcome`
    pub fn next_stage(&self, outcome: StageOutcome) -> Option<&str> {
        let next = match outcome {
            StageOutcome::ParsingError => &self.on_parsing_error,
            StageOutcome::TypeCheckingError => &self.on_type_checking_error,
            StageOutcome::VerificationError => &self.on_verification_error,
            StageOutcome::Success => &self.on_success,
        };
        next.as_deref().filter(|name| !name.is_empty())
    }

    fn transitions(&self) -> impl Iterator<Item = &str> {
        [
            &self.on_parsing_error,
            &self.on_type_checking_error,
            &self.on_verification_error,
            &self.on_success,
        ]
        .into_iter()
        .filter_map(|next| next.as_deref())
        .filter(|name| !name.is_empty())
    }
}

/// A configured verification backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendConfig {
    pub name: String,
    /// Backend family, e.g. `silicon`, `carbon` or `other`
    #[serde(rename = "type", default = "default_backend_type")]
    pub backend_type: String,
    #[serde(default)]
    pub engine: EngineKind,
    pub stages: Vec<StageConfig>,
    /// Extra library paths, substituted for `$backendPaths$`
    #[serde(default)]
    pub paths: Vec<PathBuf>,
    /// Verification timeout in milliseconds
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    /// Grace period for stopping the backend in milliseconds
    #[serde(default)]
    pub stopping_timeout_ms: Option<u64>,
    /// Names of helper processes spawned below the server that outlive a job
    #[serde(default)]
    pub helper_chain: Vec<String>,
}

fn default_backend_type() -> String {
    "silicon".to_string()
}

impl BackendConfig {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.filter(|ms| *ms > 0).map(Duration::from_millis)
    }

    pub fn stopping_timeout(&self) -> Duration {
        self.stopping_timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(Duration::from_secs(5))
    }

    pub fn stage(&self, name: &str) -> Option<&StageConfig> {
        self.stages.iter().find(|stage| stage.name == name)
    }

    pub fn first_stage(&self) -> Option<&StageConfig> {
        self.stages.first()
    }

    pub fn is_carbon(&self) -> bool {
        self.backend_type.eq_ignore_ascii_case("carbon")
    }

    /// Check that the stage graph is well formed
    pub fn validate(&self) -> Result<(), BackendError> {
        if self.name.trim().is_empty() {
            return Err(BackendError::Configuration(
                "backend name must not be empty".to_string(),
            ));
        }
        if self.stages.is_empty() {
            return Err(BackendError::Configuration(format!(
                "backend '{}' has no stages",
                self.name
            )));
        }

        let mut names = HashSet::new();
        for stage in &self.stages {
            if stage.name.trim().is_empty() {
                return Err(BackendError::Configuration(format!(
                    "backend '{}' has a stage without a name",
                    self.name
                )));
            }
            if !names.insert(stage.name.as_str()) {
                return Err(BackendError::Configuration(format!(
                    "backend '{}' defines stage '{}' twice",
                    self.name, stage.name
                )));
            }
        }

        for stage in &self.stages {
            for target in stage.transitions() {
                if !names.contains(target) {
                    return Err(BackendError::Configuration(format!(
                        "stage '{}' of backend '{}' refers to unknown stage '{}'",
                        stage.name, self.name, target
                    )));
                }
            }
        }

        if !self.stages.iter().any(|stage| stage.is_verification) {
            return Err(BackendError::Configuration(format!(
                "backend '{}' has no verification stage",
                self.name
            )));
        }
        Ok(())
    }
}

/// Paths to external tools substituted into stage commands
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct ToolPaths {
    /// Java executable (looked up on `PATH` when absent)
    pub java: Option<PathBuf>,
    pub z3: Option<PathBuf>,
    pub boogie: Option<PathBuf>,
}

/// Settings for the single-shot strategy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SingleShotSettings {
    /// Command prefix; the stage's custom arguments are appended
    pub command_template: String,
}

impl Default for SingleShotSettings {
    fn default() -> Self {
        Self {
            command_template: "$javaExe$ -Xss128m -cp $backendPaths$ $mainMethod$".to_string(),
        }
    }
}

/// Settings for the peer-server strategy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PeerServerSettings {
    pub port: u16,
    /// Command that launches the long-lived server
    pub server_template: String,
    /// Client invocation prefix shared by stage runs, probes and shutdown
    pub client_template: String,
    /// Entry point the probe asks for; it must not exist on the server
    pub probe_target: String,
    /// Output that proves the server answered the probe
    pub probe_marker: String,
    /// Client argument asking the server to exit
    pub shutdown_argument: String,
    pub probe_interval_ms: u64,
    pub probe_attempts: u32,
}

impl Default for PeerServerSettings {
    fn default() -> Self {
        Self {
            port: 7654,
            server_template: "$javaExe$ -Xss128m -cp $backendPaths$ -server \
                              com.martiansoftware.nailgun.NGServer 127.0.0.1:$serverPort$"
                .to_string(),
            client_template: "ng --nailgun-port $serverPort$".to_string(),
            probe_target: "verilane.LivenessProbe".to_string(),
            probe_marker: "ClassNotFoundException".to_string(),
            shutdown_argument: "ng-stop".to_string(),
            probe_interval_ms: 200,
            probe_attempts: 20,
        }
    }
}

impl PeerServerSettings {
    pub fn probe_interval(&self) -> Duration {
        Duration::from_millis(self.probe_interval_ms)
    }
}

/// Whether the HTTP strategy launches its server or uses a running one
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum HttpServerPolicy {
    /// Launch the server and read its address from its output
    Create { command_template: String },
    /// Connect to a server at `address`, e.g. `http://localhost:8080`
    Attach { address: String },
}

impl Default for HttpServerPolicy {
    fn default() -> Self {
        HttpServerPolicy::Create {
            command_template: "$javaExe$ -Xss128m -cp $backendPaths$ \
                               viper.server.ViperServerRunner --serverMode http --port 0"
                .to_string(),
        }
    }
}

/// Settings for the HTTP-server strategy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct HttpServerSettings {
    pub policy: HttpServerPolicy,
}

/// Everything the process manager needs besides the backend itself
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ManagerSettings {
    pub tools: ToolPaths,
    pub disable_caching: bool,
    /// Check `java -version` before launching JVM based commands
    pub check_runtime: bool,
    /// Upper bound for a backend start in milliseconds
    pub start_timeout_ms: u64,
    pub single_shot: SingleShotSettings,
    pub peer_server: PeerServerSettings,
    pub http_server: HttpServerSettings,
}

impl Default for ManagerSettings {
    fn default() -> Self {
        Self {
            tools: ToolPaths::default(),
            disable_caching: false,
            check_runtime: true,
            start_timeout_ms: 60_000,
            single_shot: SingleShotSettings::default(),
            peer_server: PeerServerSettings::default(),
            http_server: HttpServerSettings::default(),
        }
    }
}

impl ManagerSettings {
    pub fn start_timeout(&self) -> Duration {
        Duration::from_millis(self.start_timeout_ms)
    }
}
