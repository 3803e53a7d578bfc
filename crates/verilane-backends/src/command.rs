//! Stage command construction
//!
//! Commands are written as templates with `$name$` placeholders:
//!
//! | placeholder | value |
//! |---|---|
//! | `$javaExe$`, `$z3Exe$`, `$boogieExe$` | tool executables |
//! | `$mainMethod$` | the stage's entry point |
//! | `$backendPaths$` | backend library paths joined with the platform separator |
//! | `$fileToVerify$` | the file under verification |
//! | `$disableCaching$` | `--disableCaching` when caching is disabled |
//! | `$serverPort$` | port of the peer server |
//!
//! Templates are split into arguments before substitution, so substituted
//! paths containing spaces stay a single argument.

use crate::config::ToolPaths;
use std::path::{Path, PathBuf};
use tokio::process::Command;

/// Separator between entries of a Java class path
pub const CLASSPATH_SEPARATOR: &str = if cfg!(windows) { ";" } else { ":" };

/// Values available to a template
#[derive(Debug, Clone, Default)]
pub struct CommandContext {
    pub java: String,
    pub z3: String,
    pub boogie: String,
    pub main_method: String,
    pub backend_paths: String,
    pub file: Option<PathBuf>,
    pub disable_caching: bool,
    pub server_port: Option<u16>,
}

impl CommandContext {
    /// Build a context from the configured tools and backend paths
    pub fn new(tools: &ToolPaths, backend_paths: &[PathBuf]) -> Self {
        Self {
            java: resolve_tool(tools.java.as_deref(), "java"),
            z3: resolve_tool(tools.z3.as_deref(), "z3"),
            boogie: resolve_tool(tools.boogie.as_deref(), "boogie"),
            backend_paths: join_classpath(backend_paths),
            ..Default::default()
        }
    }

    pub fn with_main_method(mut self, main_method: &str) -> Self {
        self.main_method = main_method.to_string();
        self
    }

    pub fn with_file(mut self, file: &Path) -> Self {
        self.file = Some(file.to_path_buf());
        self
    }

    pub fn with_caching_disabled(mut self, disabled: bool) -> Self {
        self.disable_caching = disabled;
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.server_port = Some(port);
        self
    }

    /// Substitute every known placeholder in `text`
    pub fn expand(&self, text: &str) -> String {
        let file = self
            .file
            .as_ref()
            .map(|path| path.to_string_lossy().to_string())
            .unwrap_or_default();
        let port = self.server_port.map(|p| p.to_string()).unwrap_or_default();
        let caching = if self.disable_caching {
            "--disableCaching"
        } else {
            ""
        };

        text.replace("$javaExe$", &self.java)
            .replace("$z3Exe$", &self.z3)
            .replace("$boogieExe$", &self.boogie)
            .replace("$mainMethod$", &self.main_method)
            .replace("$backendPaths$", &self.backend_paths)
            .replace("$fileToVerify$", &file)
            .replace("$disableCaching$", caching)
            .replace("$serverPort$", &port)
    }

    /// Split `template` into arguments and expand each of them.
    ///
    /// Arguments that consisted only of placeholders expanding to nothing
    /// are dropped.
    pub fn expand_arguments(&self, template: &str) -> Vec<String> {
        split_arguments(template)
            .into_iter()
            .filter_map(|arg| {
                let expanded = self.expand(&arg);
                if expanded.is_empty() && !arg.is_empty() {
                    None
                } else {
                    Some(expanded)
                }
            })
            .collect()
    }
}

fn resolve_tool(configured: Option<&Path>, name: &str) -> String {
    match configured {
        Some(path) => path.to_string_lossy().to_string(),
        None => which::which(name)
            .map(|path| path.to_string_lossy().to_string())
            .unwrap_or_else(|_| name.to_string()),
    }
}

/// Join backend library paths into a class path.
///
/// Directories contribute the `.jar` files they contain, sorted by name.
pub fn join_classpath(paths: &[PathBuf]) -> String {
    let mut entries = Vec::new();
    for path in paths {
        if path.is_dir() {
            let mut jars: Vec<PathBuf> = std::fs::read_dir(path)
                .map(|dir| {
                    dir.filter_map(Result::ok)
                        .map(|entry| entry.path())
                        .filter(|p| p.extension().is_some_and(|ext| ext == "jar"))
                        .collect()
                })
                .unwrap_or_default();
            jars.sort();
            entries.extend(jars.into_iter().map(|p| p.to_string_lossy().to_string()));
        } else {
            entries.push(path.to_string_lossy().to_string());
        }
    }
    entries.join(CLASSPATH_SEPARATOR)
}

/// Split a command line into arguments, honouring single and double quotes
/// and backslash escapes inside double quotes.
pub fn split_arguments(line: &str) -> Vec<String> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut in_arg = false;
    let mut quote: Option<char> = None;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match quote {
            Some(q) if c == q => quote = None,
            Some('"') if c == '\\' => match chars.peek() {
                Some(&next) if next == '"' || next == '\\' => {
                    current.push(next);
                    chars.next();
                }
                _ => current.push(c),
            },
            Some(_) => current.push(c),
            None if c == '"' || c == '\'' => {
                quote = Some(c);
                in_arg = true;
            }
            None if c.is_whitespace() => {
                if in_arg {
                    args.push(std::mem::take(&mut current));
                    in_arg = false;
                }
            }
            None => {
                current.push(c);
                in_arg = true;
            }
        }
    }
    if in_arg {
        args.push(current);
    }
    args
}

/// Quote an argument so [`split_arguments`] yields it back unchanged
pub fn quote_argument(arg: &str) -> String {
    if !arg.is_empty() && !arg.chars().any(|c| c.is_whitespace() || c == '"' || c == '\'') {
        return arg.to_string();
    }
    let escaped = arg.replace('\\', "\\\\").replace('"', "\\\"");
    format!("\"{escaped}\"")
}

/// A fully expanded command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandLine {
    /// Build from expanded arguments; `None` when there is no program
    pub fn from_args(mut args: Vec<String>) -> Option<Self> {
        if args.is_empty() {
            return None;
        }
        let program = args.remove(0);
        Some(Self { program, args })
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn to_command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        cmd
    }

    /// Arguments after the program, quoted and space separated
    pub fn joined_args(&self) -> String {
        self.args
            .iter()
            .map(|arg| quote_argument(arg))
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub fn uses_program(&self, name: &str) -> bool {
        Path::new(&self.program)
            .file_stem()
            .is_some_and(|stem| stem.eq_ignore_ascii_case(name))
    }
}

impl std::fmt::Display for CommandLine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", quote_argument(&self.program))?;
        for arg in &self.args {
            write!(f, " {}", quote_argument(arg))?;
        }
        Ok(())
    }
}
