//! OS process helpers: streaming spawn, child discovery and tree kill

use crate::command::CommandLine;
use crate::error::BackendError;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::sync::{mpsc, watch};
use tracing::{debug, trace, warn};

/// Output and exit of a stage, in the order they happened
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageEvent {
    Stdout(String),
    Stderr(String),
    /// The stream to the backend broke before the stage finished
    Failed(String),
    /// The stage ended; `None` when no exit code is available
    Exited(Option<i32>),
}

/// A child process whose output is forwarded as [`StageEvent`]s
#[derive(Debug)]
pub struct SpawnedProcess {
    pub pid: u32,
    pub events: mpsc::Receiver<StageEvent>,
    pub exited: ExitWatch,
}

/// Resolves once the process has exited
#[derive(Debug, Clone)]
pub struct ExitWatch(watch::Receiver<bool>);

impl ExitWatch {
    pub fn has_exited(&self) -> bool {
        *self.0.borrow()
    }

    /// Wait until the process exited; false if `limit` elapsed first
    pub async fn wait(&mut self, limit: Duration) -> bool {
        let reached = match tokio::time::timeout(limit, self.0.wait_for(|exited| *exited)).await {
            Ok(Ok(_)) => true,
            Ok(Err(_)) | Err(_) => false,
        };
        reached || self.has_exited()
    }
}

/// Decodes a byte stream as UTF-8, carrying incomplete sequences over to the
/// next chunk instead of mangling them.
#[derive(Debug, Default)]
pub struct Utf8Chunker {
    pending: Vec<u8>,
}

impl Utf8Chunker {
    pub fn push(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);
        let mut out = String::new();
        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(text) => {
                    out.push_str(text);
                    self.pending.clear();
                    break;
                }
                Err(e) => {
                    let valid = e.valid_up_to();
                    out.push_str(&String::from_utf8_lossy(&self.pending[..valid]));
                    match e.error_len() {
                        None => {
                            self.pending.drain(..valid);
                            break;
                        }
                        Some(len) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            self.pending.drain(..valid + len);
                        }
                    }
                }
            }
        }
        out
    }

    /// Flush whatever is left, replacing an incomplete tail
    pub fn finish(&mut self) -> String {
        let rest = String::from_utf8_lossy(&self.pending).to_string();
        self.pending.clear();
        rest
    }
}

async fn forward<R>(mut reader: R, tx: mpsc::Sender<StageEvent>, wrap: fn(String) -> StageEvent)
where
    R: AsyncRead + Unpin,
{
    let mut chunker = Utf8Chunker::default();
    let mut buf = vec![0u8; 8192];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                let text = chunker.push(&buf[..n]);
                if !text.is_empty() {
                    trace!(bytes = n, "Process output chunk");
                    // keep draining after the receiver is gone so the child never blocks
                    let _ = tx.send(wrap(text)).await;
                }
            }
            Err(e) => {
                debug!("Reading process output failed: {}", e);
                break;
            }
        }
    }
    let rest = chunker.finish();
    if !rest.is_empty() {
        let _ = tx.send(wrap(rest)).await;
    }
}

/// Spawn `command` with piped output.
///
/// Output chunks arrive as they are read. [`StageEvent::Exited`] is sent
/// after both output streams are closed.
pub fn spawn_streaming(
    command: &CommandLine,
    working_dir: Option<&Path>,
) -> Result<SpawnedProcess, BackendError> {
    let mut cmd = command.to_command();
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = working_dir {
        cmd.current_dir(dir);
    }

    debug!(%command, "Spawning process");
    let mut child = cmd
        .spawn()
        .map_err(|e| BackendError::Startup(format!("{}: {}", command.program, e)))?;
    let pid = child
        .id()
        .ok_or_else(|| BackendError::Startup(format!("{} exited immediately", command.program)))?;

    let (tx, rx) = mpsc::channel(256);
    let (exit_tx, exit_rx) = watch::channel(false);

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let out_tx = tx.clone();
    let err_tx = tx.clone();

    tokio::spawn(async move {
        let (status, (), ()) = tokio::join!(
            child.wait(),
            async {
                if let Some(handle) = stdout {
                    forward(handle, out_tx, StageEvent::Stdout).await;
                }
            },
            async {
                if let Some(handle) = stderr {
                    forward(handle, err_tx, StageEvent::Stderr).await;
                }
            }
        );
        let code = match status {
            Ok(status) => status.code(),
            Err(e) => {
                warn!(pid, "Waiting for process failed: {}", e);
                None
            }
        };
        debug!(pid, ?code, "Process exited");
        let _ = exit_tx.send(true);
        let _ = tx.send(StageEvent::Exited(code)).await;
    });

    Ok(SpawnedProcess {
        pid,
        events: rx,
        exited: ExitWatch(exit_rx),
    })
}

/// A process found below another one
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildProcess {
    pub pid: u32,
    pub name: String,
}

/// Parse `pgrep -l -P <pid>` output (`<pid> <name>` per line)
pub fn parse_pgrep_listing(output: &str) -> Vec<ChildProcess> {
    output
        .lines()
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            let pid = parts.next()?.parse().ok()?;
            let name = parts.collect::<Vec<_>>().join(" ");
            Some(ChildProcess { pid, name })
        })
        .collect()
}

/// Parse `wmic ... get Name,ProcessId` output.
///
/// The header line is skipped; the process id is the last column.
pub fn parse_wmic_listing(output: &str) -> Vec<ChildProcess> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter_map(|line| {
            let (name, pid) = line.rsplit_once(char::is_whitespace)?;
            let pid = pid.parse().ok()?;
            Some(ChildProcess {
                pid,
                name: name.trim().to_string(),
            })
        })
        .collect()
}

async fn run_quiet(program: &str, args: &[String]) -> Option<std::process::Output> {
    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    match tokio::time::timeout(Duration::from_secs(10), cmd.output()).await {
        Ok(Ok(output)) => Some(output),
        Ok(Err(e)) => {
            debug!(program, "Process helper failed: {}", e);
            None
        }
        Err(_) => {
            warn!(program, "Process helper timed out");
            None
        }
    }
}

/// Direct children of `pid`
pub async fn child_processes(pid: u32) -> Vec<ChildProcess> {
    if cfg!(windows) {
        let args = vec![
            "process".to_string(),
            "where".to_string(),
            format!("ParentProcessId={pid}"),
            "get".to_string(),
            "Name,ProcessId".to_string(),
        ];
        run_quiet("wmic", &args)
            .await
            .map(|out| parse_wmic_listing(&String::from_utf8_lossy(&out.stdout)))
            .unwrap_or_default()
    } else {
        let args = vec!["-l".to_string(), "-P".to_string(), pid.to_string()];
        run_quiet("pgrep", &args)
            .await
            .map(|out| parse_pgrep_listing(&String::from_utf8_lossy(&out.stdout)))
            .unwrap_or_default()
    }
}

/// All descendants of `pid`, parents before children
pub async fn descendants(pid: u32) -> Vec<u32> {
    let mut found = Vec::new();
    let mut frontier = vec![pid];
    while let Some(parent) = frontier.pop() {
        for child in child_processes(parent).await {
            if child.pid != pid && !found.contains(&child.pid) {
                found.push(child.pid);
                frontier.push(child.pid);
            }
        }
    }
    found
}

fn name_matches(process: &str, wanted: &str) -> bool {
    let process = process.trim();
    process.eq_ignore_ascii_case(wanted)
        || Path::new(process)
            .file_stem()
            .is_some_and(|stem| stem.to_string_lossy().eq_ignore_ascii_case(wanted))
}

/// Walk a chain of process names below `root`.
///
/// The first name is matched among the children of `root`, the second among
/// the children of those matches, and so on. Every matching pid is returned.
pub async fn find_child_chain(root: u32, chain: &[String]) -> Vec<u32> {
    let mut found = Vec::new();
    let mut parents = vec![root];
    for wanted in chain {
        let mut next = Vec::new();
        for parent in &parents {
            for child in child_processes(*parent).await {
                if name_matches(&child.name, wanted) {
                    next.push(child.pid);
                }
            }
        }
        if next.is_empty() {
            break;
        }
        found.extend(next.iter().copied());
        parents = next;
    }
    found
}

/// The pid of the JVM started by a launched server command.
///
/// On Linux and Windows the launched process may be a wrapper whose `java`
/// child is the actual server; on macOS the launched pid is used as is.
pub async fn discover_server_pid(launched: u32) -> u32 {
    if cfg!(target_os = "macos") {
        return launched;
    }
    child_processes(launched)
        .await
        .into_iter()
        .find(|child| name_matches(&child.name, "java"))
        .map(|child| child.pid)
        .unwrap_or(launched)
}

/// Force-kill `pid` and every process below it.
///
/// The kill commands are awaited before this returns.
pub async fn kill_process_tree(pid: u32) -> Result<(), BackendError> {
    if cfg!(windows) {
        // children first, then the process itself
        for filter in [format!("ParentProcessId={pid}"), format!("ProcessId={pid}")] {
            let args = vec![
                "process".to_string(),
                "where".to_string(),
                filter,
                "call".to_string(),
                "terminate".to_string(),
            ];
            if run_quiet("wmic", &args).await.is_none() {
                return Err(BackendError::Communication(format!(
                    "wmic could not terminate process {pid}"
                )));
            }
        }
        return Ok(());
    }

    let mut tree = descendants(pid).await;
    debug!(pid, descendants = tree.len(), "Killing process tree");
    tree.reverse();
    for child in tree {
        let args = vec!["-KILL".to_string(), "-P".to_string(), child.to_string()];
        run_quiet("pkill", &args).await;
        let args = vec!["-KILL".to_string(), child.to_string()];
        run_quiet("kill", &args).await;
    }
    let args = vec!["-KILL".to_string(), "-P".to_string(), pid.to_string()];
    run_quiet("pkill", &args).await;
    let args = vec!["-KILL".to_string(), pid.to_string()];
    match run_quiet("kill", &args).await {
        Some(_) => Ok(()),
        None => Err(BackendError::Communication(format!(
            "kill could not terminate process {pid}"
        ))),
    }
}

/// Kill every pid in `pids` together with its subtree, logging failures
pub async fn kill_all(pids: &[u32]) {
    for pid in pids {
        if let Err(e) = kill_process_tree(*pid).await {
            warn!(pid, "Failed to kill helper process: {}", e);
        }
    }
}
