//! Verification runs against a scripted backend

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use verilane::{
    Controller, Notification, Outcome, SessionError, SessionSettings, StateChange,
    VerificationState,
};
use verilane_backends::{
    BackendConfig, BackendError, BackendService, EngineKind, JobRef, StageConfig, StageEvent,
    StageRun,
};
use verilane_trace::StepType;

// ============================================================================
// Scripted backend
// ============================================================================

struct Script {
    events: Vec<StageEvent>,
    /// Keep the stage running after the scripted events
    hang: bool,
}

fn exits(events: Vec<StageEvent>) -> Script {
    Script {
        events,
        hang: false,
    }
}

fn hangs(events: Vec<StageEvent>) -> Script {
    Script { events, hang: true }
}

#[derive(Default)]
struct FakeService {
    ready: AtomicBool,
    scripts: Mutex<HashMap<String, VecDeque<Script>>>,
    started: Mutex<Vec<String>>,
    held: Mutex<Vec<mpsc::Sender<StageEvent>>>,
    stops: AtomicUsize,
    stopped_jobs: Mutex<Vec<Option<JobRef>>>,
    next_pid: AtomicU32,
    /// When set, spawning a stage waits for this gate
    spawn_gate: Mutex<Option<Arc<Notify>>>,
}

impl FakeService {
    fn script(&self, stage: &str, script: Script) {
        self.scripts
            .lock()
            .unwrap()
            .entry(stage.to_string())
            .or_default()
            .push_back(script);
    }

    fn started(&self) -> Vec<String> {
        self.started.lock().unwrap().clone()
    }

    fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    fn stopped_jobs(&self) -> Vec<Option<JobRef>> {
        self.stopped_jobs.lock().unwrap().clone()
    }

    fn hold_spawns(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.spawn_gate.lock().unwrap() = Some(Arc::clone(&gate));
        gate
    }
}

#[async_trait]
impl BackendService for FakeService {
    fn engine(&self) -> EngineKind {
        EngineKind::None
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    async fn start(&self, _backend: &BackendConfig) -> Result<(), BackendError> {
        self.ready.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn stop(&self) -> Result<(), BackendError> {
        self.ready.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn stop_verification(&self, job: Option<JobRef>) -> Result<(), BackendError> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        self.stopped_jobs.lock().unwrap().push(job);
        self.held.lock().unwrap().clear();
        Ok(())
    }

    async fn start_stage_process(
        &self,
        _file: &Path,
        stage: &StageConfig,
    ) -> Result<StageRun, BackendError> {
        self.started.lock().unwrap().push(stage.name.clone());
        let gate = self.spawn_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        let script = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(&stage.name)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| exits(vec![StageEvent::Exited(Some(0))]));

        let (tx, rx) = mpsc::channel(64);
        if script.hang {
            self.held.lock().unwrap().push(tx.clone());
        }
        tokio::spawn(async move {
            for event in script.events {
                if tx.send(event).await.is_err() {
                    break;
                }
            }
        });
        let pid = 1000 + self.next_pid.fetch_add(1, Ordering::SeqCst);
        Ok(StageRun {
            job: JobRef::Process { pid },
            events: rx,
        })
    }
}

// ============================================================================
// Fixtures
// ============================================================================

const FILE: &str = "file:///work/list.vpr";

fn stdout(text: &str) -> StageEvent {
    StageEvent::Stdout(text.to_string())
}

fn statistics(methods: u32) -> StageEvent {
    stdout(&format!(
        "{{\"msg_type\":\"statistics\",\"msg_body\":{{\"methods\":{methods},\"functions\":0,\"predicates\":0}}}}\n"
    ))
}

fn method_verified(name: &str) -> StageEvent {
    stdout(&format!(
        "{{\"msg_type\":\"verification_result\",\"msg_body\":{{\"status\":\"success\",\"kind\":\"for_entity\",\"details\":{{\"entity\":{{\"type\":\"method\",\"name\":\"{name}\"}}}}}}}}\n"
    ))
}

fn method_failed(name: &str, start: &str, end: &str) -> StageEvent {
    stdout(&format!(
        "{{\"msg_type\":\"verification_result\",\"msg_body\":{{\"status\":\"failure\",\"kind\":\"for_entity\",\"verifier\":\"silicon\",\"details\":{{\"entity\":{{\"type\":\"method\",\"name\":\"{name}\"}},\"result\":{{\"errors\":[{{\"tag\":\"assert.failed\",\"text\":\"Assertion might not hold.\",\"position\":{{\"start\":\"{start}\",\"end\":\"{end}\"}}}}]}}}}}}}}\n"
    ))
}

fn overall(status: &str, millis: u64) -> StageEvent {
    stdout(&format!(
        "{{\"msg_type\":\"verification_result\",\"msg_body\":{{\"status\":\"{status}\",\"kind\":\"overall\",\"verifier\":\"silicon\",\"details\":{{\"time\":{millis},\"result\":{{\"errors\":[]}}}}}}}}\n"
    ))
}

const EXECUTION_LOG: &str = r#"var executionTreeData = [
  {"kind": "Method", "value": "main", "children": [
    {"type": "execute", "pos": "2:3", "value": "var x: Ref", "children": [
      {"type": "evaluate", "pos": "2:10", "value": "new()"}
    ]},
    {"type": "consume", "pos": "4:5", "value": "acc(x.f)", "prestate": {
      "store": [{"name": "x", "type": "Ref", "value": "x@1"}],
      "heap": ["x@1.f -> 2 # W"], "oldHeap": [], "pcs": ["x@1 != Null"]}}
  ]}
];"#;

fn stage(name: &str, is_verification: bool) -> StageConfig {
    StageConfig {
        name: name.to_string(),
        is_verification,
        main_method: "viper.silicon.SiliconRunner".to_string(),
        ..Default::default()
    }
}

fn backend(stages: Vec<StageConfig>) -> BackendConfig {
    BackendConfig {
        name: "silicon".to_string(),
        backend_type: "silicon".to_string(),
        engine: EngineKind::None,
        stages,
        paths: Vec::new(),
        timeout_ms: None,
        stopping_timeout_ms: None,
        helper_chain: Vec::new(),
    }
}

struct Harness {
    controller: Controller,
    rx: mpsc::UnboundedReceiver<Notification>,
    service: Arc<FakeService>,
    _dir: tempfile::TempDir,
}

async fn harness(backend: BackendConfig, log: Option<&str>, scripts: Vec<(&str, Script)>) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let log_path = dir.path().join("executionTreeData.js");
    if let Some(log) = log {
        std::fs::write(&log_path, log).unwrap();
    }
    let settings = SessionSettings {
        workspace_root: dir.path().to_path_buf(),
        execution_log_path: Some(log_path),
        ..Default::default()
    };
    let (controller, rx) = Controller::new(settings);
    let service = Arc::new(FakeService::default());
    for (stage, script) in scripts {
        service.script(stage, script);
    }
    controller
        .select_backend_with(backend, service.clone())
        .await
        .unwrap();
    Harness {
        controller,
        rx,
        service,
        _dir: dir,
    }
}

/// Collect notifications up to the completion of `file`'s run
async fn until_finished(
    rx: &mut mpsc::UnboundedReceiver<Notification>,
    file: &str,
) -> (Vec<Notification>, StateChange) {
    let mut seen = Vec::new();
    loop {
        let notification = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("run did not finish")
            .expect("channel closed");
        if let Notification::StateChange(change) = &notification {
            if change.file.as_deref() == Some(file)
                && change.new_state == VerificationState::Ready
                && change.success.is_some()
            {
                return (seen, change.clone());
            }
        }
        seen.push(notification);
    }
}

/// Wait until `file`'s run announced a running stage
async fn until_running(rx: &mut mpsc::UnboundedReceiver<Notification>, file: &str) {
    loop {
        let notification = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("stage did not start")
            .expect("channel closed");
        if let Notification::StateChange(change) = notification {
            if change.file.as_deref() == Some(file)
                && change.new_state == VerificationState::VerificationRunning
            {
                return;
            }
        }
    }
}

fn progress_values(notifications: &[Notification]) -> Vec<f64> {
    notifications
        .iter()
        .filter_map(|n| match n {
            Notification::StateChange(change) => change.progress,
            _ => None,
        })
        .collect()
}

// ============================================================================
// Runs
// ============================================================================

#[tokio::test]
async fn test_successful_run_reports_progress_and_ready() {
    let mut h = harness(
        backend(vec![stage("verify", true)]),
        None,
        vec![(
            "verify",
            exits(vec![
                statistics(2),
                method_verified("append"),
                method_verified("length"),
                overall("success", 900),
                StageEvent::Exited(Some(0)),
            ]),
        )],
    )
    .await;

    assert!(h.controller.verify(FILE, true).await.unwrap());
    let (seen, ready) = until_finished(&mut h.rx, FILE).await;

    assert_eq!(ready.success, Some(Outcome::Success));
    assert_eq!(ready.error_count, Some(0));
    assert_eq!(ready.time, Some(0.9));
    assert_eq!(ready.verification_completed, Some(true));
    assert_eq!(ready.manually_triggered, Some(true));

    let progress = progress_values(&seen);
    assert!(progress.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(progress.last(), Some(&100.0));
    assert!(seen.iter().any(|n| matches!(
        n,
        Notification::StateChange(c) if c.new_state == VerificationState::PostProcessing
    )));
    assert!(!h.controller.is_running(FILE).await);
    assert_eq!(h.controller.last_outcome(FILE).await, Some(Outcome::Success));
}

#[tokio::test]
async fn test_failed_run_decorates_trace_and_navigates() {
    let mut h = harness(
        backend(vec![stage("verify", true)]),
        Some(EXECUTION_LOG),
        vec![(
            "verify",
            exits(vec![
                statistics(1),
                method_failed("main", "4:5", "4:13"),
                overall("failure", 1200),
                StageEvent::Exited(Some(1)),
            ]),
        )],
    )
    .await;

    h.controller.verify(FILE, false).await.unwrap();
    let (seen, ready) = until_finished(&mut h.rx, FILE).await;
    assert_eq!(ready.success, Some(Outcome::VerificationFailed));
    assert_eq!(ready.error_count, Some(1));

    let diagnostics = seen
        .iter()
        .rev()
        .find_map(|n| match n {
            Notification::Diagnostics { diagnostics, .. } => Some(diagnostics.clone()),
            _ => None,
        })
        .unwrap();
    assert_eq!(diagnostics.len(), 1);
    assert_eq!(diagnostics[0].message, "Assertion might not hold.");

    let (decorations, global_info) = seen
        .iter()
        .find_map(|n| match n {
            Notification::Decorations {
                decorations,
                global_info,
                ..
            } => Some((decorations.clone(), global_info.clone())),
            _ => None,
        })
        .unwrap();
    assert_eq!(decorations.len(), 3);
    assert!(global_info.contains("EXECUTE 2:3"));
    let error = decorations.iter().find(|d| d.is_error_state).unwrap();

    let graph = h.controller.heap_graph(FILE, error.client_index).await.unwrap();
    assert!(graph.is_error_state);
    assert_eq!(graph.unit_name, "main");
    assert_eq!(graph.heap.len(), 1);

    let path = h
        .controller
        .execution_path(FILE, error.client_index)
        .await
        .unwrap();
    assert_eq!(path[0], error.client_index);
    assert_eq!(path.len(), 2);

    let back = h
        .controller
        .move_debugger(FILE, error.client_index, StepType::Back)
        .await
        .unwrap();
    assert_eq!(back.client_index, path[1]);
    let continued = h
        .controller
        .move_debugger(FILE, back.client_index, StepType::Continue)
        .await
        .unwrap();
    assert_eq!(continued.client_index, error.client_index);

    assert!(matches!(
        h.controller.move_debugger(FILE, 99, StepType::Next).await,
        Err(SessionError::InvalidClientIndex(99))
    ));
}

#[tokio::test]
async fn test_stage_chaining_reruns_verification_once() {
    let mut verify = stage("verify", true);
    verify.on_verification_error = Some("fix".to_string());
    let mut fix = stage("fix", false);
    fix.on_success = Some("verify".to_string());

    let mut h = harness(
        backend(vec![verify, fix]),
        None,
        vec![
            (
                "verify",
                exits(vec![
                    statistics(1),
                    method_failed("main", "3:1", "3:9"),
                    overall("failure", 100),
                    StageEvent::Exited(Some(1)),
                ]),
            ),
            ("fix", exits(vec![stdout("rewrote 1 file\n"), StageEvent::Exited(Some(0))])),
            (
                "verify",
                exits(vec![
                    statistics(1),
                    method_failed("main", "3:1", "3:9"),
                    overall("failure", 100),
                    StageEvent::Exited(Some(1)),
                ]),
            ),
        ],
    )
    .await;

    h.controller.verify(FILE, true).await.unwrap();
    let (_, ready) = until_finished(&mut h.rx, FILE).await;
    assert_eq!(h.service.started(), vec!["verify", "fix", "verify"]);
    // diagnostics of the last verification stage only
    assert_eq!(ready.error_count, Some(1));
    assert_eq!(ready.success, Some(Outcome::VerificationFailed));
}

#[tokio::test]
async fn test_abort_reports_aborted_without_completion() {
    let mut h = harness(
        backend(vec![stage("verify", true)]),
        None,
        vec![("verify", hangs(vec![statistics(3)]))],
    )
    .await;

    h.controller.verify(FILE, true).await.unwrap();
    until_running(&mut h.rx, FILE).await;
    assert!(h.controller.stop_verification(FILE).await.unwrap());

    let (_, ready) = until_finished(&mut h.rx, FILE).await;
    assert_eq!(ready.success, Some(Outcome::Aborted));
    assert_eq!(ready.verification_completed, Some(false));
    assert_eq!(h.service.stops(), 1);
    assert!(!h.controller.stop_verification(FILE).await.unwrap());
}

#[tokio::test]
async fn test_abort_while_spawning_stops_the_late_job() {
    let mut h = harness(
        backend(vec![stage("verify", true)]),
        None,
        vec![("verify", hangs(vec![statistics(1)]))],
    )
    .await;
    let gate = h.service.hold_spawns();

    h.controller.verify(FILE, true).await.unwrap();
    until_running(&mut h.rx, FILE).await;
    while h.service.started().is_empty() {
        tokio::task::yield_now().await;
    }
    assert!(h.controller.stop_verification(FILE).await.unwrap());
    let (_, ready) = until_finished(&mut h.rx, FILE).await;
    assert_eq!(ready.success, Some(Outcome::Aborted));
    assert_eq!(h.service.stopped_jobs(), vec![None]);

    // the spawn completes after the abort and its job is stopped by the run
    gate.notify_one();
    tokio::time::timeout(Duration::from_secs(5), async {
        while h.service.stops() < 2 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("late job was never stopped");
    assert_eq!(
        h.service.stopped_jobs(),
        vec![None, Some(JobRef::Process { pid: 1000 })]
    );
    assert_eq!(h.controller.state(FILE).await, Some(VerificationState::Ready));
}

#[tokio::test]
async fn test_new_verification_stops_running_ones() {
    let other = "file:///work/tree.vpr";
    let mut h = harness(
        backend(vec![stage("verify", true)]),
        None,
        vec![
            ("verify", hangs(vec![statistics(1)])),
            ("verify", exits(vec![overall("success", 10), StageEvent::Exited(Some(0))])),
        ],
    )
    .await;

    h.controller.verify(FILE, true).await.unwrap();
    until_running(&mut h.rx, FILE).await;
    h.controller.verify(other, true).await.unwrap();

    let (_, aborted) = until_finished(&mut h.rx, FILE).await;
    assert_eq!(aborted.success, Some(Outcome::Aborted));
    let (_, ready) = until_finished(&mut h.rx, other).await;
    assert_eq!(ready.success, Some(Outcome::Success));
}

#[tokio::test]
async fn test_timeout_stops_the_job() {
    let mut config = backend(vec![stage("verify", true)]);
    config.timeout_ms = Some(100);
    let mut h = harness(config, None, vec![("verify", hangs(vec![statistics(1)]))]).await;

    h.controller.verify(FILE, true).await.unwrap();
    let (_, ready) = until_finished(&mut h.rx, FILE).await;
    assert_eq!(ready.success, Some(Outcome::Timeout));
    assert_eq!(ready.verification_completed, Some(false));
    assert_eq!(h.service.stops(), 1);
}

#[tokio::test]
async fn test_automatic_verification_refused_after_error() {
    let mut h = harness(
        backend(vec![stage("verify", true)]),
        None,
        vec![(
            "verify",
            exits(vec![
                StageEvent::Stderr("java.lang.NullPointerException\n".to_string()),
                StageEvent::Exited(Some(1)),
            ]),
        )],
    )
    .await;

    h.controller.verify(FILE, false).await.unwrap();
    let (seen, ready) = until_finished(&mut h.rx, FILE).await;
    assert_eq!(ready.success, Some(Outcome::Error));
    assert!(seen.iter().any(|n| matches!(n, Notification::Hint { .. })));

    assert!(!h.controller.verify(FILE, false).await.unwrap());
    let refused = h.rx.recv().await.unwrap();
    assert!(matches!(refused, Notification::VerificationNotStarted { file } if file == FILE));

    assert!(h.controller.verify(FILE, true).await.unwrap());
    let (_, ready) = until_finished(&mut h.rx, FILE).await;
    assert_eq!(ready.success, Some(Outcome::Success));
}

// ============================================================================
// Controller errors
// ============================================================================

#[tokio::test]
async fn test_operations_without_backend_or_trace() {
    let (controller, _rx) = Controller::new(SessionSettings::default());
    assert!(matches!(
        controller.verify(FILE, true).await,
        Err(SessionError::NoBackend)
    ));
    assert!(matches!(
        controller.select_backend("carbon").await,
        Err(SessionError::UnknownBackend(name)) if name == "carbon"
    ));
    assert!(matches!(
        controller.stop_verification(FILE).await,
        Err(SessionError::UnknownSession(_))
    ));

    controller.open(FILE).await;
    assert_eq!(controller.state(FILE).await, Some(VerificationState::Stopped));
    assert!(matches!(
        controller.execution_path(FILE, 0).await,
        Err(SessionError::NoTrace)
    ));
    controller.close(FILE).await.unwrap();
    assert_eq!(controller.state(FILE).await, None);
}

#[tokio::test]
async fn test_invalid_backend_is_rejected_before_start() {
    let (controller, _rx) = Controller::new(SessionSettings::default());
    let service = Arc::new(FakeService::default());
    let result = controller
        .select_backend_with(backend(vec![stage("fix", false)]), service.clone())
        .await;
    assert!(matches!(
        result,
        Err(SessionError::Backend(BackendError::Configuration(_)))
    ));
    assert!(!service.is_ready());
}
