//! HTTP strategy against an in-process fake verification server

use axum::extract::{Path as UrlPath, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use verilane_backends::{
    create_service, BackendConfig, BackendError, BackendService, EngineKind, HttpServerPolicy,
    JobRef, ManagerSettings, StageConfig, StageEvent,
};

const RESULTS: &str = concat!(
    r#"{"msg_type":"statistics","msg_body":{"methods":2,"functions":0,"predicates":1}}"#,
    "\n",
    r#"{"msg_type":"verification_result","msg_body":{"status":"success","kind":"overall","details":{"time":1200}}}"#,
);

#[derive(Clone, Default)]
struct Recorded {
    args: Arc<Mutex<Vec<String>>>,
    discarded: Arc<Mutex<Vec<u64>>>,
    flushed: Arc<Mutex<Vec<Value>>>,
    /// Drop the connection instead of answering a discard
    drop_discard: Arc<AtomicBool>,
}

async fn verify(State(rec): State<Recorded>, Json(body): Json<Value>) -> Json<Value> {
    let arg = body["arg"].as_str().unwrap_or_default().to_string();
    rec.args.lock().unwrap().push(arg.clone());
    if arg.contains("--bogus") {
        Json(json!({"msg": "invalid arguments for backend"}))
    } else {
        Json(json!({"id": 7}))
    }
}

async fn results(UrlPath(id): UrlPath<u64>) -> String {
    assert_eq!(id, 7);
    RESULTS.to_string()
}

async fn discard(State(rec): State<Recorded>, UrlPath(id): UrlPath<u64>) -> Json<Value> {
    if rec.drop_discard.load(Ordering::SeqCst) {
        panic!("discard connection dropped");
    }
    rec.discarded.lock().unwrap().push(id);
    Json(json!({"msg": format!("job {id} discarded")}))
}

async fn flush_all() -> Json<Value> {
    Json(json!({"msg": "all cache flushed"}))
}

async fn flush_file(State(rec): State<Recorded>, Json(body): Json<Value>) -> Json<Value> {
    rec.flushed.lock().unwrap().push(body);
    Json(json!({"msg": "file cache flushed"}))
}

async fn serve() -> (String, Recorded) {
    let recorded = Recorded::default();
    let app = Router::new()
        .route("/verify", post(verify))
        .route("/verify/:id", get(results))
        .route("/discard/:id", get(discard))
        .route("/cache/flush", get(flush_all).post(flush_file))
        .with_state(recorded.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{addr}"), recorded)
}

fn backend() -> BackendConfig {
    BackendConfig {
        name: "Symbolic Execution".to_string(),
        backend_type: "silicon".to_string(),
        engine: EngineKind::HttpServer,
        stages: vec![StageConfig {
            name: "verify".to_string(),
            is_verification: true,
            custom_arguments: "--z3Exe /usr/bin/z3 $fileToVerify$".to_string(),
            ..Default::default()
        }],
        paths: Vec::new(),
        timeout_ms: None,
        stopping_timeout_ms: Some(1_000),
        helper_chain: Vec::new(),
    }
}

async fn attached_service() -> (Arc<dyn BackendService>, Recorded) {
    let (address, recorded) = serve().await;
    let mut settings = ManagerSettings::default();
    settings.http_server.policy = HttpServerPolicy::Attach { address };
    let service = create_service(EngineKind::HttpServer, Arc::new(settings));
    service.start(&backend()).await.unwrap();
    (service, recorded)
}

#[tokio::test]
async fn test_job_results_are_streamed() {
    let (service, recorded) = attached_service().await;
    assert!(service.is_ready());
    assert!(service.server_pid().is_none());

    let backend = backend();
    let mut run = service
        .start_stage_process(Path::new("/w/a.vpr"), &backend.stages[0])
        .await
        .unwrap();
    assert_eq!(run.job, JobRef::Job { id: 7 });

    let mut body = String::new();
    let mut exit = None;
    while let Some(event) = tokio::time::timeout(Duration::from_secs(5), run.events.recv())
        .await
        .unwrap()
    {
        match event {
            StageEvent::Stdout(text) => body.push_str(&text),
            StageEvent::Exited(code) => exit = Some(code),
            other => panic!("unexpected event {other:?}"),
        }
    }
    assert_eq!(body, RESULTS);
    assert_eq!(exit, Some(Some(0)));
    assert_eq!(
        recorded.args.lock().unwrap().as_slice(),
        ["silicon --z3Exe /usr/bin/z3 /w/a.vpr".to_string()]
    );
}

#[tokio::test]
async fn test_rejected_job_is_a_communication_error() {
    let (service, _) = attached_service().await;
    let stage = StageConfig {
        name: "verify".to_string(),
        is_verification: true,
        custom_arguments: "--bogus".to_string(),
        ..Default::default()
    };
    let err = service
        .start_stage_process(Path::new("/w/a.vpr"), &stage)
        .await
        .unwrap_err();
    assert!(matches!(err, BackendError::Communication(msg) if msg.contains("invalid")));
}

#[tokio::test]
async fn test_stop_verification_discards_job() {
    let (service, recorded) = attached_service().await;
    service
        .stop_verification(Some(JobRef::Job { id: 7 }))
        .await
        .unwrap();
    assert_eq!(recorded.discarded.lock().unwrap().as_slice(), [7]);
    // the attached server is not ours to stop
    assert!(service.is_ready());
}

#[tokio::test]
async fn test_flush_cache_for_file_and_everything() {
    let (service, recorded) = attached_service().await;

    let msg = service.flush_cache(Some(Path::new("/w/a.vpr"))).await.unwrap();
    assert_eq!(msg, "file cache flushed");
    let flushed = recorded.flushed.lock().unwrap().clone();
    assert_eq!(flushed, vec![json!({"backend": "silicon", "file": "/w/a.vpr"})]);

    let msg = service.flush_cache(None).await.unwrap();
    assert_eq!(msg, "all cache flushed");
}

#[tokio::test]
async fn test_requests_fail_before_start() {
    let service = create_service(EngineKind::HttpServer, Arc::new(ManagerSettings::default()));
    assert!(matches!(
        service.flush_cache(None).await,
        Err(BackendError::NotReady)
    ));
}

#[cfg(unix)]
fn is_alive(pid: u32) -> bool {
    std::process::Command::new("kill")
        .arg("-0")
        .arg(pid.to_string())
        .status()
        .map(|status| status.success())
        .unwrap_or(false)
}

#[cfg(unix)]
struct CreatedServer {
    service: Arc<dyn BackendService>,
    backend: BackendConfig,
    recorded: Recorded,
    server_pid: u32,
    helper_pid: u32,
    _dir: tempfile::TempDir,
}

/// Launch a `sh` stand-in server that leaves a `sleep` helper below itself
#[cfg(unix)]
async fn created_service() -> CreatedServer {
    let (address, recorded) = serve().await;
    let dir = tempfile::tempdir().unwrap();
    let helper_file = dir.path().join("helper.pid");
    let announced = address.trim_start_matches("http://");

    let mut settings = ManagerSettings::default();
    settings.check_runtime = false;
    settings.http_server.policy = HttpServerPolicy::Create {
        command_template: format!(
            "sh -c 'sleep 60 & echo $! > {}; echo \"Server online at {announced}\"; exec sleep 30'",
            helper_file.display()
        ),
    };
    let service = create_service(EngineKind::HttpServer, Arc::new(settings));
    let mut backend = backend();
    backend.helper_chain = vec!["sleep".to_string()];
    service.start(&backend).await.unwrap();
    assert!(service.is_ready());

    let server_pid = service.server_pid().expect("server pid");
    let helper_pid = std::fs::read_to_string(&helper_file)
        .unwrap()
        .trim()
        .parse()
        .unwrap();
    CreatedServer {
        service,
        backend,
        recorded,
        server_pid,
        helper_pid,
        _dir: dir,
    }
}

#[cfg(unix)]
#[tokio::test]
#[serial_test::serial]
async fn test_created_server_survives_stop_verification() {
    let server = created_service().await;
    assert!(is_alive(server.server_pid));
    assert!(is_alive(server.helper_pid));

    let run = server
        .service
        .start_stage_process(Path::new("/w/a.vpr"), &server.backend.stages[0])
        .await
        .unwrap();
    assert_eq!(run.job, JobRef::Job { id: 7 });
    server.service.stop_verification(Some(run.job)).await.unwrap();

    assert_eq!(server.recorded.discarded.lock().unwrap().as_slice(), [7]);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!is_alive(server.helper_pid));
    assert!(is_alive(server.server_pid));
    assert_eq!(server.service.server_pid(), Some(server.server_pid));
    assert!(server.service.is_ready());

    server.service.stop().await.unwrap();
    assert!(!server.service.is_ready());
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!is_alive(server.server_pid));
}

#[cfg(unix)]
#[tokio::test]
#[serial_test::serial]
async fn test_failed_discard_still_kills_helpers() {
    let server = created_service().await;
    let run = server
        .service
        .start_stage_process(Path::new("/w/a.vpr"), &server.backend.stages[0])
        .await
        .unwrap();

    server.recorded.drop_discard.store(true, Ordering::SeqCst);
    let err = server
        .service
        .stop_verification(Some(run.job))
        .await
        .unwrap_err();
    assert!(matches!(err, BackendError::Http(_)));

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!is_alive(server.helper_pid));
    assert!(is_alive(server.server_pid));

    server.service.stop().await.unwrap();
}
