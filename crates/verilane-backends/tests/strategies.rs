//! Process strategy tests against real local processes
//!
//! These use `sh` and `sleep` in place of a JVM backend.

#![cfg(unix)]

use serial_test::serial;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use verilane_backends::{
    create_service, BackendConfig, BackendService, EngineKind, JobRef, ManagerSettings,
    StageConfig, StageEvent,
};

fn backend(engine: EngineKind, main_method: &str) -> BackendConfig {
    BackendConfig {
        name: "test backend".to_string(),
        backend_type: "silicon".to_string(),
        engine,
        stages: vec![StageConfig {
            name: "verify".to_string(),
            is_verification: true,
            main_method: main_method.to_string(),
            ..Default::default()
        }],
        paths: Vec::new(),
        timeout_ms: None,
        stopping_timeout_ms: Some(2_000),
        helper_chain: Vec::new(),
    }
}

fn is_alive(pid: u32) -> bool {
    std::process::Command::new("kill")
        .arg("-0")
        .arg(pid.to_string())
        .status()
        .map(|status| status.success())
        .unwrap_or(false)
}

async fn collect(mut events: tokio::sync::mpsc::Receiver<StageEvent>) -> (String, Option<i32>) {
    let mut stdout = String::new();
    let mut code = None;
    while let Some(event) = tokio::time::timeout(Duration::from_secs(10), events.recv())
        .await
        .expect("stage output timed out")
    {
        match event {
            StageEvent::Stdout(text) => stdout.push_str(&text),
            StageEvent::Exited(exit) => code = exit,
            StageEvent::Stderr(_) | StageEvent::Failed(_) => {}
        }
    }
    (stdout, code)
}

#[tokio::test]
#[serial]
async fn test_single_shot_streams_output_and_exit_code() {
    let mut settings = ManagerSettings::default();
    settings.check_runtime = false;
    settings.single_shot.command_template = "sh -c $mainMethod$".to_string();
    let service = create_service(EngineKind::None, Arc::new(settings));

    let backend = backend(EngineKind::None, "echo Silicon started; echo done; exit 3");
    service.start(&backend).await.unwrap();
    let run = service
        .start_stage_process(Path::new("/tmp/file.vpr"), &backend.stages[0])
        .await
        .unwrap();
    assert!(matches!(run.job, JobRef::Process { .. }));

    let (stdout, code) = collect(run.events).await;
    assert_eq!(stdout, "Silicon started\ndone\n");
    assert_eq!(code, Some(3));
}

#[tokio::test]
#[serial]
async fn test_single_shot_stop_verification_kills_process() {
    let mut settings = ManagerSettings::default();
    settings.check_runtime = false;
    settings.single_shot.command_template = "sh -c $mainMethod$".to_string();
    let service = create_service(EngineKind::None, Arc::new(settings));

    let backend = backend(EngineKind::None, "sleep 30");
    service.start(&backend).await.unwrap();
    let run = service
        .start_stage_process(Path::new("/tmp/file.vpr"), &backend.stages[0])
        .await
        .unwrap();
    let JobRef::Process { pid } = run.job else {
        panic!("expected a process job");
    };
    assert!(is_alive(pid));

    service.stop_verification(Some(run.job)).await.unwrap();
    assert!(!is_alive(pid));
    let (_, code) = collect(run.events).await;
    assert_eq!(code, None);
}

#[tokio::test]
#[serial]
async fn test_peer_server_survives_stop_verification() {
    let mut settings = ManagerSettings::default();
    settings.check_runtime = false;
    settings.peer_server.server_template = "sleep 60".to_string();
    settings.peer_server.client_template = "sh -c".to_string();
    settings.peer_server.probe_target = "echo java.lang.ClassNotFoundException: probe".to_string();
    settings.peer_server.probe_interval_ms = 50;
    let service = create_service(EngineKind::PeerServer, Arc::new(settings));

    let backend = backend(EngineKind::PeerServer, "sleep 30");
    service.start(&backend).await.unwrap();
    assert!(service.is_ready());
    let server_pid = service.server_pid().expect("server pid");
    assert!(is_alive(server_pid));

    let run = service
        .start_stage_process(Path::new("/tmp/file.vpr"), &backend.stages[0])
        .await
        .unwrap();
    let JobRef::Process { pid: client_pid } = run.job else {
        panic!("expected a client process");
    };
    assert_ne!(client_pid, server_pid);

    service.stop_verification(Some(run.job)).await.unwrap();
    assert!(!is_alive(client_pid));
    assert!(is_alive(server_pid));
    assert_eq!(service.server_pid(), Some(server_pid));

    service.stop().await.unwrap();
    assert!(!service.is_ready());
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!is_alive(server_pid));
}

#[tokio::test]
#[serial]
async fn test_peer_server_start_fails_when_probe_never_answers() {
    let mut settings = ManagerSettings::default();
    settings.check_runtime = false;
    settings.peer_server.server_template = "sleep 60".to_string();
    settings.peer_server.client_template = "sh -c".to_string();
    settings.peer_server.probe_target = "echo connection refused".to_string();
    settings.peer_server.probe_interval_ms = 10;
    settings.peer_server.probe_attempts = 3;
    let service = create_service(EngineKind::PeerServer, Arc::new(settings));

    let backend = backend(EngineKind::PeerServer, "true");
    let err = service.start(&backend).await.unwrap_err();
    assert!(matches!(
        err,
        verilane_backends::BackendError::ProbeExhausted { attempts: 3 }
    ));
    assert!(!service.is_ready());
    assert!(service.server_pid().is_none());
}
