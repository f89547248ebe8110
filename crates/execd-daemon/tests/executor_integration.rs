//! Drives `ExecutorServiceImpl` directly through the `Executor` trait, no transport.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::sync::Arc;
use std::time::Duration;

use tokio_stream::StreamExt;
use tonic::{Code, Request};

use execd_core::NEVER_RAN_STATUS;
use execd_daemon::registry::SessionRegistry;
use execd_daemon::server::{ExecutorServiceImpl, RelaySettings};
use execd_proto::v1::executor_server::Executor;
use execd_proto::v1::{
    Environment, ExecCommandRequest, FetchRequest, KillRequest, OutputChunk, StartRequest,
    WaitRequest, WaitResponse, output_chunk,
};

fn service() -> ExecutorServiceImpl {
    ExecutorServiceImpl::new(Arc::new(SessionRegistry::new()), RelaySettings::default())
}

async fn exec(svc: &ExecutorServiceImpl, path: &str, args: &[&str]) -> u32 {
    svc.exec_command(Request::new(ExecCommandRequest {
        path: path.into(),
        args: args.iter().map(ToString::to_string).collect(),
        env: None,
        dir: None,
    }))
    .await
    .unwrap()
    .into_inner()
    .session_id
}

async fn start(svc: &ExecutorServiceImpl, id: u32, stdout: bool, stderr: bool) -> (bool, String) {
    let resp = svc
        .start(Request::new(StartRequest {
            session_id: id,
            want_stdin: false,
            want_stdout: stdout,
            want_stderr: stderr,
        }))
        .await
        .unwrap()
        .into_inner();
    (resp.success, resp.error)
}

async fn wait(svc: &ExecutorServiceImpl, id: u32) -> WaitResponse {
    tokio::time::timeout(
        Duration::from_secs(10),
        svc.wait(Request::new(WaitRequest { session_id: id })),
    )
    .await
    .expect("wait hung")
    .unwrap()
    .into_inner()
}

async fn collect_stdout(svc: &ExecutorServiceImpl, id: u32) -> Vec<OutputChunk> {
    let stream = svc
        .fetch_stdout(Request::new(FetchRequest { session_id: id }))
        .await
        .unwrap()
        .into_inner();
    stream.map(Result::unwrap).collect().await
}

fn data_of(chunks: &[OutputChunk]) -> Vec<u8> {
    chunks
        .iter()
        .filter_map(|c| match &c.kind {
            Some(output_chunk::Kind::Data(d)) => Some(d.clone()),
            _ => None,
        })
        .flatten()
        .collect()
}

#[tokio::test]
async fn echo_output_is_streamed_then_closed() {
    let svc = service();
    let id = exec(&svc, "/bin/echo", &["hi"]).await;
    assert_eq!(start(&svc, id, true, false).await, (true, String::new()));

    let chunks = collect_stdout(&svc, id).await;
    assert!(matches!(chunks.first().unwrap().kind, Some(output_chunk::Kind::Start(_))));
    assert!(matches!(chunks.last().unwrap().kind, Some(output_chunk::Kind::Closed(_))));
    assert_eq!(data_of(&chunks), b"hi\n");

    let resp = wait(&svc, id).await;
    assert_eq!(resp.exit_status, 0);
    assert!(resp.err_content.is_empty());
    assert!(svc.registry().is_empty().await);
}

#[tokio::test]
async fn false_exits_nonzero_without_error_text() {
    let svc = service();
    let id = exec(&svc, "/bin/false", &[]).await;
    assert!(start(&svc, id, false, false).await.0);
    let resp = wait(&svc, id).await;
    assert_ne!(resp.exit_status, 0);
    assert_ne!(resp.exit_status, NEVER_RAN_STATUS);
    assert!(resp.err_content.is_empty());
    assert_eq!(resp.signal, None);
}

#[tokio::test]
async fn missing_binary_reports_failure_and_sentinel() {
    let svc = service();
    let id = exec(&svc, "/nonexistent/execd-test-binary", &[]).await;
    let (success, error) = start(&svc, id, true, true).await;
    assert!(!success);
    assert!(!error.is_empty());

    let resp = wait(&svc, id).await;
    assert_eq!(resp.exit_status, NEVER_RAN_STATUS);
    assert!(!resp.err_content.is_empty());
    assert!(svc.registry().is_empty().await);
}

#[tokio::test]
async fn kill_mid_flight_yields_signal_status() {
    let svc = service();
    let id = exec(&svc, "/bin/sleep", &["30"]).await;
    assert!(start(&svc, id, true, true).await.0);

    let stdout = svc
        .fetch_stdout(Request::new(FetchRequest { session_id: id }))
        .await
        .unwrap()
        .into_inner();
    let stderr = svc
        .fetch_stderr(Request::new(FetchRequest { session_id: id }))
        .await
        .unwrap()
        .into_inner();

    let killed = svc
        .kill(Request::new(KillRequest { session_id: id }))
        .await
        .unwrap()
        .into_inner();
    assert!(killed.error.is_empty());

    for stream in [stdout, stderr] {
        let chunks: Vec<_> = tokio::time::timeout(Duration::from_secs(10), stream.collect::<Vec<_>>())
            .await
            .expect("relay hung after kill");
        let last = chunks.last().unwrap().as_ref().unwrap();
        assert!(last.is_terminal());
    }

    let resp = wait(&svc, id).await;
    assert_eq!(resp.signal, Some(9));
    assert_eq!(resp.exit_status, 128 + 9);
}

#[tokio::test]
async fn unknown_session_is_not_found() {
    let svc = service();
    let err = svc
        .start(Request::new(StartRequest {
            session_id: 4242,
            ..Default::default()
        }))
        .await
        .unwrap_err();
    assert_eq!(err.code(), Code::NotFound);

    let err = svc
        .wait(Request::new(WaitRequest { session_id: 4242 }))
        .await
        .unwrap_err();
    assert_eq!(err.code(), Code::NotFound);

    let err = svc
        .kill(Request::new(KillRequest { session_id: 4242 }))
        .await
        .unwrap_err();
    assert_eq!(err.code(), Code::NotFound);
}

#[tokio::test]
async fn second_start_is_rejected() {
    let svc = service();
    let id = exec(&svc, "/bin/true", &[]).await;
    assert!(start(&svc, id, false, false).await.0);
    let err = svc
        .start(Request::new(StartRequest {
            session_id: id,
            ..Default::default()
        }))
        .await
        .unwrap_err();
    assert_eq!(err.code(), Code::FailedPrecondition);
    assert_eq!(wait(&svc, id).await.exit_status, 0);
}

#[tokio::test]
async fn fetch_before_start_and_undeclared_fetch_are_rejected() {
    let svc = service();
    let id = exec(&svc, "/bin/echo", &["x"]).await;

    let err = svc
        .fetch_stdout(Request::new(FetchRequest { session_id: id }))
        .await
        .err()
        .unwrap();
    assert_eq!(err.code(), Code::FailedPrecondition);

    assert!(start(&svc, id, false, false).await.0);
    let err = svc
        .fetch_stderr(Request::new(FetchRequest { session_id: id }))
        .await
        .err()
        .unwrap();
    assert_eq!(err.code(), Code::FailedPrecondition);

    // Undeclared stdout never blocks Wait.
    assert_eq!(wait(&svc, id).await.exit_status, 0);
}

#[tokio::test]
async fn wait_before_start_keeps_the_session() {
    let svc = service();
    let id = exec(&svc, "/bin/true", &[]).await;
    let err = svc
        .wait(Request::new(WaitRequest { session_id: id }))
        .await
        .unwrap_err();
    assert_eq!(err.code(), Code::FailedPrecondition);
    assert_eq!(svc.registry().len().await, 1);
}

#[tokio::test]
async fn double_kill_after_exit_is_harmless() {
    let svc = service();
    let id = exec(&svc, "/bin/true", &[]).await;
    assert!(start(&svc, id, false, false).await.0);

    // Let the process exit before killing it.
    let session = svc
        .registry()
        .lookup(execd_core::SessionId::new(id))
        .await
        .unwrap();
    for _ in 0..200 {
        if session.has_exited().await {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    for _ in 0..2 {
        let resp = svc
            .kill(Request::new(KillRequest { session_id: id }))
            .await
            .unwrap()
            .into_inner();
        assert!(!resp.error.is_empty());
    }
    let resp = wait(&svc, id).await;
    assert_eq!(resp.exit_status, 0);
    assert_eq!(resp.signal, None);
}

#[tokio::test]
async fn env_override_replaces_environment() {
    let svc = service();
    let id = svc
        .exec_command(Request::new(ExecCommandRequest {
            path: "/usr/bin/env".into(),
            args: vec![],
            env: Some(Environment {
                vars: vec!["EXECD_ONLY=1".into()],
            }),
            dir: None,
        }))
        .await
        .unwrap()
        .into_inner()
        .session_id;
    assert!(start(&svc, id, true, false).await.0);
    let chunks = collect_stdout(&svc, id).await;
    assert_eq!(data_of(&chunks), b"EXECD_ONLY=1\n");
    assert_eq!(wait(&svc, id).await.exit_status, 0);
}

#[tokio::test]
async fn malformed_env_is_invalid_argument() {
    let svc = service();
    let err = svc
        .exec_command(Request::new(ExecCommandRequest {
            path: "/usr/bin/env".into(),
            args: vec![],
            env: Some(Environment {
                vars: vec!["NO_EQUALS_SIGN".into()],
            }),
            dir: None,
        }))
        .await
        .unwrap_err();
    assert_eq!(err.code(), Code::InvalidArgument);
    assert!(svc.registry().is_empty().await);
}
