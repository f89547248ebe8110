//! Shared harness: an in-process daemon on a temp Unix socket.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::path::{Path, PathBuf};
use std::time::Duration;

use hyper_util::rt::TokioIo;
use tokio::net::UnixStream;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tonic::transport::{Channel, Endpoint, Uri};
use tower::service_fn;

use execd_daemon::server::{GrpcServer, ServerConfig};
use execd_proto::v1::executor_client::ExecutorClient;
use execd_proto::v1::{OutputChunk, output_chunk};

pub struct TestDaemon {
    _dir: tempfile::TempDir,
    pub socket: PathBuf,
    shutdown: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl TestDaemon {
    pub async fn start() -> Self {
        Self::start_with(|config| config).await
    }

    pub async fn start_with(tweak: impl FnOnce(ServerConfig) -> ServerConfig) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("execd.sock");
        let server = GrpcServer::new(tweak(ServerConfig::unix(socket.clone())));
        let (tx, rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(async move {
            server
                .serve_unix(async {
                    let _ = rx.await;
                })
                .await
                .unwrap();
        });
        wait_for_socket(&socket).await;
        Self {
            _dir: dir,
            socket,
            shutdown: Some(tx),
            handle: Some(handle),
        }
    }

    pub async fn client(&self) -> ExecutorClient<Channel> {
        ExecutorClient::new(connect(&self.socket).await)
    }

    pub async fn stop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            tokio::time::timeout(Duration::from_secs(5), handle)
                .await
                .expect("server should stop")
                .unwrap();
        }
    }
}

async fn wait_for_socket(path: &Path) {
    for _ in 0..200 {
        if path.exists() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("daemon socket never appeared at {}", path.display());
}

pub async fn connect(path: &Path) -> Channel {
    let path = path.to_path_buf();
    Endpoint::try_from("http://[::]:50051")
        .unwrap()
        .connect_with_connector(service_fn(move |_: Uri| {
            let path = path.clone();
            async move { Ok::<_, std::io::Error>(TokioIo::new(UnixStream::connect(path).await?)) }
        }))
        .await
        .unwrap()
}

/// Collect a fetch stream into (data bytes, terminal chunk, chunks seen).
pub async fn drain(
    mut stream: tonic::Streaming<OutputChunk>,
) -> (Vec<u8>, Option<output_chunk::Kind>, Vec<OutputChunk>) {
    let mut data = Vec::new();
    let mut chunks = Vec::new();
    let mut terminal = None;
    while let Some(chunk) = tokio::time::timeout(Duration::from_secs(10), stream.message())
        .await
        .expect("output stream stalled")
        .unwrap()
    {
        assert!(terminal.is_none(), "chunk after terminal chunk: {chunk:?}");
        match &chunk.kind {
            Some(output_chunk::Kind::Data(bytes)) => data.extend_from_slice(bytes),
            Some(kind @ (output_chunk::Kind::Closed(_) | output_chunk::Kind::RuntimeError(_))) => {
                terminal = Some(kind.clone());
            }
            _ => {}
        }
        chunks.push(chunk);
    }
    (data, terminal, chunks)
}
