//! Executor gRPC implementation.
//!
//! Each call looks its session up in the registry and hands off to the
//! session; this layer only converts between wire and domain types.

use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::{Stream, StreamExt};
use tonic::{Request, Response, Status, Streaming};
use tracing::{debug, info, instrument, warn};

use execd_core::{CommandSpec, ExitResult, SessionId, StdioFlags, StreamKind};
use execd_proto::v1::executor_server::Executor;
use execd_proto::v1::{
    ExecCommandRequest, ExecCommandResponse, FetchRequest, InputChunk, KillRequest, KillResponse,
    OutputChunk, SendInputResponse, StartRequest, StartResponse, StreamClosed, StreamStart,
    WaitRequest, WaitResponse, input_chunk, output_chunk,
};

use crate::registry::{RegistryError, SessionRegistry};
use crate::session::relay::{self, InputError, InputFrame, OutputEvent};
use crate::session::{Session, SessionError, StartOutcome};

/// Relay tuning shared by every session served.
#[derive(Debug, Clone, Copy)]
pub struct RelaySettings {
    pub read_chunk_size: usize,
    pub output_buffer: usize,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            read_chunk_size: 32 * 1024,
            output_buffer: 16,
        }
    }
}

/// Executor gRPC handler.
#[derive(Clone)]
pub struct ExecutorServiceImpl {
    registry: Arc<SessionRegistry>,
    relay: RelaySettings,
}

impl ExecutorServiceImpl {
    pub const fn new(registry: Arc<SessionRegistry>, relay: RelaySettings) -> Self {
        Self { registry, relay }
    }

    pub const fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    async fn session(&self, id: u32) -> Result<Arc<Session>, Status> {
        Ok(self.registry.lookup(SessionId::new(id)).await?)
    }

    async fn fetch(&self, id: u32, kind: StreamKind) -> Result<Response<OutputStream>, Status> {
        let session = self.session(id).await?;
        let (tx, rx) = mpsc::channel(self.relay.output_buffer.max(1));
        session
            .attach_output(kind, self.relay.read_chunk_size, tx)
            .await?;
        let stream = ReceiverStream::new(rx).map(|event| Ok(to_output_chunk(event)));
        Ok(Response::new(Box::pin(stream)))
    }
}

type OutputStream = Pin<Box<dyn Stream<Item = Result<OutputChunk, Status>> + Send>>;

#[tonic::async_trait]
impl Executor for ExecutorServiceImpl {
    type FetchStdoutStream = OutputStream;
    type FetchStderrStream = OutputStream;

    #[instrument(skip_all, fields(path = %request.get_ref().path))]
    async fn exec_command(
        &self,
        request: Request<ExecCommandRequest>,
    ) -> Result<Response<ExecCommandResponse>, Status> {
        let spec = command_spec(request.into_inner());
        spec.env_pairs()
            .map_err(|e| Status::invalid_argument(e.to_string()))?;
        let session = self.registry.register(spec).await;
        Ok(Response::new(ExecCommandResponse {
            session_id: session.id().get(),
        }))
    }

    #[instrument(skip_all, fields(session_id = request.get_ref().session_id))]
    async fn start(
        &self,
        request: Request<StartRequest>,
    ) -> Result<Response<StartResponse>, Status> {
        let req = request.into_inner();
        let session = self.session(req.session_id).await?;
        let flags = StdioFlags {
            stdin: req.want_stdin,
            stdout: req.want_stdout,
            stderr: req.want_stderr,
        };
        let response = match session.start(flags).await? {
            StartOutcome::Started { .. } => StartResponse {
                success: true,
                error: String::new(),
            },
            StartOutcome::SpawnFailed(error) => StartResponse {
                success: false,
                error,
            },
        };
        Ok(Response::new(response))
    }

    #[instrument(skip_all)]
    async fn send_input(
        &self,
        request: Request<Streaming<InputChunk>>,
    ) -> Result<Response<SendInputResponse>, Status> {
        let mut inbound = request.into_inner();
        let Some(first) = inbound.message().await? else {
            debug!("SendInput stream closed before the first frame");
            return Ok(Response::new(SendInputResponse::default()));
        };

        let session_id = first.session_id;
        let session = self.session(session_id).await?;
        let _busy = session.mark_busy();
        let stdin = session.take_stdin().await?;
        info!(session_id, "Stdin relay attached");

        let frames = Box::pin(
            tokio_stream::once(Ok(first))
                .chain(inbound)
                .map(move |chunk| input_frame(session_id, chunk)),
        );

        let response = match relay::pump_input(session.id(), stdin, frames).await {
            Ok(bytes_written) => SendInputResponse {
                error: String::new(),
                bytes_written,
            },
            Err(InputError::Aborted { cause, .. }) => return Err(cause),
            Err(e @ InputError::Write { .. }) => SendInputResponse {
                bytes_written: e.written(),
                error: e.to_string(),
            },
        };
        session.touch();
        Ok(Response::new(response))
    }

    #[instrument(skip_all, fields(session_id = request.get_ref().session_id))]
    async fn fetch_stdout(
        &self,
        request: Request<FetchRequest>,
    ) -> Result<Response<Self::FetchStdoutStream>, Status> {
        self.fetch(request.into_inner().session_id, StreamKind::Stdout)
            .await
    }

    #[instrument(skip_all, fields(session_id = request.get_ref().session_id))]
    async fn fetch_stderr(
        &self,
        request: Request<FetchRequest>,
    ) -> Result<Response<Self::FetchStderrStream>, Status> {
        self.fetch(request.into_inner().session_id, StreamKind::Stderr)
            .await
    }

    #[instrument(skip_all, fields(session_id = request.get_ref().session_id))]
    async fn wait(&self, request: Request<WaitRequest>) -> Result<Response<WaitResponse>, Status> {
        let id = SessionId::new(request.into_inner().session_id);
        let session = self.registry.lookup(id).await?;
        let result = session.wait().await?;
        self.registry.remove(id).await;
        info!(status = result.status, signal = ?result.signal, error = ?result.error, "Session finished");
        Ok(Response::new(wait_response(result)))
    }

    #[instrument(skip_all, fields(session_id = request.get_ref().session_id))]
    async fn kill(&self, request: Request<KillRequest>) -> Result<Response<KillResponse>, Status> {
        let session = self.session(request.into_inner().session_id).await?;
        let error = match session.kill().await {
            Ok(()) => String::new(),
            Err(e) if e.is_protocol() => return Err(e.into()),
            Err(e) => {
                debug!(error = %e, "Kill had no effect");
                e.to_string()
            }
        };
        Ok(Response::new(KillResponse { error }))
    }
}

fn command_spec(req: ExecCommandRequest) -> CommandSpec {
    CommandSpec {
        path: req.path,
        args: req.args,
        env: req.env.map(|env| env.vars),
        dir: req.dir.filter(|dir| !dir.is_empty()).map(Into::into),
    }
}

fn input_frame(session_id: u32, chunk: Result<InputChunk, Status>) -> Result<InputFrame, Status> {
    let chunk = chunk?;
    if chunk.session_id != session_id {
        warn!(
            session_id,
            other = chunk.session_id,
            "SendInput frame names a different session"
        );
        return Err(Status::invalid_argument(format!(
            "SendInput stream is bound to session {session_id}, got frame for {}",
            chunk.session_id
        )));
    }
    Ok(match chunk.payload {
        Some(input_chunk::Payload::Data(data)) => InputFrame::Data(data),
        Some(input_chunk::Payload::End(_)) => InputFrame::End,
        None => InputFrame::Data(Vec::new()),
    })
}

fn to_output_chunk(event: OutputEvent) -> OutputChunk {
    let kind = match event {
        OutputEvent::Start => output_chunk::Kind::Start(StreamStart {}),
        OutputEvent::Data(data) => output_chunk::Kind::Data(data),
        OutputEvent::Closed => output_chunk::Kind::Closed(StreamClosed {}),
        OutputEvent::Failed(message) => output_chunk::Kind::RuntimeError(message),
    };
    OutputChunk { kind: Some(kind) }
}

fn wait_response(result: ExitResult) -> WaitResponse {
    WaitResponse {
        exit_status: result.status,
        err_content: result.error.unwrap_or_default(),
        signal: result.signal,
    }
}

impl From<RegistryError> for Status {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::NotFound(_) => Self::not_found(err.to_string()),
        }
    }
}

impl From<SessionError> for Status {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::Signal(_) => Self::internal(err.to_string()),
            _ => Self::failed_precondition(err.to_string()),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn wait_response_keeps_fields_complementary() {
        let ok = wait_response(ExitResult::exited(0));
        assert_eq!(ok.exit_status, 0);
        assert!(ok.err_content.is_empty());
        assert_eq!(ok.signal, None);

        let killed = wait_response(ExitResult::signaled(9));
        assert_eq!(killed.exit_status, 137);
        assert_eq!(killed.signal, Some(9));

        let failed = wait_response(ExitResult::failed("no such file"));
        assert_eq!(failed.exit_status, execd_core::NEVER_RAN_STATUS);
        assert_eq!(failed.err_content, "no such file");
    }

    #[test]
    fn input_frame_rejects_foreign_session() {
        let status = input_frame(1, Ok(InputChunk::data(2, b"x".to_vec()))).unwrap_err();
        assert_eq!(status.code(), tonic::Code::InvalidArgument);
    }

    #[test]
    fn input_frame_maps_payloads() {
        assert_eq!(
            input_frame(1, Ok(InputChunk::data(1, b"x".to_vec()))).unwrap(),
            InputFrame::Data(b"x".to_vec())
        );
        assert_eq!(input_frame(1, Ok(InputChunk::end(1))).unwrap(), InputFrame::End);
    }

    #[test]
    fn session_errors_map_to_status_codes() {
        assert_eq!(
            Status::from(SessionError::AlreadyStarted).code(),
            tonic::Code::FailedPrecondition
        );
        assert_eq!(
            Status::from(RegistryError::NotFound(SessionId::new(3))).code(),
            tonic::Code::NotFound
        );
    }

    #[test]
    fn empty_dir_means_inherit() {
        let spec = command_spec(ExecCommandRequest {
            path: "/bin/true".into(),
            args: vec![],
            env: None,
            dir: Some(String::new()),
        });
        assert!(spec.dir.is_none());
    }
}
