//! Process-builder facade over the `Executor` RPCs.
//!
//! [`RemoteCommand`] mirrors [`std::process::Command`]: configure, then
//! `spawn`, `output` or `run`. Stdio is described with [`Input`] and
//! [`Output`]; every requested stream gets its own relay task.

use std::fmt;
use std::path::Path;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::{Stream, StreamExt};
use tonic::Status;
use tonic::transport::Channel;
use tracing::{debug, warn};

use execd_core::{CommandSpec, ExitResult, StreamKind};
use execd_proto::v1::{
    Environment, ExecCommandRequest, FetchRequest, InputChunk, KillRequest, OutputChunk,
    StartRequest, WaitRequest, output_chunk,
};

use crate::connection::ExecutorClient;
use crate::error::ClientError;

/// Bytes read from a local stdin source per frame.
const INPUT_CHUNK_SIZE: usize = 32 * 1024;

/// Where the remote process's stdin comes from.
pub enum Input {
    /// No stdin pipe; the process reads the null device.
    Null,
    Bytes(Vec<u8>),
    Reader(Box<dyn AsyncRead + Send + Unpin>),
}

impl Input {
    pub fn reader(reader: impl AsyncRead + Send + Unpin + 'static) -> Self {
        Self::Reader(Box::new(reader))
    }

    const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

impl fmt::Debug for Input {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("Null"),
            Self::Bytes(bytes) => f.debug_tuple("Bytes").field(&bytes.len()).finish(),
            Self::Reader(_) => f.write_str("Reader(..)"),
        }
    }
}

impl From<Vec<u8>> for Input {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Bytes(bytes)
    }
}

impl From<&str> for Input {
    fn from(text: &str) -> Self {
        Self::Bytes(text.as_bytes().to_vec())
    }
}

/// Where a remote output stream goes.
pub enum Output {
    /// Not requested; the process writes to the null device.
    Null,
    /// Collected into [`CommandOutput`].
    Capture,
    Writer(Box<dyn AsyncWrite + Send + Unpin>),
}

impl Output {
    pub fn writer(writer: impl AsyncWrite + Send + Unpin + 'static) -> Self {
        Self::Writer(Box::new(writer))
    }

    const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

impl fmt::Debug for Output {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("Null"),
            Self::Capture => f.write_str("Capture"),
            Self::Writer(_) => f.write_str("Writer(..)"),
        }
    }
}

/// Exit result plus whatever output was captured.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub status: ExitResult,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

/// A command to run inside the daemon.
///
/// Environment handling differs from `std`: once any variable is set (or
/// [`env_clear`](Self::env_clear) is called) the list sent replaces the
/// daemon's environment entirely. Untouched, the daemon's environment is
/// inherited.
#[derive(Debug)]
pub struct RemoteCommand {
    spec: CommandSpec,
    stdin: Option<Input>,
    stdout: Option<Output>,
    stderr: Option<Output>,
}

impl RemoteCommand {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            spec: CommandSpec::new(path),
            stdin: None,
            stdout: None,
            stderr: None,
        }
    }

    pub fn arg(&mut self, arg: impl Into<String>) -> &mut Self {
        self.spec.args.push(arg.into());
        self
    }

    pub fn args<I, S>(&mut self, args: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.spec.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(&mut self, key: impl AsRef<str>, value: impl AsRef<str>) -> &mut Self {
        let entry = format!("{}={}", key.as_ref(), value.as_ref());
        self.spec.env.get_or_insert_with(Vec::new).push(entry);
        self
    }

    pub fn envs<I, K, V>(&mut self, vars: I) -> &mut Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        for (key, value) in vars {
            self.env(key, value);
        }
        self
    }

    /// Start from an empty environment.
    pub fn env_clear(&mut self) -> &mut Self {
        self.spec.env = Some(Vec::new());
        self
    }

    pub fn current_dir(&mut self, dir: impl AsRef<Path>) -> &mut Self {
        self.spec.dir = Some(dir.as_ref().to_path_buf());
        self
    }

    pub fn stdin(&mut self, input: impl Into<Input>) -> &mut Self {
        self.stdin = Some(input.into());
        self
    }

    pub fn stdout(&mut self, output: Output) -> &mut Self {
        self.stdout = Some(output);
        self
    }

    pub fn stderr(&mut self, output: Output) -> &mut Self {
        self.stderr = Some(output);
        self
    }

    pub const fn spec(&self) -> &CommandSpec {
        &self.spec
    }

    /// Register and start the command. Unset stdio defaults to [`Input::Null`]
    /// and [`Output::Null`].
    ///
    /// Configured stdio is consumed; a second `spawn` uses the defaults.
    pub async fn spawn(
        &mut self,
        client: &mut ExecutorClient<Channel>,
    ) -> Result<RunningCommand, ClientError> {
        let stdin = self.stdin.take().unwrap_or(Input::Null);
        let stdout = self.stdout.take().unwrap_or(Output::Null);
        let stderr = self.stderr.take().unwrap_or(Output::Null);
        self.spawn_with(client, stdin, stdout, stderr).await
    }

    /// Run to completion, capturing stdout and stderr unless configured
    /// otherwise.
    pub async fn output(
        &mut self,
        client: &mut ExecutorClient<Channel>,
    ) -> Result<CommandOutput, ClientError> {
        let stdin = self.stdin.take().unwrap_or(Input::Null);
        let stdout = self.stdout.take().unwrap_or(Output::Capture);
        let stderr = self.stderr.take().unwrap_or(Output::Capture);
        self.spawn_with(client, stdin, stdout, stderr)
            .await?
            .wait_with_output()
            .await
    }

    /// Like [`output`](Self::output), but anything other than a clean exit
    /// with status 0 is an error.
    pub async fn run(
        &mut self,
        client: &mut ExecutorClient<Channel>,
    ) -> Result<CommandOutput, ClientError> {
        let output = self.output(client).await?;
        if output.status.success() {
            return Ok(output);
        }
        let stderr = output
            .status
            .error
            .clone()
            .unwrap_or_else(|| String::from_utf8_lossy(&output.stderr).into_owned());
        Err(ClientError::Exit {
            code: output.status.code(),
            signal: output.status.signal,
            stderr,
        })
    }

    async fn spawn_with(
        &self,
        client: &mut ExecutorClient<Channel>,
        stdin: Input,
        stdout: Output,
        stderr: Output,
    ) -> Result<RunningCommand, ClientError> {
        let session_id = client
            .exec_command(exec_request(&self.spec))
            .await?
            .into_inner()
            .session_id;

        let started = client
            .start(StartRequest {
                session_id,
                want_stdin: !stdin.is_null(),
                want_stdout: !stdout.is_null(),
                want_stderr: !stderr.is_null(),
            })
            .await?
            .into_inner();
        if !started.success {
            // Collect the sentinel result so the daemon forgets the session.
            if let Err(e) = client.wait(WaitRequest { session_id }).await {
                debug!(session_id, error = %e, "Wait after failed start did not succeed");
            }
            return Err(ClientError::Spawn(started.error));
        }
        debug!(session_id, path = %self.spec.path, "Remote command started");

        let stdin_task = (!stdin.is_null())
            .then(|| tokio::spawn(pump_stdin(client.clone(), session_id, stdin)));
        Ok(RunningCommand {
            client: client.clone(),
            session_id,
            stdin: stdin_task,
            stdout: spawn_drain(client, session_id, StreamKind::Stdout, stdout),
            stderr: spawn_drain(client, session_id, StreamKind::Stderr, stderr),
        })
    }
}

type RelayTask<T> = Option<JoinHandle<Result<T, ClientError>>>;

/// A started remote command.
///
/// Dropping it without waiting leaves the relays running in the background
/// and the session registered on the daemon.
#[derive(Debug)]
pub struct RunningCommand {
    client: ExecutorClient<Channel>,
    session_id: u32,
    stdin: RelayTask<u64>,
    stdout: RelayTask<Vec<u8>>,
    stderr: RelayTask<Vec<u8>>,
}

impl RunningCommand {
    pub const fn session_id(&self) -> u32 {
        self.session_id
    }

    /// Request termination of the remote process tree. Killing a process
    /// that already exited is not an error.
    pub async fn kill(&mut self) -> Result<(), ClientError> {
        let response = self
            .client
            .kill(KillRequest {
                session_id: self.session_id,
            })
            .await?
            .into_inner();
        if !response.error.is_empty() {
            debug!(session_id = self.session_id, error = %response.error, "Kill had no effect");
        }
        Ok(())
    }

    pub async fn wait(self) -> Result<ExitResult, ClientError> {
        Ok(self.wait_with_output().await?.status)
    }

    /// Drain every output relay, then collect the exit result.
    ///
    /// The daemon's `Wait` is issued even when a relay failed so the session
    /// is always released; the relay error is reported afterwards.
    pub async fn wait_with_output(mut self) -> Result<CommandOutput, ClientError> {
        let stdout = join_relay(self.stdout.take()).await;
        let stderr = join_relay(self.stderr.take()).await;

        let response = self
            .client
            .wait(WaitRequest {
                session_id: self.session_id,
            })
            .await?
            .into_inner();
        let status = ExitResult::from_parts(response.exit_status, response.signal, response.err_content);

        if let Some(stdin) = self.stdin.take() {
            // The process is gone; a pump still blocked on local input is moot.
            if stdin.is_finished() {
                stdin.await??;
            } else {
                stdin.abort();
            }
        }

        Ok(CommandOutput {
            status,
            stdout: stdout?,
            stderr: stderr?,
        })
    }
}

async fn join_relay(task: RelayTask<Vec<u8>>) -> Result<Vec<u8>, ClientError> {
    match task {
        Some(handle) => handle.await?,
        None => Ok(Vec::new()),
    }
}

fn exec_request(spec: &CommandSpec) -> ExecCommandRequest {
    ExecCommandRequest {
        path: spec.path.clone(),
        args: spec.args.clone(),
        env: spec.env.clone().map(|vars| Environment { vars }),
        dir: spec
            .dir
            .as_ref()
            .map(|dir| dir.to_string_lossy().into_owned()),
    }
}

fn spawn_drain(
    client: &ExecutorClient<Channel>,
    session_id: u32,
    kind: StreamKind,
    sink: Output,
) -> RelayTask<Vec<u8>> {
    if sink.is_null() {
        return None;
    }
    let mut client = client.clone();
    Some(tokio::spawn(async move {
        let request = FetchRequest { session_id };
        let stream = match kind {
            StreamKind::Stderr => client.fetch_stderr(request).await?,
            _ => client.fetch_stdout(request).await?,
        }
        .into_inner();
        drain_into(Box::pin(stream), kind, sink).await
    }))
}

/// Copy a fetched output stream into `sink` until its terminal chunk.
async fn drain_into<S>(mut stream: S, kind: StreamKind, mut sink: Output) -> Result<Vec<u8>, ClientError>
where
    S: Stream<Item = Result<OutputChunk, Status>> + Unpin,
{
    let mut captured = Vec::new();
    while let Some(chunk) = stream.next().await {
        match chunk?.kind {
            Some(output_chunk::Kind::Data(bytes)) => match &mut sink {
                Output::Capture => captured.extend_from_slice(&bytes),
                Output::Writer(writer) => writer.write_all(&bytes).await?,
                Output::Null => {}
            },
            Some(output_chunk::Kind::Closed(_)) => {
                if let Output::Writer(writer) = &mut sink {
                    writer.flush().await?;
                }
                return Ok(captured);
            }
            Some(output_chunk::Kind::RuntimeError(message)) => {
                return Err(ClientError::Stream {
                    stream: kind,
                    message,
                });
            }
            Some(output_chunk::Kind::Start(_)) | None => {}
        }
    }
    Err(ClientError::Truncated { stream: kind })
}

/// Forward `input` to the remote stdin. Returns bytes the daemon wrote.
async fn pump_stdin(
    mut client: ExecutorClient<Channel>,
    session_id: u32,
    input: Input,
) -> Result<u64, ClientError> {
    let (tx, rx) = mpsc::channel::<InputChunk>(4);
    let feed = async move {
        let result = feed_input(session_id, input, &tx).await;
        // The daemon may already have hung up; the end marker is best effort.
        let _ = tx.send(InputChunk::end(session_id)).await;
        result
    };
    let call = client.send_input(ReceiverStream::new(rx));
    tokio::pin!(feed, call);

    let mut fed = None;
    let response = loop {
        tokio::select! {
            response = &mut call => break response,
            result = &mut feed, if fed.is_none() => fed = Some(result),
        }
    };
    if let Some(result) = fed {
        result?;
    }

    let response = response?.into_inner();
    if !response.error.is_empty() {
        // A process may legitimately exit without reading all of its input.
        warn!(
            session_id,
            written = response.bytes_written,
            error = %response.error,
            "Remote stdin closed early"
        );
    }
    Ok(response.bytes_written)
}

async fn feed_input(
    session_id: u32,
    input: Input,
    tx: &mpsc::Sender<InputChunk>,
) -> Result<(), ClientError> {
    match input {
        Input::Null => {}
        Input::Bytes(bytes) => {
            for chunk in bytes.chunks(INPUT_CHUNK_SIZE) {
                if tx.send(InputChunk::data(session_id, chunk.to_vec())).await.is_err() {
                    break;
                }
            }
        }
        Input::Reader(mut reader) => {
            let mut buf = vec![0u8; INPUT_CHUNK_SIZE];
            loop {
                let n = reader.read(&mut buf).await?;
                if n == 0 {
                    break;
                }
                if tx.send(InputChunk::data(session_id, buf[..n].to_vec())).await.is_err() {
                    break;
                }
            }
        }
    }
    Ok(())
}
