//! Stream relays between the child's stdio pipes and RPC streams.
//!
//! Each relay is its own unit of concurrency: the output drainers run as
//! tracked tasks owned by the session, the stdin pump runs inside the
//! `SendInput` call that feeds it.

use std::fmt::Display;
use std::io;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_stream::{Stream, StreamExt};
use tracing::{debug, warn};

use execd_core::{SessionId, StreamKind};

/// One event on an output stream, in emission order:
/// `Start`, any number of `Data`, then exactly one of `Closed` / `Failed`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputEvent {
    Start,
    Data(Vec<u8>),
    Closed,
    Failed(String),
}

impl OutputEvent {
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed | Self::Failed(_))
    }
}

/// One frame from the caller's input stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputFrame {
    Data(Vec<u8>),
    End,
}

/// Why the stdin pump stopped early.
#[derive(Debug, thiserror::Error)]
///
/// `E` is the caller-side stream error, handed back untouched.
pub enum InputError<E> {
    #[error("Failed to write to stdin after {written} bytes: {source}")]
    Write {
        written: u64,
        #[source]
        source: io::Error,
    },

    #[error("Input stream aborted after {written} bytes: {cause}")]
    Aborted { written: u64, cause: E },
}

impl<E> InputError<E> {
    pub const fn written(&self) -> u64 {
        match self {
            Self::Write { written, .. } | Self::Aborted { written, .. } => *written,
        }
    }
}

/// A read error meaning "the other end is gone", reported as a graceful close.
fn is_closed_pipe(err: &io::Error) -> bool {
    if matches!(
        err.kind(),
        io::ErrorKind::BrokenPipe | io::ErrorKind::UnexpectedEof
    ) {
        return true;
    }
    #[cfg(unix)]
    {
        err.raw_os_error() == Some(nix::errno::Errno::EBADF as i32)
    }
    #[cfg(not(unix))]
    {
        false
    }
}

/// Drain `pipe` into `tx` until end of stream.
///
/// Emits `Start` first and exactly one terminal event last. If the receiver
/// goes away the relay stops and drops the pipe, so it can never hold up
/// `Wait`.
pub async fn drain_output<R>(
    session_id: SessionId,
    kind: StreamKind,
    mut pipe: R,
    chunk_size: usize,
    tx: mpsc::Sender<OutputEvent>,
) where
    R: AsyncRead + Unpin,
{
    if tx.send(OutputEvent::Start).await.is_err() {
        debug!(%session_id, stream = %kind, "Output receiver dropped before start");
        return;
    }

    let mut buf = vec![0u8; chunk_size.max(1)];
    let mut relayed: u64 = 0;
    let terminal = loop {
        match pipe.read(&mut buf).await {
            Ok(0) => break OutputEvent::Closed,
            Ok(n) => {
                relayed += n as u64;
                if tx.send(OutputEvent::Data(buf[..n].to_vec())).await.is_err() {
                    debug!(%session_id, stream = %kind, relayed, "Output receiver dropped");
                    return;
                }
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) if is_closed_pipe(&e) => break OutputEvent::Closed,
            Err(e) => {
                warn!(%session_id, stream = %kind, error = %e, "Output relay failed");
                break OutputEvent::Failed(e.to_string());
            }
        }
    };

    debug!(%session_id, stream = %kind, relayed, ?terminal, "Output relay finished");
    let _ = tx.send(terminal).await;
}

/// Copy caller frames into the child's stdin until the end marker.
///
/// The pipe is closed when this returns, whatever the outcome, so commands
/// waiting for EOF on stdin can finish. Returns the number of bytes written.
pub async fn pump_input<W, S, E>(
    session_id: SessionId,
    mut pipe: W,
    mut frames: S,
) -> Result<u64, InputError<E>>
where
    W: AsyncWrite + Unpin,
    S: Stream<Item = Result<InputFrame, E>> + Unpin,
    E: Display,
{
    let mut written: u64 = 0;
    loop {
        match frames.next().await {
            Some(Ok(InputFrame::Data(bytes))) => {
                if bytes.is_empty() {
                    continue;
                }
                if let Err(source) = write_chunk(&mut pipe, &bytes).await {
                    warn!(%session_id, written, error = %source, "Stdin write failed");
                    return Err(InputError::Write { written, source });
                }
                written += bytes.len() as u64;
            }
            Some(Ok(InputFrame::End)) | None => break,
            Some(Err(e)) => {
                debug!(%session_id, written, error = %e, "Input stream ended abnormally, closing stdin");
                return Err(InputError::Aborted { written, cause: e });
            }
        }
    }

    debug!(%session_id, written, "Stdin closed");
    Ok(written)
}

async fn write_chunk<W>(pipe: &mut W, bytes: &[u8]) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    pipe.write_all(bytes).await?;
    pipe.flush().await
}
