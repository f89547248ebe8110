//! Per-process supervisor task.
//!
//! The supervisor owns the `Child`. It reaps the process and serves kill
//! requests from the same task, so a signal is only ever sent to a pid that
//! has not been reaped yet and cannot have been recycled.

use std::process::ExitStatus;

use tokio::process::Child;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};

use execd_core::{ExitResult, SessionId};

use super::error::SessionError;

type KillReply = oneshot::Sender<Result<(), SessionError>>;

/// Cloneable handle to a running supervisor.
#[derive(Debug, Clone)]
pub struct SupervisorHandle {
    kill_tx: mpsc::Sender<KillReply>,
    exit_rx: watch::Receiver<Option<ExitResult>>,
}

impl SupervisorHandle {
    /// Spawn the supervisor task for `child`.
    pub fn spawn(session_id: SessionId, child: Child) -> Self {
        let (kill_tx, kill_rx) = mpsc::channel(4);
        let (exit_tx, exit_rx) = watch::channel(None);
        tokio::spawn(supervise(session_id, child, kill_rx, exit_tx));
        Self { kill_tx, exit_rx }
    }

    /// Ask for the process tree to be killed. Returns once the signal has been
    /// sent, not when the process is gone.
    pub async fn kill(&self) -> Result<(), SessionError> {
        if self.exit_rx.borrow().is_some() {
            return Err(SessionError::AlreadyExited);
        }
        let (reply_tx, reply_rx) = oneshot::channel();
        self.kill_tx
            .send(reply_tx)
            .await
            .map_err(|_| SessionError::AlreadyExited)?;
        // Dropped unanswered when the process was reaped first.
        reply_rx.await.unwrap_or(Err(SessionError::AlreadyExited))
    }

    /// Whether the process has been reaped.
    pub fn has_exited(&self) -> bool {
        self.exit_rx.borrow().is_some()
    }

    /// Wait for the reaped exit result.
    pub async fn exited(&self) -> ExitResult {
        let mut rx = self.exit_rx.clone();
        match rx.wait_for(Option::is_some).await {
            Ok(result) => result
                .clone()
                .unwrap_or_else(|| ExitResult::failed("process supervisor lost the exit status")),
            Err(_) => ExitResult::failed("process supervisor exited without a status"),
        }
    }
}

async fn supervise(
    session_id: SessionId,
    mut child: Child,
    mut kill_rx: mpsc::Receiver<KillReply>,
    exit_tx: watch::Sender<Option<ExitResult>>,
) {
    let pid = child.id();
    let result = loop {
        tokio::select! {
            status = child.wait() => {
                break match status {
                    Ok(status) => ExitResult::from_status(status),
                    Err(e) => {
                        warn!(%session_id, ?pid, error = %e, "Failed to reap process");
                        ExitResult::failed(format!("failed to wait for process: {e}"))
                    }
                };
            }
            Some(reply) = kill_rx.recv() => {
                match kill_unless_exited(&mut child) {
                    Ok(Some(status)) => {
                        debug!(%session_id, ?pid, "Kill arrived after exit");
                        let _ = reply.send(Err(SessionError::AlreadyExited));
                        break ExitResult::from_status(status);
                    }
                    Ok(None) => {
                        info!(%session_id, ?pid, "Sent SIGKILL to process group");
                        let _ = reply.send(Ok(()));
                    }
                    Err(e) => {
                        warn!(%session_id, ?pid, error = %e, "Kill failed");
                        let _ = reply.send(Err(e));
                    }
                }
            }
        }
    };

    info!(%session_id, ?pid, status = result.status, signal = ?result.signal, "Process reaped");
    exit_tx.send_replace(Some(result));

    // Anyone still queued raced the exit.
    kill_rx.close();
    while let Some(reply) = kill_rx.recv().await {
        let _ = reply.send(Err(SessionError::AlreadyExited));
    }
    debug!(%session_id, "Supervisor finished");
}

/// Kill the tree unless the child already exited but is not reaped yet, in
/// which case its status is returned and nothing is signalled.
fn kill_unless_exited(child: &mut Child) -> Result<Option<ExitStatus>, SessionError> {
    match child.try_wait() {
        Ok(Some(status)) => return Ok(Some(status)),
        Ok(None) => {}
        Err(e) => debug!(error = %e, "try_wait failed, killing anyway"),
    }
    kill_tree(child).map(|()| None)
}

/// SIGKILL the child's process group, falling back to the child alone.
fn kill_tree(child: &mut Child) -> Result<(), SessionError> {
    #[cfg(unix)]
    {
        if let Some(pid) = child.id() {
            use nix::errno::Errno;
            use nix::sys::signal::{Signal, killpg};
            use nix::unistd::Pid;

            let pgid = i32::try_from(pid).map_err(|e| SessionError::Signal(e.to_string()))?;
            match killpg(Pid::from_raw(pgid), Signal::SIGKILL) {
                Ok(()) => return Ok(()),
                // No group member left to signal; try the child directly.
                Err(Errno::ESRCH) => {}
                Err(e) => return Err(SessionError::Signal(e.to_string())),
            }
        }
    }

    match child.start_kill() {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::InvalidInput => Err(SessionError::AlreadyExited),
        Err(e) => Err(SessionError::Signal(e.to_string())),
    }
}
