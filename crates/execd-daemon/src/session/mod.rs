//! Command sessions: one spawned process and its stdio relays.
//!
//! A [`Session`] walks through registered → running (or start-failed) →
//! exited. `start` runs at most once; each declared output may be claimed at
//! most once; `wait` only resolves after every claimed output has been fully
//! drained and the process has been reaped.

mod claim;
mod error;
pub mod relay;
mod supervisor;

pub use claim::ClaimSignal;
pub use error::SessionError;
pub use relay::{InputError, InputFrame, OutputEvent};
pub use supervisor::SupervisorHandle;

use std::process::Stdio;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError};
use std::time::{Duration, Instant};

use tokio::io::AsyncRead;
use tokio::process::{ChildStdin, Command};
use tokio::sync::{Mutex, mpsc};
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use execd_core::{CommandSpec, ExitResult, SessionId, StdioFlags, StreamKind};

type OutputPipe = Box<dyn AsyncRead + Send + Unpin>;

/// Result of a `start` call that did not violate the protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartOutcome {
    Started { pid: Option<u32> },
    SpawnFailed(String),
}

/// A declared output stream: its pipe until claimed, and the claim signal.
struct OutputSlot {
    pipe: Option<OutputPipe>,
    claim: Arc<ClaimSignal>,
}

impl OutputSlot {
    fn new(pipe: Option<OutputPipe>) -> Option<Self> {
        pipe.map(|pipe| Self {
            pipe: Some(pipe),
            claim: Arc::new(ClaimSignal::new()),
        })
    }
}

struct Running {
    flags: StdioFlags,
    stdin: Option<ChildStdin>,
    stdout: Option<OutputSlot>,
    stderr: Option<OutputSlot>,
    supervisor: SupervisorHandle,
}

impl Running {
    fn output_mut(&mut self, kind: StreamKind) -> Option<&mut OutputSlot> {
        match kind {
            StreamKind::Stdout => self.stdout.as_mut(),
            StreamKind::Stderr => self.stderr.as_mut(),
            StreamKind::Stdin => None,
        }
    }

    fn declared_claims(&self) -> Vec<Arc<ClaimSignal>> {
        [&self.stdout, &self.stderr]
            .into_iter()
            .flatten()
            .map(|slot| Arc::clone(&slot.claim))
            .collect()
    }
}

enum Phase {
    Registered,
    Running(Box<Running>),
    StartFailed(String),
}

impl Phase {
    fn running_mut(&mut self) -> Result<&mut Running, SessionError> {
        match self {
            Self::Registered => Err(SessionError::NotStarted),
            Self::StartFailed(reason) => Err(SessionError::StartFailed(reason.clone())),
            Self::Running(running) => Ok(running),
        }
    }
}

/// Server-side state of one command invocation.
pub struct Session {
    id: SessionId,
    spec: CommandSpec,
    phase: Mutex<Phase>,
    /// Output relays started by `attach_output`; `wait` drains this.
    relays: TaskTracker,
    /// Pending `wait` calls and stdin pumps.
    busy: AtomicUsize,
    last_active: std::sync::Mutex<Instant>,
}

/// Marks a session busy for as long as it is held.
pub struct BusyGuard<'a> {
    busy: &'a AtomicUsize,
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.busy.fetch_sub(1, Ordering::AcqRel);
    }
}

impl Session {
    pub fn new(id: SessionId, spec: CommandSpec) -> Self {
        Self {
            id,
            spec,
            phase: Mutex::new(Phase::Registered),
            relays: TaskTracker::new(),
            busy: AtomicUsize::new(0),
            last_active: std::sync::Mutex::new(Instant::now()),
        }
    }

    pub const fn id(&self) -> SessionId {
        self.id
    }

    pub const fn spec(&self) -> &CommandSpec {
        &self.spec
    }

    /// Spawn the process with the requested pipes.
    ///
    /// A spawn failure is not an error of this call: the session records it
    /// and `wait` reports it later.
    pub async fn start(&self, flags: StdioFlags) -> Result<StartOutcome, SessionError> {
        let mut phase = self.phase.lock().await;
        if !matches!(*phase, Phase::Registered) {
            return Err(SessionError::AlreadyStarted);
        }

        let spawned = self
            .build_command(flags)
            .and_then(|mut command| command.spawn().map_err(|e| e.to_string()));
        let mut child = match spawned {
            Ok(child) => child,
            Err(e) => {
                let reason = format!("failed to start {}: {e}", self.spec.path);
                warn!(session_id = %self.id, path = %self.spec.path, error = %e, "Spawn failed");
                *phase = Phase::StartFailed(reason.clone());
                return Ok(StartOutcome::SpawnFailed(reason));
            }
        };

        let pid = child.id();
        let stdin = child.stdin.take();
        let stdout = child.stdout.take().map(|p| Box::new(p) as OutputPipe);
        let stderr = child.stderr.take().map(|p| Box::new(p) as OutputPipe);
        let supervisor = SupervisorHandle::spawn(self.id, child);

        *phase = Phase::Running(Box::new(Running {
            flags,
            stdin,
            stdout: OutputSlot::new(stdout),
            stderr: OutputSlot::new(stderr),
            supervisor,
        }));
        drop(phase);

        info!(
            session_id = %self.id,
            path = %self.spec.path,
            ?pid,
            stdin = flags.stdin,
            stdout = flags.stdout,
            stderr = flags.stderr,
            "Process started"
        );
        Ok(StartOutcome::Started { pid })
    }

    fn build_command(&self, flags: StdioFlags) -> Result<Command, String> {
        let mut command = Command::new(&self.spec.path);
        command.args(&self.spec.args);

        if let Some(vars) = self.spec.env_pairs().map_err(|e| e.to_string())? {
            command.env_clear().envs(vars);
        }
        if let Some(dir) = &self.spec.dir {
            command.current_dir(dir);
        }

        command
            .stdin(piped_if(flags.stdin))
            .stdout(piped_if(flags.stdout))
            .stderr(piped_if(flags.stderr));

        // Own process group so a kill reaches everything the command spawns.
        #[cfg(unix)]
        command.process_group(0);

        Ok(command)
    }

    /// Claim a declared output stream and start draining it into `tx`.
    ///
    /// The relay is registered with the session before the claim fires, so a
    /// `wait` woken by the claim always sees it.
    pub async fn attach_output(
        &self,
        kind: StreamKind,
        chunk_size: usize,
        tx: mpsc::Sender<OutputEvent>,
    ) -> Result<(), SessionError> {
        let mut phase = self.phase.lock().await;
        let running = phase.running_mut()?;
        let slot = running
            .output_mut(kind)
            .ok_or(SessionError::NotRequested(kind))?;
        if slot.claim.is_fired() {
            return Err(SessionError::AlreadyClaimed(kind));
        }
        let pipe = slot.pipe.take().ok_or(SessionError::AlreadyClaimed(kind))?;

        self.relays
            .spawn(relay::drain_output(self.id, kind, pipe, chunk_size, tx));
        if !slot.claim.fire() {
            return Err(SessionError::AlreadyClaimed(kind));
        }
        drop(phase);

        debug!(session_id = %self.id, stream = %kind, "Output claimed");
        Ok(())
    }

    /// Take the stdin pipe for a `SendInput` relay. Only one relay may own it.
    pub async fn take_stdin(&self) -> Result<ChildStdin, SessionError> {
        let mut phase = self.phase.lock().await;
        let running = phase.running_mut()?;
        if !running.flags.stdin {
            return Err(SessionError::NotRequested(StreamKind::Stdin));
        }
        running
            .stdin
            .take()
            .ok_or(SessionError::AlreadyClaimed(StreamKind::Stdin))
    }

    /// Request forceful termination of the process tree. Does not wait for it.
    pub async fn kill(&self) -> Result<(), SessionError> {
        let supervisor = {
            let mut phase = self.phase.lock().await;
            phase.running_mut()?.supervisor.clone()
        };
        supervisor.kill().await
    }

    /// Wait for every claimed output to drain and for the process to be reaped.
    pub async fn wait(&self) -> Result<ExitResult, SessionError> {
        let _busy = self.mark_busy();
        let (claims, supervisor) = {
            let mut phase = self.phase.lock().await;
            match phase.running_mut() {
                Ok(running) => (running.declared_claims(), running.supervisor.clone()),
                Err(SessionError::StartFailed(reason)) => return Ok(ExitResult::failed(reason)),
                Err(e) => return Err(e),
            }
        };

        for claim in &claims {
            claim.fired().await;
        }
        debug!(session_id = %self.id, "All declared outputs claimed");

        self.relays.close();
        self.relays.wait().await;
        debug!(session_id = %self.id, "All output relays finished");

        let result = supervisor.exited().await;
        self.touch();
        Ok(result)
    }

    /// Whether the process has been started and reaped.
    pub async fn has_exited(&self) -> bool {
        match &*self.phase.lock().await {
            Phase::Running(running) => running.supervisor.has_exited(),
            Phase::StartFailed(_) => true,
            Phase::Registered => false,
        }
    }

    pub fn mark_busy(&self) -> BusyGuard<'_> {
        self.busy.fetch_add(1, Ordering::AcqRel);
        self.touch();
        BusyGuard { busy: &self.busy }
    }

    /// Record caller activity.
    pub fn touch(&self) {
        *self
            .last_active
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Instant::now();
    }

    /// Idle means no caller activity for `max_idle`, no pending `wait`, no
    /// stdin pump and no live output relay.
    pub fn is_idle(&self, max_idle: Duration) -> bool {
        let last = *self
            .last_active
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        self.busy.load(Ordering::Acquire) == 0 && self.relays.is_empty() && last.elapsed() >= max_idle
    }
}

fn piped_if(wanted: bool) -> Stdio {
    if wanted { Stdio::piped() } else { Stdio::null() }
}
