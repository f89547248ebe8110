//! Final disposition of an executed command.

use std::fmt;
use std::process::ExitStatus;

use serde::{Deserialize, Serialize};

/// Status reported for a command that never produced a real exit
/// (spawn failure, reap failure). Real statuses are never negative.
pub const NEVER_RAN_STATUS: i32 = -1;

/// Offset added to a terminating signal number, following the shell convention.
const SIGNAL_STATUS_BASE: i32 = 128;

/// Exit status plus optional error text.
///
/// The two are complementary: a process that really exited carries only a
/// status (and a signal when it was killed by one); a process that never got
/// that far carries [`NEVER_RAN_STATUS`] and a description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExitResult {
    pub status: i32,
    pub signal: Option<i32>,
    pub error: Option<String>,
}

impl ExitResult {
    /// Normal termination with `code`.
    pub const fn exited(code: i32) -> Self {
        Self {
            status: code,
            signal: None,
            error: None,
        }
    }

    /// Termination by signal `signo`.
    pub const fn signaled(signo: i32) -> Self {
        Self {
            status: SIGNAL_STATUS_BASE + signo,
            signal: Some(signo),
            error: None,
        }
    }

    /// The command never reached a real exit.
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: NEVER_RAN_STATUS,
            signal: None,
            error: Some(error.into()),
        }
    }

    /// Translate a platform wait status.
    pub fn from_status(status: ExitStatus) -> Self {
        if let Some(code) = status.code() {
            return Self::exited(code);
        }
        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            if let Some(signo) = status.signal() {
                return Self::signaled(signo);
            }
        }
        Self::failed(format!("unrecognised wait status: {status}"))
    }

    /// Rebuild from wire fields. An empty error string means "no error".
    pub fn from_parts(status: i32, signal: Option<i32>, error: String) -> Self {
        Self {
            status,
            signal,
            error: (!error.is_empty()).then_some(error),
        }
    }

    /// True only for a real exit with code 0.
    pub const fn success(&self) -> bool {
        self.status == 0 && self.error.is_none()
    }

    /// Whether the process actually ran to an exit (normal or signalled).
    pub const fn ran(&self) -> bool {
        self.error.is_none()
    }

    pub const fn code(&self) -> i32 {
        self.status
    }
}

impl fmt::Display for ExitResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.error, self.signal) {
            (Some(error), _) => write!(f, "failed to run: {error}"),
            (None, Some(signo)) => write!(f, "terminated by signal {signo}"),
            (None, None) => write!(f, "exit status {}", self.status),
        }
    }
}
