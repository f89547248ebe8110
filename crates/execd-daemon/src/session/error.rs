//! Session lifecycle errors.

use execd_core::StreamKind;

/// Errors from session operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("Command has not been started")]
    NotStarted,

    #[error("Command was already started")]
    AlreadyStarted,

    #[error("Command failed to start: {0}")]
    StartFailed(String),

    #[error("{0} was not requested at start")]
    NotRequested(StreamKind),

    #[error("{0} was already claimed")]
    AlreadyClaimed(StreamKind),

    #[error("Process already exited")]
    AlreadyExited,

    #[error("Failed to signal process: {0}")]
    Signal(String),
}

impl SessionError {
    /// Errors a caller misusing the protocol gets, as opposed to benign
    /// outcomes of a race with the process itself.
    pub const fn is_protocol(&self) -> bool {
        matches!(
            self,
            Self::NotStarted | Self::AlreadyStarted | Self::NotRequested(_) | Self::AlreadyClaimed(_)
        )
    }
}
