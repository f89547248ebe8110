//! Client errors.

use execd_core::StreamKind;

/// Errors surfaced by the client facade.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("Connection failed: {0}")]
    ConnectFailed(String),

    #[error("RPC call failed: {0}")]
    Rpc(#[from] tonic::Status),

    #[error("Failed to start command: {0}")]
    Spawn(String),

    #[error("Remote {stream} relay failed: {message}")]
    Stream { stream: StreamKind, message: String },

    #[error("Remote {stream} ended without a terminal chunk")]
    Truncated { stream: StreamKind },

    #[error("Local I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Relay task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("Command failed ({}): {}", describe_exit(*.code, *.signal), .stderr.trim_end())]
    Exit {
        code: i32,
        signal: Option<i32>,
        stderr: String,
    },
}

fn describe_exit(code: i32, signal: Option<i32>) -> String {
    signal.map_or_else(
        || format!("exit status {code}"),
        |signo| format!("signal {signo}"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_error_names_signal_or_code() {
        let err = ClientError::Exit {
            code: 2,
            signal: None,
            stderr: "boom\n".into(),
        };
        assert_eq!(err.to_string(), "Command failed (exit status 2): boom");

        let err = ClientError::Exit {
            code: 137,
            signal: Some(9),
            stderr: String::new(),
        };
        assert_eq!(err.to_string(), "Command failed (signal 9): ");
    }
}
