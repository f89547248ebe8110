//! `execd` client library.
//!
//! Runs commands inside a local `execd` daemon with an API shaped like
//! [`std::process::Command`]:
//!
//! ```no_run
//! # async fn demo() -> Result<(), execd_client::ClientError> {
//! let mut client = execd_client::connect("/run/execd.sock").await?;
//! let output = execd_client::RemoteCommand::new("/bin/echo")
//!     .arg("hello")
//!     .output(&mut client)
//!     .await?;
//! assert_eq!(output.stdout, b"hello\n");
//! # Ok(())
//! # }
//! ```

pub mod command;
pub mod connection;
pub mod error;

pub use command::{CommandOutput, Input, Output, RemoteCommand, RunningCommand};
pub use connection::{ConnectionConfig, ExecutorClient, connect, connect_with};
pub use error::ClientError;
