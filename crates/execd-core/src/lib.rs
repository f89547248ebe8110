//! `execd` Core Library
//!
//! Shared functionality for `execd` components:
//! - Command description and stdio selection types
//! - Exit result model shared by daemon and client
//! - Configuration resolution and hierarchy
//! - Common error types

pub mod config;
pub mod error;
pub mod exit;
pub mod tracing_init;
pub mod types;

pub use config::Config;
pub use error::{Error, Result};
pub use exit::{ExitResult, NEVER_RAN_STATUS};
pub use types::{CommandSpec, SessionId, StdioFlags, StreamKind};
