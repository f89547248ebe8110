//! execd Daemon Library
//!
//! Core functionality for the execd daemon:
//! - Session registry shared by all RPC calls
//! - Per-command sessions: spawn, stdio relays, kill, reap
//! - Optional idle session reaper
//! - gRPC server on a Unix socket

pub mod reaper;
pub mod registry;
pub mod server;
pub mod session;
