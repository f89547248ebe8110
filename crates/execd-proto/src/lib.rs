//! execd Protocol Buffers
//!
//! Wire types and generated gRPC stubs for the execd `Executor` service.
//!
//! This crate contains:
//! - the prost message types (`v1`)
//! - `executor_server` / `executor_client` generated by tonic-build

#![allow(clippy::derive_partial_eq_without_eq)]

/// execd v1 API definitions.
pub mod v1;

// Re-export v1 as the default API version for convenience
pub use v1::*;
