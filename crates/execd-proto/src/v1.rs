//! `execd.v1` message types.
//!
//! Declared with `prost` derives instead of `.proto` sources; the field tags
//! are the wire contract and must not be renumbered.

/// `ExecCommand` request: describes the command to register.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ExecCommandRequest {
    #[prost(string, tag = "1")]
    pub path: ::prost::alloc::string::String,
    #[prost(string, repeated, tag = "2")]
    pub args: ::prost::alloc::vec::Vec<::prost::alloc::string::String>,
    /// Environment override. Absent means the child inherits the daemon's.
    #[prost(message, optional, tag = "3")]
    pub env: ::core::option::Option<Environment>,
    #[prost(string, optional, tag = "4")]
    pub dir: ::core::option::Option<::prost::alloc::string::String>,
}

/// A full environment as `KEY=VALUE` entries.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Environment {
    #[prost(string, repeated, tag = "1")]
    pub vars: ::prost::alloc::vec::Vec<::prost::alloc::string::String>,
}

#[derive(Clone, Copy, PartialEq, ::prost::Message)]
pub struct ExecCommandResponse {
    #[prost(uint32, tag = "1")]
    pub session_id: u32,
}

#[derive(Clone, Copy, PartialEq, ::prost::Message)]
pub struct StartRequest {
    #[prost(uint32, tag = "1")]
    pub session_id: u32,
    #[prost(bool, tag = "2")]
    pub want_stdin: bool,
    #[prost(bool, tag = "3")]
    pub want_stdout: bool,
    #[prost(bool, tag = "4")]
    pub want_stderr: bool,
}

/// `Start` outcome. A spawn failure is reported here, not as an RPC error.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct StartResponse {
    #[prost(bool, tag = "1")]
    pub success: bool,
    #[prost(string, tag = "2")]
    pub error: ::prost::alloc::string::String,
}

/// One frame of the `SendInput` client stream.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct InputChunk {
    #[prost(uint32, tag = "1")]
    pub session_id: u32,
    #[prost(oneof = "input_chunk::Payload", tags = "2, 3")]
    pub payload: ::core::option::Option<input_chunk::Payload>,
}

/// Nested types for [`InputChunk`].
pub mod input_chunk {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Payload {
        #[prost(bytes, tag = "2")]
        Data(::prost::alloc::vec::Vec<u8>),
        #[prost(message, tag = "3")]
        End(super::EndOfInput),
    }
}

/// Marker closing the child's stdin.
#[derive(Clone, Copy, PartialEq, ::prost::Message)]
pub struct EndOfInput {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SendInputResponse {
    /// Write failure on the stdin pipe, empty on success.
    #[prost(string, tag = "1")]
    pub error: ::prost::alloc::string::String,
    #[prost(uint64, tag = "2")]
    pub bytes_written: u64,
}

#[derive(Clone, Copy, PartialEq, ::prost::Message)]
pub struct FetchRequest {
    #[prost(uint32, tag = "1")]
    pub session_id: u32,
}

/// One frame of a `FetchStdout`/`FetchStderr` server stream.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct OutputChunk {
    #[prost(oneof = "output_chunk::Kind", tags = "1, 2, 3, 4")]
    pub kind: ::core::option::Option<output_chunk::Kind>,
}

/// Nested types for [`OutputChunk`].
pub mod output_chunk {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Kind {
        #[prost(message, tag = "1")]
        Start(super::StreamStart),
        #[prost(bytes, tag = "2")]
        Data(::prost::alloc::vec::Vec<u8>),
        #[prost(message, tag = "3")]
        Closed(super::StreamClosed),
        #[prost(string, tag = "4")]
        RuntimeError(::prost::alloc::string::String),
    }
}

#[derive(Clone, Copy, PartialEq, ::prost::Message)]
pub struct StreamStart {}

#[derive(Clone, Copy, PartialEq, ::prost::Message)]
pub struct StreamClosed {}

#[derive(Clone, Copy, PartialEq, ::prost::Message)]
pub struct WaitRequest {
    #[prost(uint32, tag = "1")]
    pub session_id: u32,
}

/// Final disposition of a command.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct WaitResponse {
    #[prost(int32, tag = "1")]
    pub exit_status: i32,
    #[prost(string, tag = "2")]
    pub err_content: ::prost::alloc::string::String,
    /// Terminating signal number when the process was signalled.
    #[prost(int32, optional, tag = "3")]
    pub signal: ::core::option::Option<i32>,
}

#[derive(Clone, Copy, PartialEq, ::prost::Message)]
pub struct KillRequest {
    #[prost(uint32, tag = "1")]
    pub session_id: u32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct KillResponse {
    /// Benign failure (already exited, never started), empty on success.
    #[prost(string, tag = "1")]
    pub error: ::prost::alloc::string::String,
}

impl OutputChunk {
    /// Whether this chunk ends the stream.
    pub const fn is_terminal(&self) -> bool {
        matches!(
            self.kind,
            Some(output_chunk::Kind::Closed(_) | output_chunk::Kind::RuntimeError(_))
        )
    }
}

impl InputChunk {
    pub const fn data(session_id: u32, data: ::prost::alloc::vec::Vec<u8>) -> Self {
        Self {
            session_id,
            payload: Some(input_chunk::Payload::Data(data)),
        }
    }

    pub const fn end(session_id: u32) -> Self {
        Self {
            session_id,
            payload: Some(input_chunk::Payload::End(EndOfInput {})),
        }
    }
}

tonic::include_proto!("execd.v1.Executor");
