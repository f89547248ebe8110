//! Build script for execd-proto
//!
//! Generates the `Executor` client and server stubs with tonic-build's manual
//! service builder. Message types are declared by hand in `src/v1.rs`, so no
//! `protoc` is required.

use tonic_build::manual::{Builder, Method, Service};

const CODEC: &str = "tonic_prost::ProstCodec";

fn method(name: &str, route: &str, input: &str, output: &str) -> tonic_build::manual::MethodBuilder {
    Method::builder()
        .name(name)
        .route_name(route)
        .input_type(format!("crate::v1::{input}"))
        .output_type(format!("crate::v1::{output}"))
        .codec_path(CODEC)
}

fn main() {
    let executor = Service::builder()
        .name("Executor")
        .package("execd.v1")
        .method(method("exec_command", "ExecCommand", "ExecCommandRequest", "ExecCommandResponse").build())
        .method(method("start", "Start", "StartRequest", "StartResponse").build())
        .method(
            method("send_input", "SendInput", "InputChunk", "SendInputResponse")
                .client_streaming()
                .build(),
        )
        .method(
            method("fetch_stdout", "FetchStdout", "FetchRequest", "OutputChunk")
                .server_streaming()
                .build(),
        )
        .method(
            method("fetch_stderr", "FetchStderr", "FetchRequest", "OutputChunk")
                .server_streaming()
                .build(),
        )
        .method(method("wait", "Wait", "WaitRequest", "WaitResponse").build())
        .method(method("kill", "Kill", "KillRequest", "KillResponse").build())
        .build();

    Builder::new().compile(&[executor]);

    println!("cargo:rerun-if-changed=build.rs");
}
