//! `execd` - run one command through the local execd daemon.
//!
//! Local stdout and stderr receive the remote streams; with `--stdin` local
//! stdin is forwarded too. The exit code mirrors the remote one.

use std::path::PathBuf;
use std::process::ExitCode;

use std::io::Read;

use anyhow::Context;
use clap::Parser;
use tokio::io::{AsyncWriteExt, DuplexStream};
use tokio::runtime::Handle;
use tracing::{debug, error};

use execd_client::{ClientError, ConnectionConfig, Input, Output, RemoteCommand, connect_with};
use execd_core::tracing_init::init_tracing;

const STDIN_BUFFER: usize = 32 * 1024;

#[derive(Parser, Debug)]
#[command(name = "execd")]
#[command(version, about = "Run a command inside the execd daemon", long_about = None)]
struct Cli {
    /// Daemon socket path
    #[arg(long, env = "EXECD_SOCKET")]
    socket: Option<PathBuf>,

    /// Forward local stdin to the command
    #[arg(long)]
    stdin: bool,

    /// Working directory for the command (daemon side)
    #[arg(short = 'C', long)]
    dir: Option<PathBuf>,

    /// Environment entry KEY=VALUE; replaces the daemon environment when given
    #[arg(short, long = "env", value_name = "KEY=VALUE")]
    env: Vec<String>,

    /// Program to run
    program: String,

    /// Program arguments
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    args: Vec<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing("execd=warn,execd_client=warn", false);

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            error!(error = %format!("{e:#}"), "execd failed");
            ExitCode::from(exit_code_for_error(&e))
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let config = cli
        .socket
        .map_or_else(ConnectionConfig::default, ConnectionConfig::new);
    let mut client = connect_with(&config)
        .await
        .context("Is execd-daemon running?")?;

    let mut command = RemoteCommand::new(cli.program);
    command
        .args(cli.args)
        .stdout(Output::writer(tokio::io::stdout()))
        .stderr(Output::writer(tokio::io::stderr()));
    for entry in &cli.env {
        let (key, value) = entry.split_once('=').unwrap_or((entry.as_str(), ""));
        command.env(key, value);
    }
    if let Some(dir) = &cli.dir {
        command.current_dir(dir);
    }
    if cli.stdin {
        let pipe = forward_blocking(std::io::stdin(), Handle::current())?;
        command.stdin(Input::reader(pipe));
    }

    let status = command.spawn(&mut client).await?.wait().await?;
    debug!(%status, "Remote command finished");
    if let Some(error) = &status.error {
        error!(%error, "Remote command did not run to completion");
    }
    Ok(ExitCode::from(exit_byte(status.code())))
}

/// Feed a blocking reader into an async pipe from a plain thread.
///
/// `tokio::io::stdin` reads on the blocking pool, and runtime shutdown waits
/// for a read that may never return once the remote command has exited. A
/// detached thread does not hold the process open.
fn forward_blocking<R>(mut source: R, handle: Handle) -> std::io::Result<DuplexStream>
where
    R: Read + Send + 'static,
{
    let (mut writer, reader) = tokio::io::duplex(STDIN_BUFFER);
    std::thread::Builder::new()
        .name("execd-stdin".into())
        .spawn(move || {
            let mut buf = vec![0u8; STDIN_BUFFER];
            loop {
                let n = match source.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => n,
                    Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                    Err(e) => {
                        debug!(error = %e, "Local stdin read failed");
                        break;
                    }
                };
                if handle.block_on(writer.write_all(&buf[..n])).is_err() {
                    break;
                }
            }
        })?;
    Ok(reader)
}

/// Map a remote status onto the 0..=255 range a local exit code can carry.
fn exit_byte(status: i32) -> u8 {
    u8::try_from(status).unwrap_or(255)
}

/// 127 when the program could not be started, like a shell; 1 otherwise.
fn exit_code_for_error(err: &anyhow::Error) -> u8 {
    match err.downcast_ref::<ClientError>() {
        Some(ClientError::Spawn(_)) => 127,
        _ => 1,
    }
}
