use std::collections::BTreeMap;
use std::io;
use std::process::ExitStatus;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tokio::time;

use crate::error::ExecutorError;

#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

async fn drain_stream<R>(mut reader: R) -> Result<Vec<u8>, io::Error>
where
    R: AsyncRead + Unpin,
{
    let mut buffer = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        buffer.extend_from_slice(&chunk[..n]);
    }
    Ok(buffer)
}

pub(crate) fn spawn(
    command: &mut Command,
    command_display: &str,
) -> Result<tokio::process::Child, ExecutorError> {
    command.spawn().map_err(|source| ExecutorError::Spawn {
        command: command_display.to_string(),
        source,
    })
}

/// Runs `command`, piping `stdin_bytes` on stdin if provided (spec §8
/// "if useStdin, the exact rendered prompt is the stdin payload; if
/// !useStdin, ... stdin is closed").
pub(crate) async fn run_command(
    mut command: Command,
    command_display: &str,
    stdin_bytes: Option<&[u8]>,
    timeout: Option<Duration>,
) -> Result<CommandOutput, ExecutorError> {
    command.stdin(if stdin_bytes.is_some() {
        std::process::Stdio::piped()
    } else {
        std::process::Stdio::null()
    });
    command.stdout(std::process::Stdio::piped());
    command.stderr(std::process::Stdio::piped());

    let mut child = spawn(&mut command, command_display)?;

    if let Some(bytes) = stdin_bytes {
        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(bytes)
                .await
                .map_err(ExecutorError::StdinWrite)?;
        }
    }

    let stdout = child.stdout.take().ok_or(ExecutorError::MissingStdout)?;
    let stderr = child.stderr.take().ok_or(ExecutorError::MissingStderr)?;

    let stdout_task = tokio::spawn(drain_stream(stdout));
    let stderr_task = tokio::spawn(drain_stream(stderr));

    let wait_fut = child.wait();
    let status = if let Some(dur) = timeout {
        time::timeout(dur, wait_fut)
            .await
            .map_err(|_| ExecutorError::Timeout { timeout: dur })?
            .map_err(ExecutorError::Wait)?
    } else {
        wait_fut.await.map_err(ExecutorError::Wait)?
    };

    let stdout = stdout_task
        .await
        .map_err(|e| ExecutorError::Join(e.to_string()))?
        .map_err(ExecutorError::StdoutRead)?;
    let stderr = stderr_task
        .await
        .map_err(|e| ExecutorError::Join(e.to_string()))?
        .map_err(ExecutorError::StderrRead)?;

    Ok(CommandOutput {
        status,
        stdout,
        stderr,
    })
}

pub(crate) fn apply_env(command: &mut Command, env: &BTreeMap<String, String>) {
    for (k, v) in env {
        command.env(k, v);
    }
}
