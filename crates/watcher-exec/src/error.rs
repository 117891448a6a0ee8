use std::process::ExitStatus;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("failed to spawn command {command:?}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("command timed out after {timeout:?}")]
    Timeout { timeout: Duration },
    #[error("failed waiting for command: {0}")]
    Wait(std::io::Error),
    #[error("failed reading stdout: {0}")]
    StdoutRead(std::io::Error),
    #[error("failed reading stderr: {0}")]
    StderrRead(std::io::Error),
    #[error("failed writing stdin: {0}")]
    StdinWrite(std::io::Error),
    #[error("internal error: missing stdout pipe")]
    MissingStdout,
    #[error("internal error: missing stderr pipe")]
    MissingStderr,
    #[error("internal error: join failure: {0}")]
    Join(String),
    #[error("command returned non-zero exit status: {status}")]
    NonZeroExit { status: ExitStatus },
    #[error("reactor post-comment failed: {0}")]
    PostFailed(String),
}
