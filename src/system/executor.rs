// EN: src/system/executor.rs

use std::collections::HashMap;
use std::io::{self, ErrorKind};
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Exit code reported when the process never produced one.
pub const NO_EXIT_CODE: i32 = -1;

#[derive(Error, Debug, Clone)]
pub enum ExecError {
    #[error("Command '{program}' could not be executed: {source}")]
    Spawn {
        program: String,
        #[source]
        source: Arc<io::Error>,
    },
    #[error("Command '{program}' was terminated by signal {signal}.")]
    Signal { program: String, signal: i32 },
    #[error("Command '{program}' was cancelled by the user.")]
    Cancelled { program: String },
    #[error("Lost track of command '{program}': {source}")]
    Wait {
        program: String,
        #[source]
        source: Arc<io::Error>,
    },
}

/// How the child's standard streams are wired.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StdioPolicy {
    /// The child writes straight to this process's terminal.
    #[default]
    Passthrough,
    /// stdout and stderr are collected into the [`ExecResult`].
    Capture,
}

#[derive(Debug, Clone, Default)]
pub struct ExecOptions {
    pub stdio: StdioPolicy,
    /// Added on top of the inherited environment.
    pub env: HashMap<String, String>,
    pub cwd: Option<PathBuf>,
}

/// The outcome of one execution. Failures are reported in `error`; a clean
/// non-zero exit leaves `error` empty and is read from `exit_code`.
#[derive(Debug)]
pub struct ExecResult {
    pub program: String,
    pub argv: Vec<String>,
    /// [`NO_EXIT_CODE`] when the process was never started or did not exit
    /// on its own.
    pub exit_code: i32,
    pub duration: Duration,
    pub stdout: Option<String>,
    pub stderr: Option<String>,
    pub error: Option<ExecError>,
}

impl ExecResult {
    fn new(program: &str, argv: &[String]) -> Self {
        Self {
            program: program.to_string(),
            argv: argv.to_vec(),
            exit_code: NO_EXIT_CODE,
            duration: Duration::ZERO,
            stdout: None,
            stderr: None,
            error: None,
        }
    }

    /// The process ran and exited with code 0.
    pub fn success(&self) -> bool {
        self.error.is_none() && self.exit_code == 0
    }
}

fn build_command(program: &str, argv: &[String], options: &ExecOptions) -> Command {
    let mut command = Command::new(program);
    command.args(argv).envs(&options.env).kill_on_drop(true);
    if let Some(cwd) = &options.cwd {
        command.current_dir(dunce::simplified(cwd));
    }
    match options.stdio {
        StdioPolicy::Passthrough => {
            command.stdout(Stdio::inherit()).stderr(Stdio::inherit());
        }
        StdioPolicy::Capture => {
            command
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped());
        }
    }
    command
}

fn spawn(program: &str, argv: &[String], options: &ExecOptions) -> io::Result<tokio::process::Child> {
    // Fallback logic for Windows built-in commands like `echo`.
    // We try to spawn directly first. If it fails with `NotFound`, we try with `cmd /C`.
    match build_command(program, argv, options).spawn() {
        Err(e) if e.kind() == ErrorKind::NotFound && cfg!(target_os = "windows") => {
            log::debug!("Command '{}' not found. Retrying with cmd /C.", program);
            let mut wrapped = vec!["/C".to_string(), program.to_string()];
            wrapped.extend(argv.iter().cloned());
            build_command("cmd", &wrapped, options).spawn()
        }
        other => other,
    }
}

fn drain<R>(stream: Option<R>) -> Option<JoinHandle<Vec<u8>>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    stream.map(|mut stream| {
        tokio::spawn(async move {
            let mut buffer = Vec::new();
            if let Err(e) = stream.read_to_end(&mut buffer).await {
                log::debug!("Stopped reading child output: {}", e);
            }
            buffer
        })
    })
}

async fn collect(reader: Option<JoinHandle<Vec<u8>>>) -> Option<String> {
    let bytes = reader?.await.ok()?;
    Some(String::from_utf8_lossy(&bytes).into_owned())
}

#[cfg(unix)]
fn termination_signal(status: &ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn termination_signal(_status: &ExitStatus) -> Option<i32> {
    None
}

/// Runs `program` with `argv` and waits for it, killing the child if `cancel`
/// fires first. Never fails: every failure is reported in the result.
///
/// A cancelled run returns without its captured output.
pub async fn execute(
    program: &str,
    argv: &[String],
    options: &ExecOptions,
    cancel: &CancellationToken,
) -> ExecResult {
    let started = Instant::now();
    let mut result = ExecResult::new(program, argv);

    if cancel.is_cancelled() {
        result.error = Some(ExecError::Cancelled {
            program: program.to_string(),
        });
        return result;
    }

    log::debug!("Executing '{}' with args {:?}", program, argv);
    let mut child = match spawn(program, argv, options) {
        Ok(child) => child,
        Err(source) => {
            result.duration = started.elapsed();
            result.error = Some(ExecError::Spawn {
                program: program.to_string(),
                source: Arc::new(source),
            });
            return result;
        }
    };

    let stdout = drain(child.stdout.take());
    let stderr = drain(child.stderr.take());

    let waited = tokio::select! {
        status = child.wait() => Some(status),
        _ = cancel.cancelled() => None,
    };

    match waited {
        Some(Ok(status)) => {
            if let Some(code) = status.code() {
                result.exit_code = code;
            } else if let Some(signal) = termination_signal(&status) {
                result.error = Some(ExecError::Signal {
                    program: program.to_string(),
                    signal,
                });
            }
        }
        Some(Err(source)) => {
            result.error = Some(ExecError::Wait {
                program: program.to_string(),
                source: Arc::new(source),
            });
        }
        None => {
            log::debug!(
                "Cancellation requested, killing child process (PID: {:?})...",
                child.id()
            );
            if let Err(e) = child.kill().await {
                log::warn!("Failed to kill child process {:?}: {}", child.id(), e);
            }
            // A grandchild may still hold the pipes open; stop reading now.
            for reader in stdout.iter().chain(stderr.iter()) {
                reader.abort();
            }
            result.error = Some(ExecError::Cancelled {
                program: program.to_string(),
            });
        }
    }

    result.stdout = collect(stdout).await;
    result.stderr = collect(stderr).await;
    result.duration = started.elapsed();
    result
}
