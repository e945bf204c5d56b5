//! Child process execution with combined output capture.
//!
//! The child's stdout and stderr share one pipe, so captured lines keep the
//! order the child emitted them in. Every run owns its own child and pipe,
//! which keeps concurrent runs independent of each other.
use crate::util::format_command_line;
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use std::io::Write;
use std::os::fd::OwnedFd;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::net::unix::pipe;
use tokio::process::Command;
use tokio::sync::mpsc;

/// How long to keep reading after a timed-out child was killed.
const KILL_DRAIN_GRACE: Duration = Duration::from_millis(500);

#[derive(Debug, Error)]
pub enum ProcessError {
    /// The program could not be started at all.
    #[error("failed to launch {program}: {source}")]
    Launch {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to set up output pipe for {program}: {source}")]
    Pipe {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed waiting for {program}: {source}")]
    Wait {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("output capture for {program} was interrupted: {reason}")]
    Capture { program: String, reason: String },
}

/// Where captured lines are echoed while a process runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Echo {
    #[default]
    Off,
    Stdout,
    Stderr,
}

/// Everything a finished child wrote, plus how it ended.
#[derive(Debug, Clone, Default)]
pub struct CapturedOutput {
    pub lines: Vec<String>,
    /// `None` when the child was killed by a signal or by the timeout.
    pub exit_code: Option<i32>,
    pub timed_out: bool,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessRunner {
    echo: Echo,
    timeout: Option<Duration>,
}

impl ProcessRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_echo(mut self, echo: Echo) -> Self {
        self.echo = echo;
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Run `program` with `args` to completion and capture its output.
    pub async fn run(
        &self,
        program: &Path,
        args: &[String],
    ) -> Result<CapturedOutput, ProcessError> {
        let program_name = program.display().to_string();
        tracing::debug!(command = %format_command_line(program, args), "spawn");

        let pipe_error = |source| ProcessError::Pipe {
            program: program_name.clone(),
            source,
        };
        let (pipe_reader, pipe_writer) = std::io::pipe().map_err(pipe_error)?;
        let stderr_writer = pipe_writer.try_clone().map_err(pipe_error)?;
        let receiver =
            pipe::Receiver::from_owned_fd(OwnedFd::from(pipe_reader)).map_err(pipe_error)?;

        let mut command = Command::new(program);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(pipe_writer)
            .stderr(stderr_writer)
            .kill_on_drop(true);
        if self.timeout.is_some() {
            // Own group, so a timeout also reaches anything the child forked.
            command.process_group(0);
        }
        let spawned = command.spawn();
        // Release our copies of the write end or the reader never sees EOF.
        drop(command);
        let mut child = spawned.map_err(|source| ProcessError::Launch {
            program: program_name.clone(),
            source,
        })?;
        let pid = child.id();

        let (line_tx, line_rx) = mpsc::unbounded_channel::<String>();
        let mut reader = tokio::spawn(forward_lines(receiver, line_tx));
        let collector = tokio::spawn(collect_lines(line_rx, self.echo));

        let wait_error = |source| ProcessError::Wait {
            program: program_name.clone(),
            source,
        };
        let (status, timed_out) = match self.timeout {
            None => (Some(child.wait().await.map_err(wait_error)?), false),
            Some(limit) => match tokio::time::timeout(limit, child.wait()).await {
                Ok(status) => (Some(status.map_err(wait_error)?), false),
                Err(_) => {
                    tracing::warn!(
                        program = %program_name,
                        pid,
                        timeout_secs = limit.as_secs_f64(),
                        "process timed out, killing"
                    );
                    kill_process_group(pid);
                    child.kill().await.map_err(wait_error)?;
                    if tokio::time::timeout(KILL_DRAIN_GRACE, &mut reader)
                        .await
                        .is_err()
                    {
                        tracing::warn!(
                            program = %program_name,
                            "output pipe still open after kill, dropping the rest"
                        );
                        reader.abort();
                    }
                    (None, true)
                }
            },
        };

        let lines = collector.await.map_err(|err| ProcessError::Capture {
            program: program_name.clone(),
            reason: err.to_string(),
        })?;
        let exit_code = status.and_then(|status| status.code());
        tracing::debug!(
            program = %program_name,
            pid,
            exit_code,
            line_count = lines.len(),
            "process finished"
        );

        Ok(CapturedOutput {
            lines,
            exit_code,
            timed_out,
        })
    }
}

fn kill_process_group(pid: Option<u32>) {
    let Some(pgid) = pid.and_then(|pid| i32::try_from(pid).ok()) else {
        return;
    };
    if let Err(err) = killpg(Pid::from_raw(pgid), Signal::SIGKILL) {
        tracing::debug!(pgid, error = %err, "kill process group");
    }
}

async fn forward_lines<R>(stream: R, line_tx: mpsc::UnboundedSender<String>)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(stream);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let text = String::from_utf8_lossy(&buf);
                let line = text.trim_end_matches(['\n', '\r']).to_string();
                if line_tx.send(line).is_err() {
                    break;
                }
            }
            Err(err) => {
                tracing::warn!(error = %err, "read from child output failed");
                break;
            }
        }
    }
}

async fn collect_lines(
    mut line_rx: mpsc::UnboundedReceiver<String>,
    mut echo: Echo,
) -> Vec<String> {
    let mut lines = Vec::new();
    while let Some(line) = line_rx.recv().await {
        if let Err(err) = echo_line(echo, &line) {
            tracing::debug!(error = %err, "echo target closed, capturing silently");
            echo = Echo::Off;
        }
        lines.push(line);
    }
    lines
}

fn echo_line(echo: Echo, line: &str) -> std::io::Result<()> {
    match echo {
        Echo::Off => Ok(()),
        Echo::Stdout => writeln!(std::io::stdout().lock(), "{line}"),
        Echo::Stderr => writeln!(std::io::stderr().lock(), "{line}"),
    }
}
