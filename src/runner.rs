#![forbid(unsafe_code)]

//! Launches the retrieval binary and reports how it exited.
//!
//! The runner only invokes and reports. It never retries and never decides
//! what a failure means; that is the orchestrator's job.

use std::{
    io,
    path::PathBuf,
    process::Stdio,
    time::Duration,
};

use thiserror::Error;
use tokio::{
    io::{AsyncBufReadExt, AsyncRead, BufReader},
    process::Command,
    time::timeout,
};
use tracing::{debug, warn};

/// Upper bound on captured stderr. Failure markers sit at the end of the
/// output, so the tail is what is kept.
pub const MAX_STDERR_BYTES: usize = 64 * 1024;

/// Exit data from a single invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessOutcome {
    /// `-1` when the process was terminated by a signal.
    pub exit_code: i32,
    pub stderr_text: String,
}

impl ProcessOutcome {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("could not start {}: {source}", binary.display())]
    Spawn {
        binary: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("{} did not finish within {}s and was killed", binary.display(), after.as_secs())]
    TimedOut { binary: PathBuf, after: Duration },
    #[error("waiting for {}: {source}", binary.display())]
    Wait {
        binary: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Clone)]
pub struct ProcessRunner {
    binary: PathBuf,
    timeout: Duration,
}

impl ProcessRunner {
    pub fn new(binary: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            timeout,
        }
    }

    /// Runs the binary with exactly `args` (no shell) and waits for it to exit.
    pub async fn run(&self, args: &[String]) -> Result<ProcessOutcome, RunnerError> {
        let mut child = Command::new(&self.binary)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| RunnerError::Spawn {
                binary: self.binary.clone(),
                source,
            })?;

        let mut collector = child.stderr.take().map(|stderr| tokio::spawn(collect_stderr(stderr)));

        // One deadline covers the exit and the stderr drain: a helper that
        // outlives the binary can hold the pipe open after it exits.
        let finished = timeout(self.timeout, async {
            let status = child.wait().await;
            let stderr_text = match collector.as_mut() {
                Some(collector) => collector.await.unwrap_or_default(),
                None => String::new(),
            };
            (status, stderr_text)
        })
        .await;

        let (status, stderr_text) = match finished {
            Ok((status, stderr_text)) => {
                let status = status.map_err(|source| RunnerError::Wait {
                    binary: self.binary.clone(),
                    source,
                })?;
                (status, stderr_text)
            }
            Err(_) => {
                warn!(
                    binary = %self.binary.display(),
                    timeout_secs = self.timeout.as_secs(),
                    "retrieval binary timed out, killing it"
                );
                if let Err(err) = child.kill().await {
                    warn!(error = %err, "failed to kill timed out process");
                }
                if let Some(collector) = collector {
                    collector.abort();
                }
                return Err(RunnerError::TimedOut {
                    binary: self.binary.clone(),
                    after: self.timeout,
                });
            }
        };

        let exit_code = status.code().unwrap_or(-1);
        debug!(binary = %self.binary.display(), exit_code, "retrieval binary exited");

        Ok(ProcessOutcome {
            exit_code,
            stderr_text,
        })
    }
}

/// Reads stderr line by line until EOF, keeping at most the last
/// [`MAX_STDERR_BYTES`]. Invalid UTF-8 is replaced rather than ending the
/// capture early.
async fn collect_stderr<R>(stderr: R) -> String
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(stderr);
    let mut collected = String::new();
    let mut line = Vec::new();
    loop {
        line.clear();
        match reader.read_until(b'\n', &mut line).await {
            Ok(0) => break,
            Ok(_) => {
                let text = String::from_utf8_lossy(&line);
                debug!(line = %text.trim_end(), "yt-dlp stderr");
                collected.push_str(&text);
                if collected.len() > MAX_STDERR_BYTES {
                    let mut cut = collected.len() - MAX_STDERR_BYTES;
                    while !collected.is_char_boundary(cut) {
                        cut += 1;
                    }
                    collected.drain(..cut);
                }
            }
            Err(err) => {
                warn!(error = %err, "stopped reading stderr");
                break;
            }
        }
    }
    collected
}
