//! External tool invocation with a wall-clock timeout.
//!
//! Commands run through `sh -c` in a working directory, inherit the process
//! environment plus caller overrides, and always see `CI=true` so package
//! managers and scaffolders never stop to prompt. Failures are classified
//! (timeout, tool missing, non-zero exit); retry policy lives in the queue.

use std::collections::{BTreeMap, VecDeque};
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Default wall-clock limit for a single external command.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(600);

/// Bytes of stdout/stderr kept for diagnostics (the tail end).
pub const MAX_CAPTURED_OUTPUT: usize = 4096;

/// Exit status `sh` uses when the command itself cannot be found.
const SHELL_COMMAND_NOT_FOUND: i32 = 127;

// ---------------------------------------------------------------------------
// Command spec / output
// ---------------------------------------------------------------------------

/// One external command to run.
#[derive(Debug, Clone)]
pub struct CommandSpec {
    pub command: String,
    pub cwd: PathBuf,
    pub env: BTreeMap<String, String>,
    pub timeout: Duration,
}

impl CommandSpec {
    pub fn new(command: impl Into<String>, cwd: impl Into<PathBuf>) -> Self {
        Self {
            command: command.into(),
            cwd: cwd.into(),
            env: BTreeMap::new(),
            timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn envs(mut self, vars: &BTreeMap<String, String>) -> Self {
        self.env
            .extend(vars.iter().map(|(k, v)| (k.clone(), v.clone())));
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// First word of the command line, used to name a missing tool.
    pub fn program(&self) -> &str {
        self.command.split_whitespace().next().unwrap_or_default()
    }
}

/// Captured result of a successful command.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
}

// ---------------------------------------------------------------------------
// Runner
// ---------------------------------------------------------------------------

/// Seam between the generation pipeline and the outside world's tooling.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput>;
}

/// Runs commands as real child processes.
///
/// The child is spawned with `kill_on_drop`, so dropping an in-flight `run`
/// future (for example when the queue's attempt deadline fires) sends it a
/// kill signal. Grandchildren started by the shell are not tracked.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessRunner;

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        // A missing cwd would otherwise surface as a spawn NotFound and be
        // misreported as a missing tool.
        ensure_dir(&spec.cwd).await?;

        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(&spec.command)
            .current_dir(&spec.cwd)
            .envs(&spec.env)
            .env("CI", "true")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!(command = %spec.command, cwd = %spec.cwd.display(), "running command");
        let start = Instant::now();

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(Error::ToolNotFound {
                    tool: "sh".to_string(),
                });
            }
            Err(e) => return Err(e.into()),
        };
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let run = async {
            tokio::try_join!(
                read_tail(stdout, MAX_CAPTURED_OUTPUT),
                read_tail(stderr, MAX_CAPTURED_OUTPUT),
                child.wait(),
            )
        };
        let waited = tokio::time::timeout(spec.timeout, run).await;

        let (stdout, stderr, status) = match waited {
            Ok(Ok(captured)) => captured,
            Ok(Err(e)) => return Err(e.into()),
            Err(_elapsed) => {
                let _ = child.start_kill();
                warn!(command = %spec.command, timeout_s = spec.timeout.as_secs(), "command timed out");
                return Err(Error::Timeout {
                    command: spec.command.clone(),
                    timeout: spec.timeout,
                });
            }
        };

        let duration = start.elapsed();
        let stdout = stdout.into_string();
        let stderr = stderr.into_string();

        match status.code() {
            Some(0) => {
                debug!(
                    command = %spec.command,
                    duration_ms = duration.as_millis() as u64,
                    "command succeeded"
                );
                Ok(CommandOutput {
                    stdout,
                    stderr,
                    duration,
                })
            }
            Some(SHELL_COMMAND_NOT_FOUND) => Err(Error::ToolNotFound {
                tool: spec.program().to_string(),
            }),
            code => Err(Error::CommandFailed {
                command: spec.command.clone(),
                // None means killed by a signal
                code: code.unwrap_or(-1),
                stderr: if stderr.trim().is_empty() { stdout } else { stderr },
            }),
        }
    }
}

async fn ensure_dir(path: &Path) -> Result<()> {
    match tokio::fs::metadata(path).await {
        Ok(meta) if meta.is_dir() => Ok(()),
        Ok(_) => Err(Error::Io(io::Error::new(
            io::ErrorKind::NotADirectory,
            format!("working directory {} is not a directory", path.display()),
        ))),
        Err(e) => Err(Error::Io(io::Error::new(
            e.kind(),
            format!("working directory {}: {e}", path.display()),
        ))),
    }
}

/// Keeps only the last `max` bytes written to it.
#[derive(Debug)]
pub struct TailBuffer {
    bytes: VecDeque<u8>,
    max: usize,
    truncated: bool,
}

impl TailBuffer {
    pub fn new(max: usize) -> Self {
        Self {
            bytes: VecDeque::with_capacity(max.min(8192)),
            max,
            truncated: false,
        }
    }

    pub fn push(&mut self, chunk: &[u8]) {
        self.bytes.extend(chunk);
        if self.bytes.len() > self.max {
            let excess = self.bytes.len() - self.max;
            self.bytes.drain(..excess);
            self.truncated = true;
        }
    }

    /// Lossy UTF-8 text, prefixed with a marker when the head was dropped.
    pub fn into_string(mut self) -> String {
        let mut bytes: &[u8] = self.bytes.make_contiguous();
        if self.truncated {
            // the cut may have split a multi-byte char
            while let [first, rest @ ..] = bytes {
                if *first & 0xC0 != 0x80 {
                    break;
                }
                bytes = rest;
            }
            format!("...[truncated]\n{}", String::from_utf8_lossy(bytes))
        } else {
            String::from_utf8_lossy(bytes).into_owned()
        }
    }
}

/// Drain a child pipe, keeping only its tail.
async fn read_tail<R: AsyncRead + Unpin>(reader: Option<R>, max: usize) -> io::Result<TailBuffer> {
    let mut tail = TailBuffer::new(max);
    let Some(mut reader) = reader else {
        return Ok(tail);
    };
    let mut chunk = [0u8; 8192];
    loop {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            return Ok(tail);
        }
        tail.push(&chunk[..n]);
    }
}
