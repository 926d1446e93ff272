//! Synchronous subprocess execution with captured output

use std::io::Write;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

use crate::error::{Error, Result};

/// Poll interval while waiting on a command with a deadline
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// A single external tool invocation.
///
/// Builder over [`std::process::Command`] that captures output and folds
/// non-zero exits into [`Error::Failed`], so callers consume one `Result`
/// instead of inspecting exit codes at every call site.
#[derive(Debug, Clone)]
pub struct ToolCommand {
    program: String,
    args: Vec<String>,
    stdin: Option<Vec<u8>>,
    current_dir: Option<PathBuf>,
    timeout: Option<Duration>,
}

/// Captured output of a completed tool run
#[derive(Debug, Clone)]
pub struct ToolOutput {
    /// Raw stdout bytes (machine configs are not guaranteed UTF-8 clean)
    pub stdout: Vec<u8>,
    /// Stderr decoded lossily for diagnostics
    pub stderr: String,
    /// Exit code, absent when the process was killed by a signal
    pub exit_code: Option<i32>,
    /// Whether the process exited with status zero
    pub success: bool,
}

impl ToolOutput {
    /// Stdout decoded lossily, with trailing whitespace removed
    pub fn stdout_text(&self) -> String {
        String::from_utf8_lossy(&self.stdout).trim_end().to_string()
    }
}

impl ToolCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            stdin: None,
            current_dir: None,
            timeout: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Bytes fed to the child on stdin
    pub fn stdin_bytes(mut self, bytes: impl Into<Vec<u8>>) -> Self {
        self.stdin = Some(bytes.into());
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    /// Hard deadline; the child is killed when it expires
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Program name as invoked
    pub fn program(&self) -> &str {
        &self.program
    }

    /// Program plus arguments, for log and error messages
    pub fn display(&self) -> String {
        if self.args.is_empty() {
            self.program.clone()
        } else {
            format!("{} {}", self.program, self.args.join(" "))
        }
    }

    /// Run and capture output, treating non-zero exit as an error.
    ///
    /// Stderr is carried verbatim inside [`Error::Failed`] so workflow
    /// errors can surface the tool's own diagnostics.
    pub fn output(&self) -> Result<ToolOutput> {
        let output = self.capture()?;
        if !output.success {
            return Err(Error::Failed {
                tool: self.program.clone(),
                exit_code: output.exit_code,
                stderr: output.stderr,
            });
        }
        Ok(output)
    }

    /// Run and capture output, reporting success as a flag instead of an
    /// error. Spawn failures still error.
    pub fn status(&self) -> Result<ToolOutput> {
        self.capture()
    }

    /// Run with inherited stdio for tools whose output belongs on the
    /// operator's terminal. Non-zero exit is an error.
    pub fn stream(&self) -> Result<()> {
        tracing::debug!(command = %self.display(), "streaming external tool");
        let status = Command::new(&self.program)
            .args(&self.args)
            .status()
            .map_err(|source| Error::Spawn {
                tool: self.program.clone(),
                source,
            })?;
        if !status.success() {
            return Err(Error::Failed {
                tool: self.program.clone(),
                exit_code: status.code(),
                stderr: String::new(),
            });
        }
        Ok(())
    }

    /// Spawn with inherited stdio and return the child for polling
    pub fn spawn_foreground(&self) -> Result<Child> {
        tracing::debug!(command = %self.display(), "spawning foreground tool");
        Command::new(&self.program)
            .args(&self.args)
            .spawn()
            .map_err(|source| Error::Spawn {
                tool: self.program.clone(),
                source,
            })
    }

    /// Spawn detached from the terminal and return the child, for
    /// long-lived helpers like port-forwards. Stdout is discarded;
    /// stderr stays piped so an early death can be diagnosed. Callers
    /// must read it or rely on the child writing less than the OS pipe
    /// buffer.
    pub fn spawn_background(&self) -> Result<Child> {
        tracing::debug!(command = %self.display(), "spawning background tool");
        Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| Error::Spawn {
                tool: self.program.clone(),
                source,
            })
    }

    fn capture(&self) -> Result<ToolOutput> {
        tracing::debug!(command = %self.display(), "running external tool");

        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .stdin(if self.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = &self.current_dir {
            command.current_dir(dir);
        }

        let mut child = command.spawn().map_err(|source| Error::Spawn {
            tool: self.program.clone(),
            source,
        })?;

        if let Some(bytes) = &self.stdin
            && let Some(mut handle) = child.stdin.take()
        {
            // A child that dies before draining stdin breaks the pipe; its
            // stderr is the interesting diagnostic then, not the EPIPE.
            if let Err(err) = handle.write_all(bytes)
                && err.kind() != std::io::ErrorKind::BrokenPipe
            {
                return Err(Error::Io(err));
            }
        }

        if let Some(timeout) = self.timeout {
            self.wait_with_deadline(&mut child, timeout)?;
        }

        let output = child.wait_with_output().map_err(Error::Io)?;

        Ok(ToolOutput {
            success: output.status.success(),
            exit_code: output.status.code(),
            stdout: output.stdout,
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }

    /// Poll the child until it exits or the deadline passes, then kill it.
    /// Output pipes are drained only after exit, so deadline-guarded
    /// commands must keep their output below the OS pipe buffer.
    fn wait_with_deadline(&self, child: &mut Child, timeout: Duration) -> Result<()> {
        let start = Instant::now();
        loop {
            if child.try_wait().map_err(Error::Io)?.is_some() {
                return Ok(());
            }
            if start.elapsed() >= timeout {
                let _ = child.kill();
                let _ = child.wait();
                return Err(Error::Timeout {
                    tool: self.program.clone(),
                    timeout,
                });
            }
            std::thread::sleep(POLL_INTERVAL);
        }
    }
}
