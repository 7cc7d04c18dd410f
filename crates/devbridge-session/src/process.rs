//! External process handles.

use std::fmt;
use std::io;
use std::path::PathBuf;
use std::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use smol_str::SmolStr;
use tracing::{debug, info, warn};

use crate::error::{BridgeError, BridgeResult};

const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Which registry slot a process belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProcessKind {
    LanguageServer,
    Debugger,
    Executable,
}

impl ProcessKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::LanguageServer => "language-server",
            Self::Debugger => "debugger",
            Self::Executable => "executable",
        }
    }
}

impl fmt::Display for ProcessKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What to launch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessSpec {
    pub program: SmolStr,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub env: Vec<(String, String)>,
}

impl ProcessSpec {
    #[must_use]
    pub fn new(program: impl Into<SmolStr>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            env: Vec::new(),
        }
    }

    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub(crate) fn command(&self) -> Command {
        let mut command = Command::new(self.program.as_str());
        command.args(&self.args);
        if let Some(cwd) = &self.cwd {
            command.current_dir(cwd);
        }
        for (key, value) in &self.env {
            command.env(key, value);
        }
        command
    }

    pub(crate) fn spawn_piped(&self) -> BridgeResult<Child> {
        self.command()
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| BridgeError::Spawn {
                program: self.program.clone(),
                source,
            })
    }
}

/// Result of asking a process to stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// The process was alive and has now been killed and reaped.
    Stopped { code: Option<i32> },
    /// The process had already exited on its own.
    AlreadyExited { code: Option<i32> },
    /// The slot held nothing.
    NotRunning,
}

impl StopOutcome {
    #[must_use]
    pub fn message(&self) -> String {
        match self {
            Self::Stopped { .. } => "process stopped".to_string(),
            Self::AlreadyExited { code: Some(code) } => {
                format!("process already exited with code {code}")
            }
            Self::AlreadyExited { code: None } => "process already exited".to_string(),
            Self::NotRunning => "no process running".to_string(),
        }
    }
}

/// One spawned child with its pipes.
///
/// The child sits behind a lock so that a waiter polling for exit and a
/// caller terminating it can share the handle; the lock is only held for a
/// single non-blocking call. Dropping a live handle kills the process.
pub struct ProcessHandle {
    kind: ProcessKind,
    pid: u32,
    program: SmolStr,
    child: Mutex<Child>,
}

impl fmt::Debug for ProcessHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessHandle")
            .field("kind", &self.kind)
            .field("pid", &self.pid)
            .field("program", &self.program)
            .finish_non_exhaustive()
    }
}

impl ProcessHandle {
    pub fn spawn(kind: ProcessKind, spec: &ProcessSpec) -> BridgeResult<Self> {
        let child = spec.spawn_piped()?;
        let pid = child.id();
        info!(%kind, pid, program = %spec.program, "spawned process");
        Ok(Self {
            kind,
            pid,
            program: spec.program.clone(),
            child: Mutex::new(child),
        })
    }

    #[must_use]
    pub fn kind(&self) -> ProcessKind {
        self.kind
    }

    #[must_use]
    pub fn pid(&self) -> u32 {
        self.pid
    }

    #[must_use]
    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn take_stdin(&self) -> BridgeResult<ChildStdin> {
        self.child
            .lock()
            .stdin
            .take()
            .ok_or(BridgeError::MissingPipe("stdin"))
    }

    pub fn take_stdout(&self) -> BridgeResult<ChildStdout> {
        self.child
            .lock()
            .stdout
            .take()
            .ok_or(BridgeError::MissingPipe("stdout"))
    }

    pub fn take_stderr(&self) -> BridgeResult<ChildStderr> {
        self.child
            .lock()
            .stderr
            .take()
            .ok_or(BridgeError::MissingPipe("stderr"))
    }

    /// Non-blocking exit check.
    pub fn try_wait(&self) -> io::Result<Option<ExitStatus>> {
        self.child.lock().try_wait()
    }

    #[must_use]
    pub fn is_alive(&self) -> bool {
        matches!(self.try_wait(), Ok(None))
    }

    /// Polls for exit until `timeout` elapses.
    pub fn wait_timeout(&self, timeout: Duration) -> io::Result<Option<ExitStatus>> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(status) = self.try_wait()? {
                return Ok(Some(status));
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            thread::sleep(EXIT_POLL_INTERVAL);
        }
    }

    /// Kills the process if alive and reaps it. Safe to call repeatedly.
    pub fn terminate(&self) -> StopOutcome {
        let mut child = self.child.lock();
        match child.try_wait() {
            Ok(Some(status)) => {
                debug!(kind = %self.kind, pid = self.pid, "process already exited");
                return StopOutcome::AlreadyExited {
                    code: status.code(),
                };
            }
            Ok(None) => {}
            Err(err) => warn!(kind = %self.kind, pid = self.pid, "try_wait failed: {err}"),
        }
        if let Err(err) = child.kill() {
            // InvalidInput means the child was reaped concurrently.
            if err.kind() != io::ErrorKind::InvalidInput {
                warn!(kind = %self.kind, pid = self.pid, "kill failed: {err}");
            }
        }
        match child.wait() {
            Ok(status) => {
                info!(kind = %self.kind, pid = self.pid, "process terminated");
                StopOutcome::Stopped {
                    code: status.code(),
                }
            }
            Err(err) => {
                warn!(kind = %self.kind, pid = self.pid, "wait after kill failed: {err}");
                StopOutcome::Stopped { code: None }
            }
        }
    }
}

impl Drop for ProcessHandle {
    fn drop(&mut self) {
        let child = self.child.get_mut();
        if matches!(child.try_wait(), Ok(None)) {
            debug!(kind = %self.kind, pid = self.pid, "killing process on handle drop");
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}
