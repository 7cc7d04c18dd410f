//! Single-shot process runs.
//! - run_capture: run with a timeout, stdout+stderr merged in arrival order
//! - AnalysisTool: `<tool> [args..] -<flag> [arg]` in the project root

use std::fmt;
use std::io::Read;
use std::path::PathBuf;
use std::str::FromStr;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::RecvTimeoutError;
use serde::Serialize;
use smol_str::SmolStr;
use tracing::{debug, info, warn};

use crate::error::{BridgeError, BridgeResult};
use crate::process::{ProcessHandle, ProcessKind, ProcessSpec};

pub const DEFAULT_RUN_TIMEOUT: Duration = Duration::from_secs(10);

/// Outcome of [`run_capture`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CapturedRun {
    pub output: String,
    /// `None` when the process was killed (timeout or signal).
    pub exit_code: Option<i32>,
    pub timed_out: bool,
}

impl CapturedRun {
    #[must_use]
    pub fn success(&self) -> bool {
        self.exit_code == Some(0) && !self.timed_out
    }
}

/// Runs `spec` to completion, killing it once `timeout` elapses.
///
/// Output captured before the kill is returned with `timed_out` set.
pub fn run_capture(spec: &ProcessSpec, timeout: Duration) -> BridgeResult<CapturedRun> {
    let handle = ProcessHandle::spawn(ProcessKind::Executable, spec)?;
    drop(handle.take_stdin()?);
    let (chunks_tx, chunks_rx) = crossbeam_channel::unbounded::<Vec<u8>>();
    let pipes: [Box<dyn Read + Send>; 2] = [
        Box::new(handle.take_stdout()?),
        Box::new(handle.take_stderr()?),
    ];
    for pipe in pipes {
        let chunks = chunks_tx.clone();
        thread::Builder::new()
            .name("run-capture".into())
            .spawn(move || copy_chunks(pipe, &chunks))?;
    }
    drop(chunks_tx);

    let deadline = Instant::now() + timeout;
    let mut output = Vec::new();
    let mut timed_out = false;
    loop {
        match chunks_rx.recv_deadline(deadline) {
            Ok(chunk) => output.extend_from_slice(&chunk),
            Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {
                timed_out = true;
                break;
            }
        }
    }

    let exit_code = if timed_out {
        warn!(program = %spec.program, ?timeout, "run timed out, killing");
        handle.terminate();
        // Pick up whatever was written right before the kill.
        while let Ok(chunk) = chunks_rx.try_recv() {
            output.extend_from_slice(&chunk);
        }
        None
    } else {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match handle.wait_timeout(remaining)? {
            Some(status) => status.code(),
            None => {
                // Pipes closed but the process lingers.
                timed_out = true;
                handle.terminate();
                None
            }
        }
    };

    debug!(program = %spec.program, ?exit_code, timed_out, bytes = output.len(), "run finished");
    Ok(CapturedRun {
        output: String::from_utf8_lossy(&output).into_owned(),
        exit_code,
        timed_out,
    })
}

fn copy_chunks(mut pipe: Box<dyn Read + Send>, chunks: &crossbeam_channel::Sender<Vec<u8>>) {
    let mut buffer = [0u8; 8192];
    loop {
        match pipe.read(&mut buffer) {
            Ok(0) | Err(_) => break,
            Ok(read) => {
                if chunks.send(buffer[..read].to_vec()).is_err() {
                    break;
                }
            }
        }
    }
}

/// Operations of the external analysis tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolFlag {
    PackFiles,
    PackFunctions,
    PackPackages,
    Callgraph,
    Workdir,
    Compile,
    SourceMappings,
}

impl ToolFlag {
    pub const ALL: [ToolFlag; 7] = [
        ToolFlag::PackFiles,
        ToolFlag::PackFunctions,
        ToolFlag::PackPackages,
        ToolFlag::Callgraph,
        ToolFlag::Workdir,
        ToolFlag::Compile,
        ToolFlag::SourceMappings,
    ];

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::PackFiles => "pack-files",
            Self::PackFunctions => "pack-functions",
            Self::PackPackages => "pack-packages",
            Self::Callgraph => "callgraph",
            Self::Workdir => "workdir",
            Self::Compile => "compile",
            Self::SourceMappings => "source-mappings",
        }
    }

    /// The command-line switch, e.g. `-pack-files`.
    #[must_use]
    pub fn as_flag(self) -> String {
        format!("-{}", self.name())
    }
}

impl fmt::Display for ToolFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ToolFlag {
    type Err = BridgeError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let name = text.trim_start_matches('-');
        Self::ALL
            .into_iter()
            .find(|flag| flag.name() == name)
            .ok_or_else(|| BridgeError::invalid(format!("unknown tool operation '{text}'")))
    }
}

/// The external analysis executable, run from the project root.
#[derive(Debug, Clone)]
pub struct AnalysisTool {
    pub program: SmolStr,
    /// Passed ahead of the operation flag, e.g. a script for an interpreter.
    pub args: Vec<SmolStr>,
    pub project_root: PathBuf,
    pub timeout: Duration,
}

impl AnalysisTool {
    #[must_use]
    pub fn new(program: impl Into<SmolStr>, project_root: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            project_root: project_root.into(),
            timeout: DEFAULT_RUN_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<SmolStr>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Invokes one operation and returns its combined output.
    ///
    /// A non-zero exit (or timeout) yields [`BridgeError::ToolFailed`] carrying
    /// the raw output.
    pub fn invoke(&self, flag: ToolFlag, arg: Option<&str>) -> BridgeResult<String> {
        let mut spec = ProcessSpec::new(self.program.clone())
            .args(self.args.iter().map(SmolStr::as_str))
            .arg(flag.as_flag())
            .cwd(&self.project_root);
        if let Some(arg) = arg.filter(|arg| !arg.is_empty()) {
            spec = spec.arg(arg);
        }
        info!(tool = %self.program, %flag, "invoking analysis tool");
        let run = run_capture(&spec, self.timeout)?;
        if run.success() {
            Ok(run.output)
        } else {
            debug!(tool = %self.program, %flag, exit_code = ?run.exit_code, "analysis tool failed");
            Err(BridgeError::ToolFailed { output: run.output })
        }
    }
}
