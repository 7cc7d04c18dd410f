//! Process handle registry: at most one live process per slot.

use std::io::Read;
use std::net::{SocketAddr, TcpStream};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::error::{BridgeError, BridgeResult};
use crate::framing::drain_lines;
use crate::process::{ProcessHandle, ProcessKind, ProcessSpec, StopOutcome};

/// How long and how often to poll a freshly spawned debugger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadinessPolicy {
    pub interval: Duration,
    pub timeout: Duration,
}

impl Default for ReadinessPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(100),
            timeout: Duration::from_secs(2),
        }
    }
}

/// A single-occupancy location for one kind of process.
///
/// `start` swaps the occupant under the slot lock: the previous process is
/// killed and reaped before the replacement is spawned, so two concurrent
/// starters can never both own the slot.
#[derive(Debug)]
pub struct ProcessSlot {
    kind: ProcessKind,
    current: Mutex<Option<Arc<ProcessHandle>>>,
}

impl ProcessSlot {
    #[must_use]
    pub fn new(kind: ProcessKind) -> Self {
        Self {
            kind,
            current: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn kind(&self) -> ProcessKind {
        self.kind
    }

    pub fn start(&self, spec: &ProcessSpec) -> BridgeResult<Arc<ProcessHandle>> {
        self.start_with(spec, |_| Ok(()))
    }

    /// Replaces the occupant with a new process that must pass `ready`.
    ///
    /// A process failing `ready` is killed and the slot is left empty.
    pub fn start_with<F>(&self, spec: &ProcessSpec, ready: F) -> BridgeResult<Arc<ProcessHandle>>
    where
        F: FnOnce(&ProcessHandle) -> BridgeResult<()>,
    {
        let mut current = self.current.lock();
        if let Some(previous) = current.take() {
            info!(kind = %self.kind, pid = previous.pid(), "replacing running process");
            previous.terminate();
        }
        let handle = Arc::new(ProcessHandle::spawn(self.kind, spec)?);
        if let Err(err) = ready(&handle) {
            warn!(kind = %self.kind, pid = handle.pid(), "process failed readiness: {err}");
            handle.terminate();
            return Err(err);
        }
        *current = Some(Arc::clone(&handle));
        Ok(handle)
    }

    #[must_use]
    pub fn current(&self) -> Option<Arc<ProcessHandle>> {
        self.current.lock().clone()
    }

    /// Terminates `handle` and clears the slot if it still holds it.
    ///
    /// Returns whether this call cleared the slot; a newer occupant is never
    /// touched.
    pub fn release(&self, handle: &ProcessHandle) -> (StopOutcome, bool) {
        let outcome = handle.terminate();
        let mut current = self.current.lock();
        let owned = current
            .as_ref()
            .is_some_and(|occupant| std::ptr::eq(Arc::as_ptr(occupant), handle));
        if owned {
            current.take();
            debug!(kind = %self.kind, pid = handle.pid(), "slot cleared");
        }
        (outcome, owned)
    }

    /// Stops whatever occupies the slot.
    pub fn stop_current(&self) -> StopOutcome {
        let taken = self.current.lock().take();
        match taken {
            Some(handle) => handle.terminate(),
            None => StopOutcome::NotRunning,
        }
    }
}

/// The process-wide slots shared by every session.
///
/// Language servers are per connection, see [`ProcessRegistry::language_server_slot`].
#[derive(Debug)]
pub struct ProcessRegistry {
    debugger: ProcessSlot,
    executable: ProcessSlot,
}

impl Default for ProcessRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            debugger: ProcessSlot::new(ProcessKind::Debugger),
            executable: ProcessSlot::new(ProcessKind::Executable),
        }
    }

    #[must_use]
    pub fn debugger(&self) -> &ProcessSlot {
        &self.debugger
    }

    #[must_use]
    pub fn executable(&self) -> &ProcessSlot {
        &self.executable
    }

    /// A fresh private slot for one language-server connection.
    #[must_use]
    pub fn language_server_slot(&self) -> ProcessSlot {
        ProcessSlot::new(ProcessKind::LanguageServer)
    }

    /// Starts the debugger and waits until it accepts connections on `addr`.
    pub fn start_debugger(
        &self,
        spec: &ProcessSpec,
        addr: SocketAddr,
        policy: ReadinessPolicy,
    ) -> BridgeResult<Arc<ProcessHandle>> {
        self.debugger.start_with(spec, |handle| {
            log_output(handle)?;
            wait_for_listener(handle, addr, policy)
        })
    }

    pub fn shutdown(&self) {
        for slot in [&self.debugger, &self.executable] {
            let outcome = slot.stop_current();
            if outcome != StopOutcome::NotRunning {
                info!(kind = %slot.kind(), "{}", outcome.message());
            }
        }
    }
}

/// Drains the debugger's stdout/stderr (which carry the debuggee's output too)
/// into the log so the process never blocks on a full pipe.
fn log_output(handle: &ProcessHandle) -> BridgeResult<()> {
    let pid = handle.pid();
    let streams: [(&str, Box<dyn Read + Send>); 2] = [
        ("stdout", Box::new(handle.take_stdout()?)),
        ("stderr", Box::new(handle.take_stderr()?)),
    ];
    for (stream, pipe) in streams {
        thread::Builder::new()
            .name(format!("debugger-{stream}"))
            .spawn(move || {
                let drained = drain_lines(pipe, |line| debug!(pid, stream, "{line}"));
                if let Err(err) = drained {
                    debug!(pid, stream, "debugger output read failed: {err}");
                }
            })?;
    }
    Ok(())
}

fn wait_for_listener(
    handle: &ProcessHandle,
    addr: SocketAddr,
    policy: ReadinessPolicy,
) -> BridgeResult<()> {
    let started = Instant::now();
    loop {
        if let Some(status) = handle.try_wait()? {
            return Err(BridgeError::ExitedEarly {
                code: status.code(),
            });
        }
        if TcpStream::connect_timeout(&addr, policy.interval).is_ok() {
            debug!(%addr, pid = handle.pid(), "debugger accepting connections");
            return Ok(());
        }
        let waited = started.elapsed();
        if waited >= policy.timeout {
            return Err(BridgeError::NotResponding {
                addr,
                waited_ms: u64::try_from(waited.as_millis()).unwrap_or(u64::MAX),
            });
        }
        thread::sleep(policy.interval);
    }
}
