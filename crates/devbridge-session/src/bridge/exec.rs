//! Monitored executable bridge: stdout/stderr tee plus a stop command.

use std::io::{BufReader, Read};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{select, Receiver, Sender};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use super::{error_event, Workers};
use crate::cancel::CancelToken;
use crate::client::ClientLink;
use crate::error::BridgeResult;
use crate::framing::read_line;
use crate::process::{ProcessHandle, ProcessSpec};
use crate::registry::ProcessRegistry;

/// Upper bound for collecting output after a natural exit. Only reached when
/// a grandchild keeps the pipes open.
const EXIT_DRAIN: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecOptions {
    /// Output collection window after a kill.
    pub kill_grace: Duration,
    /// How often the waiter checks for process exit.
    pub poll_interval: Duration,
}

impl Default for ExecOptions {
    fn default() -> Self {
        Self {
            kill_grace: Duration::from_millis(200),
            poll_interval: Duration::from_millis(20),
        }
    }
}

/// The single outcome of the exit/stop/disconnect race.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecTerminal {
    /// The program exited on its own; `None` when killed by a signal.
    Exited(Option<i32>),
    /// The browser asked to stop it.
    Stopped,
    /// The browser went away.
    Disconnected,
}

#[derive(Debug, Clone, Copy)]
enum OutputStream {
    Stdout,
    Stderr,
}

impl OutputStream {
    fn as_str(self) -> &'static str {
        match self {
            Self::Stdout => "stdout",
            Self::Stderr => "stderr",
        }
    }
}

type OutputLine = (OutputStream, String);

/// Runs the executable until it exits, the browser stops it or disconnects.
///
/// Any previous executable is terminated first. Whatever the outcome, the
/// process is dead and the slot no longer holds it when this returns.
pub fn run_exec_session(
    registry: &ProcessRegistry,
    spec: &ProcessSpec,
    link: ClientLink,
    options: ExecOptions,
) -> BridgeResult<ExecTerminal> {
    let slot = registry.executable();
    let handle = slot.start(spec)?;
    let pid = handle.pid();
    info!(pid, program = %spec.program, args = ?spec.args, "executable started");

    let cancel = CancelToken::new();
    let (output_tx, output_rx) = crossbeam_channel::unbounded::<OutputLine>();
    let (exit_tx, exit_rx) = crossbeam_channel::bounded(1);
    let mut readers = Vec::new();
    let mut workers = Workers::default();

    let started = start_workers(
        &handle,
        &cancel,
        output_tx,
        exit_tx,
        options,
        &mut readers,
        &mut workers,
    );
    if let Err(err) = started {
        warn!(pid, "executable session setup failed: {err}");
        cancel.cancel();
        slot.release(&handle);
        workers.join();
        reap_readers(readers);
        return Err(err);
    }

    let mut tee = Tee {
        link: &link,
        output: output_rx,
        output_open: true,
        captured: false,
    };
    let terminal = tee.race(&exit_rx);

    // Teardown: the only place the process is killed and the slot cleared.
    cancel.cancel();
    match terminal {
        ExecTerminal::Exited(_) => tee.drain(EXIT_DRAIN),
        ExecTerminal::Stopped | ExecTerminal::Disconnected => {
            handle.terminate();
            tee.drain(options.kill_grace);
        }
    }
    let (outcome, cleared) = slot.release(&handle);
    debug!(pid, cleared, "{}", outcome.message());
    workers.join();
    reap_readers(readers);

    match terminal {
        ExecTerminal::Exited(code) => {
            link.send_json(&json!({ "type": "exited", "code": code }));
        }
        ExecTerminal::Stopped => {
            if !tee.captured {
                link.send_json(&json!({ "type": "info", "message": "no output captured" }));
            }
            link.send_json(&json!({ "type": "stopped" }));
        }
        ExecTerminal::Disconnected => {}
    }
    info!(pid, ?terminal, "executable session ended");
    Ok(terminal)
}

fn start_workers(
    handle: &Arc<ProcessHandle>,
    cancel: &CancelToken,
    output: Sender<OutputLine>,
    exit: Sender<Option<i32>>,
    options: ExecOptions,
    readers: &mut Vec<JoinHandle<()>>,
    workers: &mut Workers,
) -> BridgeResult<()> {
    // The program gets an empty stdin.
    drop(handle.take_stdin()?);
    let stdout = handle.take_stdout()?;
    let stderr = handle.take_stderr()?;
    readers.push(spawn_reader("exec-stdout", stdout, OutputStream::Stdout, output.clone())?);
    readers.push(spawn_reader("exec-stderr", stderr, OutputStream::Stderr, output)?);

    let handle = Arc::clone(handle);
    let cancel = cancel.clone();
    workers.spawn("exec-waiter", move || loop {
        select! {
            recv(cancel.signal()) -> _ => return,
            default(options.poll_interval) => match handle.try_wait() {
                Ok(Some(status)) => {
                    let _ = exit.send(status.code());
                    return;
                }
                Ok(None) => {}
                Err(err) => {
                    warn!(pid = handle.pid(), "waiting for executable failed: {err}");
                    let _ = exit.send(None);
                    return;
                }
            },
        }
    })
}

/// Line readers are not joined unconditionally: a grandchild holding the
/// pipe open must not stall the session.
fn spawn_reader<R>(
    name: &str,
    pipe: R,
    stream: OutputStream,
    output: Sender<OutputLine>,
) -> BridgeResult<JoinHandle<()>>
where
    R: Read + Send + 'static,
{
    let handle = thread::Builder::new().name(name.into()).spawn(move || {
        let mut reader = BufReader::new(pipe);
        loop {
            match read_line(&mut reader) {
                Ok(Some(line)) => {
                    let text = String::from_utf8_lossy(&line).into_owned();
                    if output.send((stream, text)).is_err() {
                        break;
                    }
                }
                Ok(None) => break,
                Err(err) => {
                    debug!(stream = stream.as_str(), "output read failed: {err}");
                    break;
                }
            }
        }
    })?;
    Ok(handle)
}

fn reap_readers(readers: Vec<JoinHandle<()>>) {
    for reader in readers {
        if reader.is_finished() {
            let _ = reader.join();
        } else {
            debug!("output reader still attached to an open pipe, detaching");
        }
    }
}

struct Tee<'a> {
    link: &'a ClientLink,
    output: Receiver<OutputLine>,
    output_open: bool,
    captured: bool,
}

impl Tee<'_> {
    /// The three-way select over process exit, stop and disconnect.
    fn race(&mut self, exit: &Receiver<Option<i32>>) -> ExecTerminal {
        let mut output = self.output.clone();
        let inbound = self.link.inbound().clone();
        loop {
            select! {
                recv(output) -> line => match line {
                    Ok(line) => self.forward(line),
                    Err(_) => self.close_output(),
                },
                recv(exit) -> code => return ExecTerminal::Exited(code.unwrap_or(None)),
                recv(inbound) -> message => match message {
                    Ok(text) if is_stop(&text) => return ExecTerminal::Stopped,
                    Ok(text) => {
                        debug!(message = %text, "ignoring executable command");
                        self.link.send_json(&error_event(format!(
                            "unsupported command: {text}"
                        )));
                    }
                    Err(_) => return ExecTerminal::Disconnected,
                },
            }
            if !self.output_open {
                output = crossbeam_channel::never();
            }
        }
    }

    /// Forwards buffered output until both pipes close or `window` elapses.
    fn drain(&mut self, window: Duration) {
        let deadline = Instant::now() + window;
        while self.output_open {
            match self.output.recv_deadline(deadline) {
                Ok(line) => self.forward(line),
                Err(_) => self.close_output(),
            }
        }
    }

    fn close_output(&mut self) {
        self.output_open = false;
        self.output = crossbeam_channel::never();
    }

    fn forward(&mut self, (stream, data): OutputLine) {
        self.captured = true;
        self.link
            .send_json(&json!({ "type": stream.as_str(), "data": data }));
    }
}

/// Accepts `stop`, `{"command":"stop"}` or `{"type":"stop"}`.
fn is_stop(text: &str) -> bool {
    let text = text.trim();
    if text.eq_ignore_ascii_case("stop") {
        return true;
    }
    serde_json::from_str::<Value>(text).is_ok_and(|value| {
        ["command", "type"]
            .iter()
            .any(|key| value.get(key).and_then(Value::as_str) == Some("stop"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stop_accepts_plain_and_json_forms() {
        assert!(is_stop("stop"));
        assert!(is_stop(" STOP\n"));
        assert!(is_stop(r#"{"command":"stop"}"#));
        assert!(is_stop(r#"{"type":"stop"}"#));
        assert!(!is_stop(r#"{"command":"continue"}"#));
        assert!(!is_stop("restart"));
    }
}
