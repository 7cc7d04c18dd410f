//! Language server bridge: Content-Length framed stdio ↔ browser messages.

use std::io::{BufReader, Write};
use std::process::{ChildStderr, ChildStdin, ChildStdout};

use crossbeam_channel::{select, Sender};
use smol_str::SmolStr;
use tracing::{debug, info, warn};

use super::{SessionEnd, Workers};
use crate::cancel::CancelToken;
use crate::client::ClientLink;
use crate::error::BridgeResult;
use crate::framing::{drain_lines, read_frame, write_frame};
use crate::process::ProcessSpec;
use crate::registry::ProcessSlot;

/// Runs one language-server session until either side closes.
///
/// `slot` is private to the browser connection; the server process is
/// terminated and reaped before this returns.
pub fn run_language_server_session(
    slot: &ProcessSlot,
    spec: &ProcessSpec,
    link: ClientLink,
) -> BridgeResult<SessionEnd> {
    let handle = slot.start(spec)?;
    let pid = handle.pid();
    let pipes = (
        handle.take_stdin(),
        handle.take_stdout(),
        handle.take_stderr(),
    );
    let (stdin, stdout, stderr) = match pipes {
        (Ok(stdin), Ok(stdout), Ok(stderr)) => (stdin, stdout, stderr),
        (Err(err), ..) | (_, Err(err), _) | (.., Err(err)) => {
            slot.release(&handle);
            return Err(err);
        }
    };
    info!(pid, program = %spec.program, "language server session started");

    let cancel = CancelToken::new();
    let (done_tx, done_rx) = crossbeam_channel::unbounded();
    let mut workers = Workers::default();
    let spawned = spawn_workers(
        &mut workers,
        &link,
        &cancel,
        &done_tx,
        stdin,
        stdout,
        stderr,
    );
    drop(done_tx);
    drop(link);

    let end = match spawned {
        Ok(()) => done_rx
            .recv()
            .unwrap_or_else(|_| SessionEnd::Failed("session workers vanished".into())),
        Err(err) => SessionEnd::Failed(SmolStr::new(err.to_string())),
    };

    cancel.cancel();
    let (outcome, _) = slot.release(&handle);
    workers.join();
    info!(pid, reason = %end, "language server session ended: {}", outcome.message());
    Ok(end)
}

fn spawn_workers(
    workers: &mut Workers,
    link: &ClientLink,
    cancel: &CancelToken,
    done: &Sender<SessionEnd>,
    stdin: ChildStdin,
    stdout: ChildStdout,
    stderr: ChildStderr,
) -> BridgeResult<()> {
    {
        let link = link.clone();
        let cancel = cancel.clone();
        let done = done.clone();
        workers.spawn("lsp-stdout", move || {
            let end = pump_stdout(stdout, &link);
            cancel.cancel();
            let _ = done.send(end);
        })?;
    }
    {
        let link = link.clone();
        let cancel = cancel.clone();
        let done = done.clone();
        workers.spawn("lsp-stdin", move || {
            if let Some(end) = pump_stdin(stdin, &link, &cancel) {
                cancel.cancel();
                let _ = done.send(end);
            }
        })?;
    }
    workers.spawn("lsp-stderr", move || drain_stderr(stderr))
}

fn pump_stdout(stdout: ChildStdout, link: &ClientLink) -> SessionEnd {
    let mut reader = BufReader::new(stdout);
    loop {
        match read_frame(&mut reader) {
            Ok(Some(body)) => {
                let text = String::from_utf8_lossy(&body).into_owned();
                if !link.send_text(text) {
                    return SessionEnd::ClientClosed;
                }
            }
            Ok(None) => return SessionEnd::ProcessClosed,
            Err(err) => {
                warn!("language server stdout: {err}");
                return SessionEnd::Failed(SmolStr::new(err.to_string()));
            }
        }
    }
}

/// Returns `None` when stopped by the cancellation signal.
fn pump_stdin(mut stdin: ChildStdin, link: &ClientLink, cancel: &CancelToken) -> Option<SessionEnd> {
    loop {
        select! {
            recv(link.inbound()) -> message => {
                let Ok(text) = message else {
                    debug!("browser closed language server connection");
                    return Some(SessionEnd::ClientClosed);
                };
                if let Err(err) = write_frame(&mut stdin, text.as_bytes()) {
                    warn!("language server stdin: {err}");
                    return Some(SessionEnd::Failed(SmolStr::new(err.to_string())));
                }
            }
            recv(cancel.signal()) -> _ => {
                let _ = stdin.flush();
                return None;
            }
        }
    }
}

fn drain_stderr(stderr: ChildStderr) {
    if let Err(err) = drain_lines(stderr, |line| debug!(target: "devbridge::lsp", "{line}")) {
        debug!("language server stderr read failed: {err}");
    }
}
