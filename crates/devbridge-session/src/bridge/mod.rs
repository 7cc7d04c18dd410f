//! Session bridges.
//! - lsp: Content-Length framed stdio ↔ browser
//! - debug: line JSON-RPC over TCP ↔ browser, with path translation
//! - exec: program stdout/stderr tee with stop/exit/disconnect race

pub mod debug;
pub mod exec;
pub mod lsp;

use std::fmt;
use std::thread::{self, JoinHandle};

use serde_json::{json, Value};
use smol_str::SmolStr;
use tracing::warn;

use crate::error::BridgeResult;

/// Why a session finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEnd {
    /// The browser connection went away.
    ClientClosed,
    /// The process side reached EOF.
    ProcessClosed,
    /// The browser detached from the debugger.
    Detached { killed: bool },
    /// A mid-session I/O or protocol failure.
    Failed(SmolStr),
}

impl SessionEnd {
    #[must_use]
    pub fn reason(&self) -> String {
        match self {
            Self::ClientClosed => "client disconnected".to_string(),
            Self::ProcessClosed => "process closed the connection".to_string(),
            Self::Detached { killed: true } => "detached, debugger killed".to_string(),
            Self::Detached { killed: false } => "detached".to_string(),
            Self::Failed(message) => format!("session failed: {message}"),
        }
    }
}

impl fmt::Display for SessionEnd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.reason())
    }
}

pub(crate) fn error_event(message: impl fmt::Display) -> Value {
    json!({ "type": "error", "message": message.to_string() })
}

pub(crate) fn closed_event(end: &SessionEnd) -> Value {
    json!({ "type": "closed", "reason": end.reason() })
}

/// Named worker threads of one session, joined during teardown.
#[derive(Debug, Default)]
pub(crate) struct Workers {
    handles: Vec<JoinHandle<()>>,
}

impl Workers {
    pub(crate) fn spawn<F>(&mut self, name: &str, work: F) -> BridgeResult<()>
    where
        F: FnOnce() + Send + 'static,
    {
        let handle = thread::Builder::new().name(name.into()).spawn(work)?;
        self.handles.push(handle);
        Ok(())
    }

    pub(crate) fn join(self) {
        for handle in self.handles {
            let name = handle.thread().name().unwrap_or("worker").to_string();
            if handle.join().is_err() {
                warn!(worker = %name, "session worker panicked");
            }
        }
    }
}
