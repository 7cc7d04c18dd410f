//! Bridge errors.

#![allow(missing_docs)]

use std::io;
use std::net::SocketAddr;

use smol_str::SmolStr;
use thiserror::Error;

/// Errors raised while setting up or running a session bridge.
///
/// Setup failures (spawn, readiness, malformed requests) are reported to the
/// caller synchronously; mid-session failures end the session only.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// The external program could not be started.
    #[error("failed to spawn '{program}': {source}")]
    Spawn {
        program: SmolStr,
        #[source]
        source: io::Error,
    },

    /// The debugger never accepted a loopback connection.
    #[error("debugger at {addr} not responding after {waited_ms}ms")]
    NotResponding { addr: SocketAddr, waited_ms: u64 },

    /// The process exited before it became usable.
    #[error("process exited during startup (code {code:?})")]
    ExitedEarly { code: Option<i32> },

    /// Pipe, socket or filesystem failure.
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    /// The peer violated its wire protocol.
    #[error("protocol error: {0}")]
    Protocol(SmolStr),

    /// A browser request that cannot be honoured.
    #[error("invalid request: {0}")]
    InvalidRequest(SmolStr),

    /// The analysis tool exited with a non-zero status.
    #[error("{output}")]
    ToolFailed { output: String },

    /// A required standard stream was not piped.
    #[error("missing {0} pipe")]
    MissingPipe(&'static str),
}

impl BridgeError {
    pub(crate) fn protocol(message: impl Into<SmolStr>) -> Self {
        Self::Protocol(message.into())
    }

    pub(crate) fn invalid(message: impl Into<SmolStr>) -> Self {
        Self::InvalidRequest(message.into())
    }

    /// True for errors caused by the caller rather than the environment.
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::InvalidRequest(_))
    }
}

pub type BridgeResult<T> = Result<T, BridgeError>;
