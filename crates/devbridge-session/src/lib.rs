//! Process session bridges for the devbridge development server.
//!
//! A session pairs one browser connection ([`ClientLink`]) with one external
//! process and runs the forwarding loops between them until the process
//! exits, the browser disconnects or the user stops it.
//!
//! - mapping / translate: source path tables and JSON path rewriting
//! - correlator: request id to command name bookkeeping
//! - process / registry: process handles and the per-kind slots
//! - bridge: language server, debugger and executable sessions
//! - run: run-and-capture and analysis tool invocation

pub mod bridge;
mod cancel;
mod client;
mod correlator;
mod error;
pub mod framing;
pub mod mapping;
mod process;
mod registry;
pub mod run;
pub mod translate;

pub use bridge::debug::{run_debug_session, DebugCommand, DebugSessionConfig, DebuggerDialect};
pub use bridge::exec::{run_exec_session, ExecOptions, ExecTerminal};
pub use bridge::lsp::run_language_server_session;
pub use bridge::SessionEnd;
pub use cancel::CancelToken;
pub use client::{ClientEnd, ClientLink};
pub use correlator::RequestCorrelator;
pub use error::{BridgeError, BridgeResult};
pub use mapping::{MappingArtifact, PathMapping, PathTranslationTable, SubstituteRule};
pub use process::{ProcessHandle, ProcessKind, ProcessSpec, StopOutcome};
pub use registry::{ProcessRegistry, ProcessSlot, ReadinessPolicy};
pub use run::{run_capture, AnalysisTool, CapturedRun, ToolFlag};
