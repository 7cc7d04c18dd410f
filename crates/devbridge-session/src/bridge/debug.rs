//! Debugger bridge: newline-delimited JSON-RPC over TCP ↔ browser commands.
//!
//! Connecting → Configuring → Active → Closing. While active a reader thread
//! queues replies, a forwarder rewrites their paths and labels them with the
//! originating command, and the session thread turns browser commands into
//! RPC calls.

use std::io::{BufReader, ErrorKind};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{select, Receiver, Sender};
use serde::Deserialize;
use serde_json::{json, Value};
use smol_str::SmolStr;
use tracing::{debug, info, warn};

use super::{closed_event, error_event, SessionEnd, Workers};
use crate::cancel::CancelToken;
use crate::client::ClientLink;
use crate::correlator::RequestCorrelator;
use crate::error::{BridgeError, BridgeResult};
use crate::framing::{read_line, write_json_line};
use crate::mapping::PathTranslationTable;
use crate::process::ProcessSpec;
use crate::registry::{ProcessRegistry, ReadinessPolicy};
use crate::translate::Direction;

const COMMAND_METHOD: &str = "RPCServer.Command";
const DETACH_REPLY_POLL: Duration = Duration::from_millis(20);

/// Browser intents understood by the debugger bridge.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "command", rename_all = "kebab-case")]
pub enum DebugCommand {
    Continue,
    StepOver,
    StepInto,
    StepOut,
    Halt,
    SetBreakpoint {
        file: String,
        line: u64,
        #[serde(default)]
        cond: Option<String>,
    },
    ClearBreakpoint {
        id: i64,
    },
    QueryState,
    ListLocals {
        #[serde(default = "current_goroutine")]
        goroutine: i64,
        #[serde(default)]
        frame: i64,
    },
    ListArguments {
        #[serde(default = "current_goroutine")]
        goroutine: i64,
        #[serde(default)]
        frame: i64,
    },
    Stacktrace {
        #[serde(default = "current_goroutine")]
        goroutine: i64,
        #[serde(default = "default_depth")]
        depth: u64,
    },
    Detach {
        #[serde(default)]
        kill: bool,
    },
}

fn current_goroutine() -> i64 {
    -1
}

fn default_depth() -> u64 {
    50
}

impl DebugCommand {
    /// Parses one browser message.
    pub fn parse(text: &str) -> BridgeResult<Self> {
        serde_json::from_str(text).map_err(|err| BridgeError::invalid(err.to_string()))
    }

    /// The browser-facing command name, used to label replies.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Continue => "continue",
            Self::StepOver => "step-over",
            Self::StepInto => "step-into",
            Self::StepOut => "step-out",
            Self::Halt => "halt",
            Self::SetBreakpoint { .. } => "set-breakpoint",
            Self::ClearBreakpoint { .. } => "clear-breakpoint",
            Self::QueryState => "query-state",
            Self::ListLocals { .. } => "list-locals",
            Self::ListArguments { .. } => "list-arguments",
            Self::Stacktrace { .. } => "stacktrace",
            Self::Detach { .. } => "detach",
        }
    }

    /// RPC method and its single parameter object.
    #[must_use]
    pub fn to_rpc(&self) -> (&'static str, Value) {
        match self {
            Self::Continue => (COMMAND_METHOD, json!({ "name": "continue" })),
            Self::StepOver => (COMMAND_METHOD, json!({ "name": "next" })),
            Self::StepInto => (COMMAND_METHOD, json!({ "name": "step" })),
            Self::StepOut => (COMMAND_METHOD, json!({ "name": "stepOut" })),
            Self::Halt => (COMMAND_METHOD, json!({ "name": "halt" })),
            Self::SetBreakpoint { file, line, cond } => (
                "RPCServer.CreateBreakpoint",
                json!({
                    "Breakpoint": {
                        "file": file,
                        "line": line,
                        "Cond": cond.as_deref().unwrap_or_default(),
                    }
                }),
            ),
            Self::ClearBreakpoint { id } => ("RPCServer.ClearBreakpoint", json!({ "Id": id })),
            Self::QueryState => ("RPCServer.State", json!({ "NonBlocking": true })),
            Self::ListLocals { goroutine, frame } => (
                "RPCServer.ListLocalVars",
                scoped_params(*goroutine, *frame),
            ),
            Self::ListArguments { goroutine, frame } => (
                "RPCServer.ListFunctionArgs",
                scoped_params(*goroutine, *frame),
            ),
            Self::Stacktrace { goroutine, depth } => (
                "RPCServer.Stacktrace",
                json!({ "Id": goroutine, "Depth": depth }),
            ),
            Self::Detach { kill } => ("RPCServer.Detach", json!({ "Kill": kill })),
        }
    }
}

fn scoped_params(goroutine: i64, frame: i64) -> Value {
    json!({
        "Scope": { "GoroutineID": goroutine, "Frame": frame },
        "Cfg": {
            "FollowPointers": true,
            "MaxVariableRecurse": 1,
            "MaxStringLen": 64,
            "MaxArrayValues": 64,
            "MaxStructFields": -1,
        },
    })
}

/// Debugger-specific configuration directives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DebuggerDialect {
    /// Sent via `RPCServer.SetApiVersion` when present.
    pub api_version: Option<u32>,
    pub substitute_path_method: SmolStr,
}

impl Default for DebuggerDialect {
    fn default() -> Self {
        Self {
            api_version: Some(2),
            substitute_path_method: SmolStr::new_static("RPCServer.SetSubstitutePath"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DebugSessionConfig {
    pub spec: ProcessSpec,
    pub address: SocketAddr,
    pub readiness: ReadinessPolicy,
    pub mapping_artifact: PathBuf,
    pub dialect: DebuggerDialect,
    /// Bound for the connect and configuring round-trips.
    pub rpc_timeout: Duration,
}

/// Runs one debug session.
///
/// Starting replaces any running debugger. Setup failures are returned as
/// errors with the debugger already stopped; once active, the session ends on
/// browser disconnect, socket EOF/error or detach and reports why.
pub fn run_debug_session(
    registry: &ProcessRegistry,
    config: &DebugSessionConfig,
    link: ClientLink,
) -> BridgeResult<SessionEnd> {
    let table = Arc::new(PathTranslationTable::load_or_empty(&config.mapping_artifact));
    let handle = registry.start_debugger(&config.spec, config.address, config.readiness)?;
    let correlator = Arc::new(RequestCorrelator::new());

    let stream = match connect_and_configure(config, &table, &correlator) {
        Ok(stream) => stream,
        Err(err) => {
            warn!(pid = handle.pid(), "debugger setup failed: {err}");
            registry.debugger().release(&handle);
            return Err(err);
        }
    };
    info!(
        pid = handle.pid(),
        addr = %config.address,
        mappings = table.len(),
        "debug session active"
    );

    let session = ActiveSession {
        table,
        correlator,
        cancel: CancelToken::new(),
        rpc_timeout: config.rpc_timeout,
    };
    let end = session.run(&stream, link);

    if let Err(err) = stream.shutdown(Shutdown::Both) {
        if err.kind() != ErrorKind::NotConnected {
            debug!("debugger socket shutdown: {err}");
        }
    }
    // A debugger that died with the connection must not keep the slot.
    if matches!(end, SessionEnd::Detached { killed: true }) || !handle.is_alive() {
        let (outcome, _) = registry.debugger().release(&handle);
        info!(pid = handle.pid(), "{}", outcome.message());
    }
    Ok(end)
}

fn connect_and_configure(
    config: &DebugSessionConfig,
    table: &PathTranslationTable,
    correlator: &RequestCorrelator,
) -> BridgeResult<TcpStream> {
    let stream = TcpStream::connect_timeout(&config.address, config.rpc_timeout)?;
    stream.set_read_timeout(Some(config.rpc_timeout))?;
    let mut reader = BufReader::new(stream.try_clone()?);
    let mut writer = stream.try_clone()?;

    if let Some(version) = config.dialect.api_version {
        round_trip(
            &mut writer,
            &mut reader,
            correlator,
            "RPCServer.SetApiVersion",
            json!({ "APIVersion": version }),
        )?;
    }

    let rules = table.substitute_rules();
    if rules.is_empty() {
        debug!("no path mappings, skipping substitute-path directive");
    } else {
        let pairs: Vec<[&str; 2]> = rules
            .iter()
            .map(|rule| [rule.from.as_str(), rule.to.as_str()])
            .collect();
        round_trip(
            &mut writer,
            &mut reader,
            correlator,
            &config.dialect.substitute_path_method,
            json!({ "Rules": pairs }),
        )?;
    }

    stream.set_read_timeout(None)?;
    Ok(stream)
}

/// Sends one configuring request and waits for its reply.
///
/// An `error` in the reply is logged only; I/O failures and timeouts abort.
fn round_trip(
    writer: &mut TcpStream,
    reader: &mut BufReader<TcpStream>,
    correlator: &RequestCorrelator,
    method: &str,
    params: Value,
) -> BridgeResult<()> {
    let id = correlator.issue(method);
    write_json_line(writer, &request_line(method, params, id))?;
    loop {
        let line = read_line(reader)?.ok_or_else(|| {
            BridgeError::protocol(format!("debugger closed connection during {method}"))
        })?;
        let Some(reply) = parse_reply(&line) else {
            continue;
        };
        if reply.get("id").and_then(Value::as_u64) != Some(id) {
            debug!(method, "ignoring unrelated line while configuring");
            continue;
        }
        correlator.take_method(id);
        match reply.get("error") {
            Some(error) if !error.is_null() => warn!(method, %error, "debugger rejected directive"),
            _ => debug!(method, "debugger accepted directive"),
        }
        return Ok(());
    }
}

fn request_line(method: &str, params: Value, id: u64) -> Value {
    json!({ "method": method, "params": [params], "id": id })
}

fn parse_reply(line: &[u8]) -> Option<Value> {
    match serde_json::from_slice::<Value>(line) {
        Ok(value) if value.is_object() => Some(value),
        Ok(_) => {
            warn!("debugger sent a non-object line, skipping");
            None
        }
        Err(err) => {
            warn!("debugger sent malformed JSON, skipping: {err}");
            None
        }
    }
}

struct ActiveSession {
    table: Arc<PathTranslationTable>,
    correlator: Arc<RequestCorrelator>,
    cancel: CancelToken,
    rpc_timeout: Duration,
}

impl ActiveSession {
    fn run(&self, stream: &TcpStream, link: ClientLink) -> SessionEnd {
        let (queue_tx, queue_rx) = crossbeam_channel::unbounded();
        let (closed_tx, closed_rx) = crossbeam_channel::bounded(1);
        let mut workers = Workers::default();

        let spawned = self.spawn_workers(&mut workers, stream, &link, queue_tx, queue_rx, closed_tx);
        let end = match spawned {
            Ok(()) => match stream.try_clone() {
                Ok(writer) => self.command_loop(writer, &link, &closed_rx),
                Err(err) => SessionEnd::Failed(SmolStr::new(err.to_string())),
            },
            Err(err) => SessionEnd::Failed(SmolStr::new(err.to_string())),
        };

        self.cancel.cancel();
        let _ = stream.shutdown(Shutdown::Both);
        workers.join();
        info!(
            reason = %end,
            unanswered = self.correlator.pending(),
            "debug session closing"
        );
        link.send_json(&closed_event(&end));
        end
    }

    fn spawn_workers(
        &self,
        workers: &mut Workers,
        stream: &TcpStream,
        link: &ClientLink,
        queue_tx: Sender<Value>,
        queue_rx: Receiver<Value>,
        closed_tx: Sender<SessionEnd>,
    ) -> BridgeResult<()> {
        let reader = BufReader::new(stream.try_clone()?);
        workers.spawn("debug-reader", move || {
            let end = read_replies(reader, &queue_tx);
            let _ = closed_tx.send(end);
        })?;

        let link = link.clone();
        let table = Arc::clone(&self.table);
        let correlator = Arc::clone(&self.correlator);
        let cancel = self.cancel.clone();
        workers.spawn("debug-forwarder", move || loop {
            select! {
                recv(queue_rx) -> reply => {
                    let Ok(reply) = reply else { break };
                    let event = reply_event(reply, &table, &correlator);
                    if !link.send_json(&event) {
                        break;
                    }
                }
                recv(cancel.signal()) -> _ => break,
            }
        })
    }

    fn command_loop(
        &self,
        mut writer: TcpStream,
        link: &ClientLink,
        closed: &Receiver<SessionEnd>,
    ) -> SessionEnd {
        loop {
            select! {
                recv(link.inbound()) -> message => {
                    let Ok(text) = message else {
                        return SessionEnd::ClientClosed;
                    };
                    let command = match DebugCommand::parse(&text) {
                        Ok(command) => command,
                        Err(err) => {
                            warn!("dropping debugger command: {err}");
                            link.send_json(&error_event(err));
                            continue;
                        }
                    };
                    let id = match self.send_command(&mut writer, &command) {
                        Ok(id) => id,
                        Err(err) => return SessionEnd::Failed(SmolStr::new(err.to_string())),
                    };
                    if let DebugCommand::Detach { kill } = command {
                        self.await_reply(id, closed);
                        return SessionEnd::Detached { killed: kill };
                    }
                }
                recv(closed) -> end => {
                    return end.unwrap_or(SessionEnd::ProcessClosed);
                }
            }
        }
    }

    fn send_command(&self, writer: &mut TcpStream, command: &DebugCommand) -> BridgeResult<u64> {
        let (method, mut params) = command.to_rpc();
        self.table
            .translate_in_place(Direction::ToInstrumented, &mut params);
        let id = self.correlator.issue(command.name());
        debug!(id, command = command.name(), method, "sending debugger request");
        write_json_line(writer, &request_line(method, params, id))?;
        Ok(id)
    }

    /// Gives the detach reply a chance to reach the browser.
    fn await_reply(&self, id: u64, closed: &Receiver<SessionEnd>) {
        let deadline = Instant::now() + self.rpc_timeout;
        while self.correlator.is_pending(id) && Instant::now() < deadline {
            select! {
                recv(closed) -> _ => return,
                default(DETACH_REPLY_POLL) => {}
            }
        }
    }
}

fn read_replies(mut reader: BufReader<TcpStream>, queue: &Sender<Value>) -> SessionEnd {
    loop {
        match read_line(&mut reader) {
            Ok(Some(line)) => {
                if let Some(reply) = parse_reply(&line) {
                    if queue.send(reply).is_err() {
                        return SessionEnd::ClientClosed;
                    }
                }
            }
            Ok(None) => return SessionEnd::ProcessClosed,
            Err(err) => {
                debug!("debugger socket read: {err}");
                return SessionEnd::Failed(SmolStr::new(err.to_string()));
            }
        }
    }
}

fn reply_event(
    mut reply: Value,
    table: &PathTranslationTable,
    correlator: &RequestCorrelator,
) -> Value {
    table.translate_in_place(Direction::ToOriginal, &mut reply);
    let id = reply.get("id").and_then(Value::as_u64);
    let method = id.map(|id| correlator.take_method(id)).unwrap_or_default();
    let result = reply.get_mut("result").map(Value::take).unwrap_or(Value::Null);
    let error = reply.get_mut("error").map(Value::take).unwrap_or(Value::Null);
    json!({
        "type": "reply",
        "id": id,
        "method": method.as_str(),
        "result": result,
        "error": error,
    })
}
