//! WebSocket hosting: one connection thread per browser socket.
//!
//! The handshake picks the bridge from the request path; afterwards a pump
//! thread owns the socket and shuttles text frames to and from the session's
//! [`ClientLink`].

use std::io::ErrorKind;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, TryRecvError};
use devbridge_session::{
    run_debug_session, run_exec_session, run_language_server_session, ClientLink,
};
use serde_json::json;
use tracing::{debug, info, warn};
use tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tungstenite::http::StatusCode;
use tungstenite::{accept_hdr, Error as WsError, Message, WebSocket};

use crate::error::ServerError;
use crate::http::{query_param, split_url};
use crate::state::ServerState;

const PUMP_TICK: Duration = Duration::from_millis(25);

pub struct WsServer {
    handle: thread::JoinHandle<()>,
    pub listen: SocketAddr,
}

impl WsServer {
    pub fn join(self) {
        if self.handle.join().is_err() {
            warn!("websocket accept loop panicked");
        }
    }
}

/// Which bridge a connection is routed to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    LanguageServer,
    Debugger,
    Executable { args: Option<Vec<String>> },
}

impl Route {
    /// Maps `/ws/<bridge>[?query]` to a route.
    #[must_use]
    pub fn parse(path_and_query: &str) -> Option<Self> {
        let (path, query) = split_url(path_and_query);
        match path.trim_end_matches('/') {
            "/ws/lsp" => Some(Self::LanguageServer),
            "/ws/debug" => Some(Self::Debugger),
            "/ws/exec" => Some(Self::Executable {
                args: query_param(query, "args")
                    .map(|args| args.split_whitespace().map(String::from).collect()),
            }),
            _ => None,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Self::LanguageServer => "lsp",
            Self::Debugger => "debug",
            Self::Executable { .. } => "exec",
        }
    }
}

pub fn start_ws_server(state: Arc<ServerState>) -> Result<WsServer, ServerError> {
    let listen_text = state.config.server.ws_listen.clone();
    let listener = TcpListener::bind(listen_text.as_str()).map_err(|err| ServerError::Bind {
        listen: listen_text.clone(),
        message: err.to_string().into(),
    })?;
    let listen = listener.local_addr()?;
    let handle = thread::Builder::new()
        .name("ws-accept".into())
        .spawn(move || {
            for stream in listener.incoming() {
                let stream = match stream {
                    Ok(stream) => stream,
                    Err(err) => {
                        warn!(%err, "websocket accept failed");
                        continue;
                    }
                };
                let state = Arc::clone(&state);
                let spawned = thread::Builder::new()
                    .name("ws-connection".into())
                    .spawn(move || handle_connection(&state, stream));
                if let Err(err) = spawned {
                    warn!(%err, "failed to spawn websocket connection thread");
                }
            }
        })?;
    info!(%listen, "websocket bridge listening");
    Ok(WsServer { handle, listen })
}

fn handle_connection(state: &ServerState, stream: TcpStream) {
    let peer = stream.peer_addr().ok();
    let mut route = None;
    let callback = |request: &Request, response: Response| {
        let target = request
            .uri()
            .path_and_query()
            .map_or_else(|| request.uri().path().to_string(), ToString::to_string);
        match Route::parse(&target) {
            Some(parsed) => {
                route = Some(parsed);
                Ok(response)
            }
            None => Err(not_found(&target)),
        }
    };
    let websocket = match accept_hdr(stream, callback) {
        Ok(websocket) => websocket,
        Err(err) => {
            debug!(?peer, %err, "websocket handshake rejected");
            return;
        }
    };
    let Some(route) = route else {
        return;
    };
    if let Err(err) = websocket.get_ref().set_read_timeout(Some(PUMP_TICK)) {
        warn!(?peer, %err, "failed to configure websocket");
        return;
    }
    info!(?peer, bridge = route.name(), "browser connected");

    let (to_session, inbound) = crossbeam_channel::unbounded();
    let (outbound, from_session) = crossbeam_channel::unbounded();
    let pump = thread::Builder::new()
        .name("ws-pump".into())
        .spawn(move || pump_frames(websocket, &to_session, &from_session));
    let pump = match pump {
        Ok(pump) => pump,
        Err(err) => {
            warn!(%err, "failed to spawn websocket pump");
            return;
        }
    };

    run_bridge(state, &route, ClientLink::new(inbound, outbound));

    if pump.join().is_err() {
        warn!("websocket pump panicked");
    }
    info!(?peer, bridge = route.name(), "browser connection closed");
}

/// Runs the routed session to completion; `link` is dropped on return,
/// which lets the pump close the socket.
fn run_bridge(state: &ServerState, route: &Route, link: ClientLink) {
    let notify = link.clone();
    let result = match route {
        Route::LanguageServer => {
            let slot = state.registry.language_server_slot();
            run_language_server_session(&slot, &state.config.language_server_spec(), link)
                .map(|end| end.reason())
        }
        Route::Debugger => {
            run_debug_session(&state.registry, &state.config.debug_session_config(), link)
                .map(|end| end.reason())
        }
        Route::Executable { args } => match state.config.executable_spec(args.clone()) {
            Ok(spec) => run_exec_session(
                &state.registry,
                &spec,
                link,
                state.config.exec_options(),
            )
            .map(|terminal| format!("{terminal:?}")),
            Err(err) => {
                notify.send_json(&json!({ "type": "error", "message": err.to_string() }));
                return;
            }
        },
    };
    match result {
        Ok(reason) => debug!(bridge = route.name(), %reason, "session finished"),
        Err(err) => {
            warn!(bridge = route.name(), "session setup failed: {err}");
            notify.send_json(&json!({ "type": "error", "message": err.to_string() }));
        }
    }
}

/// Owns the socket: outbound messages become text frames, inbound text
/// frames go to the session. Returns once either side is finished.
fn pump_frames(
    mut websocket: WebSocket<TcpStream>,
    to_session: &Sender<String>,
    from_session: &Receiver<String>,
) {
    loop {
        loop {
            match from_session.try_recv() {
                Ok(text) => {
                    if let Err(err) = websocket.send(Message::text(text)) {
                        debug!(%err, "websocket send failed");
                        return;
                    }
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    let _ = websocket.close(None);
                    let _ = websocket.flush();
                    return;
                }
            }
        }

        match websocket.read() {
            Ok(Message::Text(text)) => {
                // A finished session is noticed through `from_session`.
                let _ = to_session.send(text.as_str().to_owned());
            }
            Ok(Message::Binary(bytes)) => {
                let _ = to_session.send(String::from_utf8_lossy(&bytes).into_owned());
            }
            Ok(Message::Close(_)) => {
                debug!("browser sent close");
                return;
            }
            Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => {}
            Err(WsError::Io(err))
                if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {}
            Err(WsError::ConnectionClosed | WsError::AlreadyClosed) => return,
            Err(err) => {
                debug!(%err, "websocket read failed");
                return;
            }
        }
    }
}

fn not_found(target: &str) -> ErrorResponse {
    let mut response = ErrorResponse::new(Some(format!("no bridge at {target}")));
    *response.status_mut() = StatusCode::NOT_FOUND;
    response
}
