//! HTTP API and static UI assets.

use std::io::Read;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use devbridge_session::{run_capture, BridgeError, ProcessSlot, ProcessSpec, ToolFlag};
use serde::Deserialize;
use serde_json::{json, Value};
use tiny_http::{Header, Method, Request, Response, Server};
use tracing::{debug, info, warn};

use crate::error::ServerError;
use crate::files::{FileError, ProjectFiles};
use crate::state::ServerState;

const MAX_BODY_BYTES: u64 = 16 * 1024 * 1024;

pub struct HttpServer {
    handle: thread::JoinHandle<()>,
    pub listen: SocketAddr,
}

impl HttpServer {
    /// Blocks until the accept loop ends.
    pub fn join(self) {
        if self.handle.join().is_err() {
            warn!("http accept loop panicked");
        }
    }
}

pub fn start_http_server(state: Arc<ServerState>) -> Result<HttpServer, ServerError> {
    let listen_text = state.config.server.http_listen.clone();
    let server = Server::http(listen_text.as_str()).map_err(|err| ServerError::Bind {
        listen: listen_text.clone(),
        message: err.to_string().into(),
    })?;
    let listen = server
        .server_addr()
        .to_ip()
        .ok_or_else(|| ServerError::Bind {
            listen: listen_text.clone(),
            message: "not an ip listener".into(),
        })?;
    let handle = thread::Builder::new()
        .name("http-accept".into())
        .spawn(move || {
            for request in server.incoming_requests() {
                let state = Arc::clone(&state);
                let spawned = thread::Builder::new()
                    .name("http-request".into())
                    .spawn(move || handle_request(&state, request));
                if let Err(err) = spawned {
                    warn!(%err, "failed to spawn http request thread");
                }
            }
        })?;
    info!(%listen, "http api listening");
    Ok(HttpServer { handle, listen })
}

/// A fully rendered response, independent of the transport.
#[derive(Debug)]
struct Reply {
    status: u16,
    content_type: &'static str,
    body: Vec<u8>,
}

impl Reply {
    fn json(status: u16, value: &Value) -> Self {
        Self {
            status,
            content_type: "application/json",
            body: value.to_string().into_bytes(),
        }
    }

    fn ok(value: &Value) -> Self {
        Self::json(200, value)
    }

    fn error(status: u16, message: impl std::fmt::Display) -> Self {
        Self::json(status, &json!({ "ok": false, "error": message.to_string() }))
    }

    fn into_response(self) -> Response<std::io::Cursor<Vec<u8>>> {
        let response = Response::from_data(self.body).with_status_code(self.status);
        match Header::from_bytes("Content-Type", self.content_type) {
            Ok(header) => response.with_header(header),
            Err(()) => response,
        }
    }
}

fn handle_request(state: &ServerState, mut request: Request) {
    let method = request.method().clone();
    let url = request.url().to_string();
    let (path, query) = split_url(&url);

    let mut body = String::new();
    let reply = if method == Method::Post
        && request
            .as_reader()
            .take(MAX_BODY_BYTES)
            .read_to_string(&mut body)
            .is_err()
    {
        Reply::error(400, "invalid body")
    } else {
        route(state, &method, path, query, &body)
    };
    debug!(%method, path, status = reply.status, "http request");
    if let Err(err) = request.respond(reply.into_response()) {
        debug!(%err, "failed to write http response");
    }
}

fn route(state: &ServerState, method: &Method, path: &str, query: &str, body: &str) -> Reply {
    match (method, path) {
        (Method::Get, "/api/status") => Reply::ok(&status(state)),
        (Method::Get, "/api/files") => match state.files.list() {
            Ok(files) => Reply::ok(&json!({ "files": files })),
            Err(err) => file_error(&err),
        },
        (Method::Get, "/api/file") => {
            let Some(file) = query_param(query, "path") else {
                return Reply::error(400, "missing path");
            };
            match state.files.read(&file) {
                Ok(text) => Reply {
                    status: 200,
                    content_type: "text/plain; charset=utf-8",
                    body: text.into_bytes(),
                },
                Err(err) => file_error(&err),
            }
        }
        (Method::Post, "/api/file") => {
            let Some(file) = query_param(query, "path") else {
                return Reply::error(400, "missing path");
            };
            match state.files.write(&file, body) {
                Ok(()) => Reply::ok(&json!({ "ok": true, "path": file })),
                Err(err) => file_error(&err),
            }
        }
        (Method::Post, "/api/run") => run(state, body),
        (Method::Post, "/api/exec/stop") => stop_slot(state.registry.executable()),
        (Method::Post, "/api/debug/stop") => stop_slot(state.registry.debugger()),
        (Method::Post, tool) if tool.starts_with("/api/tool/") => {
            invoke_tool(state, &tool["/api/tool/".len()..], body)
        }
        (Method::Get, asset) if !asset.starts_with("/api/") => static_asset(state, asset),
        _ => Reply::error(404, "not found"),
    }
}

fn status(state: &ServerState) -> Value {
    let slot = |slot: &ProcessSlot| match slot.current() {
        Some(handle) => json!({
            "running": handle.is_alive(),
            "pid": handle.pid(),
            "program": handle.program(),
        }),
        None => json!({ "running": false, "pid": null }),
    };
    json!({
        "project_root": state.config.project_root.to_string_lossy(),
        "debugger": slot(state.registry.debugger()),
        "executable": slot(state.registry.executable()),
    })
}

fn stop_slot(slot: &ProcessSlot) -> Reply {
    let outcome = slot.stop_current();
    info!(kind = %slot.kind(), "{}", outcome.message());
    Reply::ok(&json!({ "ok": true, "message": outcome.message() }))
}

#[derive(Debug, Default, Deserialize)]
struct ToolBody {
    arg: Option<String>,
}

fn invoke_tool(state: &ServerState, name: &str, body: &str) -> Reply {
    let flag = match name.parse::<ToolFlag>() {
        Ok(flag) => flag,
        Err(err) => return Reply::error(404, err),
    };
    let payload = if body.trim().is_empty() {
        ToolBody::default()
    } else {
        match serde_json::from_str::<ToolBody>(body) {
            Ok(payload) => payload,
            Err(_) => return Reply::error(400, "invalid json"),
        }
    };
    match state.config.analysis_tool().invoke(flag, payload.arg.as_deref()) {
        Ok(output) => Reply::ok(&json!({ "ok": true, "output": output })),
        Err(BridgeError::ToolFailed { output }) => Reply::error(500, output),
        Err(err) => Reply::error(500, err),
    }
}

#[derive(Debug, Deserialize)]
struct RunBody {
    program: String,
    #[serde(default)]
    args: Vec<String>,
    timeout_ms: Option<u64>,
}

fn run(state: &ServerState, body: &str) -> Reply {
    let payload: RunBody = match serde_json::from_str(body) {
        Ok(payload) => payload,
        Err(_) => return Reply::error(400, "invalid json"),
    };
    if payload.program.trim().is_empty() {
        return Reply::error(400, "program is required");
    }
    let timeout = payload
        .timeout_ms
        .filter(|ms| *ms > 0)
        .map_or(state.config.run_timeout, Duration::from_millis);
    let spec = ProcessSpec::new(payload.program)
        .args(payload.args)
        .cwd(&state.config.project_root);
    match run_capture(&spec, timeout) {
        Ok(run) => match serde_json::to_value(&run) {
            Ok(value) => Reply::ok(&value),
            Err(err) => Reply::error(500, err),
        },
        Err(err) => Reply::error(500, err),
    }
}

fn static_asset(state: &ServerState, path: &str) -> Reply {
    let Some(ui_dir) = state.config.server.ui_dir.as_deref() else {
        return Reply::error(404, "not found");
    };
    let relative = match path.trim_start_matches('/') {
        "" => "index.html".to_string(),
        other => urlencoding::decode(other).map_or_else(|_| other.to_string(), |s| s.into_owned()),
    };
    let assets = ProjectFiles::new(ui_dir);
    let resolved = match assets.resolve(&relative) {
        Ok(resolved) if resolved.is_file() => resolved,
        Ok(_) => return Reply::error(404, "not found"),
        Err(err) => return file_error(&err),
    };
    match std::fs::read(&resolved) {
        Ok(body) => Reply {
            status: 200,
            content_type: content_type(&resolved),
            body,
        },
        Err(err) => Reply::error(500, err),
    }
}

fn file_error(err: &FileError) -> Reply {
    Reply::error(err.status(), err)
}

fn content_type(path: &Path) -> &'static str {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("html" | "htm") => "text/html; charset=utf-8",
        Some("css") => "text/css",
        Some("js" | "mjs") => "application/javascript",
        Some("json" | "map") => "application/json",
        Some("svg") => "image/svg+xml",
        Some("png") => "image/png",
        Some("ico") => "image/x-icon",
        Some("wasm") => "application/wasm",
        Some("woff2") => "font/woff2",
        Some("txt" | "go" | "mod" | "sum") => "text/plain; charset=utf-8",
        _ => "application/octet-stream",
    }
}

pub(crate) fn split_url(url: &str) -> (&str, &str) {
    url.split_once('?').unwrap_or((url, ""))
}

/// First value of `key` in a query string, percent-decoded.
pub(crate) fn query_param(query: &str, key: &str) -> Option<String> {
    query.split('&').find_map(|pair| {
        let (name, value) = pair.split_once('=').unwrap_or((pair, ""));
        if name != key {
            return None;
        }
        let value = value.replace('+', " ");
        Some(
            urlencoding::decode(&value)
                .map_or_else(|_| value.clone(), std::borrow::Cow::into_owned),
        )
    })
}
