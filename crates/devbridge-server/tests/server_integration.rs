use std::io::ErrorKind;
use std::net::TcpStream;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use devbridge_server::{start_http_server, start_ws_server, DevServerConfig, ServerState};
use serde_json::{json, Value};
use tungstenite::stream::MaybeTlsStream;
use tungstenite::{Message, WebSocket};

type Socket = WebSocket<MaybeTlsStream<TcpStream>>;

struct TestServer {
    http: String,
    ws: String,
    state: Arc<ServerState>,
}

fn unique_project(prefix: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system time before unix epoch")
        .as_nanos();
    let root = std::env::temp_dir().join(format!(
        "devbridge-{prefix}-{}-{nanos}",
        std::process::id()
    ));
    std::fs::create_dir_all(&root).expect("create project dir");
    root
}

fn start_test_server(root: &Path, extra_toml: &str) -> TestServer {
    let text = format!(
        "[server]\nhttp_listen = \"127.0.0.1:0\"\nws_listen = \"127.0.0.1:0\"\n\n{extra_toml}"
    );
    let config = DevServerConfig::from_toml_str(root, &text).expect("config");
    let state = Arc::new(ServerState::new(config));
    let http = start_http_server(Arc::clone(&state)).expect("start http");
    let ws = start_ws_server(Arc::clone(&state)).expect("start ws");
    TestServer {
        http: format!("http://{}", http.listen),
        ws: format!("ws://{}", ws.listen),
        state,
    }
}

fn agent() -> ureq::Agent {
    let config = ureq::Agent::config_builder()
        .proxy(None)
        .http_status_as_error(false)
        .build();
    ureq::Agent::new_with_config(config)
}

fn get(url: &str) -> (u16, String) {
    let mut response = agent().get(url).call().expect("http get");
    let status = response.status().as_u16();
    let body = response.body_mut().read_to_string().expect("read body");
    (status, body)
}

fn post(url: &str, body: &str) -> (u16, String) {
    let mut response = agent()
        .post(url)
        .header("Content-Type", "application/json")
        .send(body)
        .expect("http post");
    let status = response.status().as_u16();
    let body = response.body_mut().read_to_string().expect("read body");
    (status, body)
}

fn connect(url: &str) -> Socket {
    let (mut socket, response) = tungstenite::connect(url).expect("connect websocket");
    assert_eq!(
        response.status(),
        tungstenite::http::StatusCode::SWITCHING_PROTOCOLS
    );
    if let MaybeTlsStream::Plain(stream) = socket.get_mut() {
        stream
            .set_read_timeout(Some(Duration::from_millis(200)))
            .expect("set websocket read timeout");
    }
    socket
}

/// Next JSON event, or `None` once the server closed the socket.
fn next_event(socket: &mut Socket, timeout: Duration) -> Option<Value> {
    let deadline = Instant::now() + timeout;
    loop {
        match socket.read() {
            Ok(Message::Text(text)) => {
                return Some(serde_json::from_str(text.as_str()).expect("event is JSON"));
            }
            Ok(Message::Close(_)) => return None,
            Ok(_) => {}
            Err(tungstenite::Error::Io(err))
                if matches!(err.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) => {}
            Err(_) => return None,
        }
        assert!(
            Instant::now() < deadline,
            "timed out waiting for websocket event"
        );
    }
}

#[test]
fn http_api_reads_lists_and_guards_files() {
    let root = unique_project("it-files");
    std::fs::write(root.join("main.go"), "package main\n").unwrap();
    let server = start_test_server(&root, "");

    let (status, body) = get(&format!("{}/api/files", server.http));
    assert_eq!(status, 200);
    let files: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(files["files"], json!(["main.go"]));

    let (status, body) = get(&format!("{}/api/file?path=main.go", server.http));
    assert_eq!(status, 200);
    assert_eq!(body, "package main\n");

    let (status, _) = post(
        &format!("{}/api/file?path=util.go", server.http),
        "package main\n\nfunc util() {}\n",
    );
    assert_eq!(status, 200);
    assert_eq!(
        std::fs::read_to_string(root.join("util.go")).unwrap(),
        "package main\n\nfunc util() {}\n"
    );

    let (status, _) = get(&format!("{}/api/file?path=..%2F..%2Fetc%2Fpasswd", server.http));
    assert_eq!(status, 403);
}

#[test]
fn exec_socket_streams_output_then_exit() {
    let root = unique_project("it-exec");
    let server = start_test_server(
        &root,
        "[executable]\nprogram = \"sh\"\nargs = [\"-c\", \"echo hi\"]\n",
    );
    let mut socket = connect(&format!("{}/ws/exec", server.ws));

    let event = next_event(&mut socket, Duration::from_secs(5));
    assert_eq!(event, Some(json!({ "type": "stdout", "data": "hi\n" })));
    let event = next_event(&mut socket, Duration::from_secs(5));
    assert_eq!(event, Some(json!({ "type": "exited", "code": 0 })));
    assert_eq!(next_event(&mut socket, Duration::from_secs(5)), None);
    assert!(server.state.registry.executable().current().is_none());
}

#[test]
fn exec_args_query_overrides_configured_args() {
    let root = unique_project("it-exec-args");
    let server = start_test_server(
        &root,
        "[executable]\nprogram = \"echo\"\nargs = [\"configured\"]\n",
    );
    let mut socket = connect(&format!("{}/ws/exec?args=from+query", server.ws));
    let event = next_event(&mut socket, Duration::from_secs(5));
    assert_eq!(event, Some(json!({ "type": "stdout", "data": "from query\n" })));
}

#[test]
fn exec_stop_over_socket_and_status_endpoint() {
    let root = unique_project("it-exec-stop");
    let server = start_test_server(
        &root,
        "[executable]\nprogram = \"sh\"\nargs = [\"-c\", \"echo ready; exec sleep 30\"]\n",
    );
    let mut socket = connect(&format!("{}/ws/exec", server.ws));
    let event = next_event(&mut socket, Duration::from_secs(5));
    assert_eq!(event, Some(json!({ "type": "stdout", "data": "ready\n" })));

    let (_, body) = get(&format!("{}/api/status", server.http));
    let status: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(status["executable"]["running"], json!(true));

    socket.send(Message::text(r#"{"command":"stop"}"#)).unwrap();
    let event = next_event(&mut socket, Duration::from_secs(5));
    assert_eq!(event, Some(json!({ "type": "stopped" })));
    assert_eq!(next_event(&mut socket, Duration::from_secs(5)), None);

    let (_, body) = get(&format!("{}/api/status", server.http));
    let status: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(status["executable"]["running"], json!(false));

    let (status, body) = post(&format!("{}/api/exec/stop", server.http), "");
    assert_eq!(status, 200);
    let body: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(body["message"], json!("no process running"));
}

#[test]
fn unconfigured_executable_reports_error_event() {
    let root = unique_project("it-exec-none");
    let server = start_test_server(&root, "");
    let mut socket = connect(&format!("{}/ws/exec", server.ws));
    let event = next_event(&mut socket, Duration::from_secs(5)).expect("error event");
    assert_eq!(event["type"], json!("error"));
    assert!(event["message"]
        .as_str()
        .unwrap()
        .contains("executable.program"));
    assert_eq!(next_event(&mut socket, Duration::from_secs(5)), None);
}

#[test]
fn language_server_socket_relays_frames() {
    let root = unique_project("it-lsp");
    let server = start_test_server(&root, "[language_server]\nprogram = \"cat\"\n");
    let mut socket = connect(&format!("{}/ws/lsp", server.ws));

    let request = r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{}}"#;
    socket.send(Message::text(request)).unwrap();
    let echoed = next_event(&mut socket, Duration::from_secs(5)).expect("echoed frame");
    assert_eq!(echoed, serde_json::from_str::<Value>(request).unwrap());
    socket.close(None).unwrap();
}

#[test]
fn missing_debugger_binary_reports_error_event() {
    let root = unique_project("it-debug");
    let server = start_test_server(
        &root,
        "[debugger]\nprogram = \"devbridge-missing-debugger\"\nlisten = \"127.0.0.1:1\"\n",
    );
    let mut socket = connect(&format!("{}/ws/debug", server.ws));
    let event = next_event(&mut socket, Duration::from_secs(5)).expect("error event");
    assert_eq!(event["type"], json!("error"));
    assert!(event["message"]
        .as_str()
        .unwrap()
        .contains("devbridge-missing-debugger"));
    assert!(server.state.registry.debugger().current().is_none());
}

#[test]
fn unknown_socket_path_is_rejected() {
    let root = unique_project("it-404");
    let server = start_test_server(&root, "");
    match tungstenite::connect(format!("{}/ws/nothing", server.ws)) {
        Err(tungstenite::Error::Http(response)) => assert_eq!(response.status(), 404),
        Err(err) => panic!("unexpected handshake error: {err}"),
        Ok(_) => panic!("handshake should fail"),
    }
}
