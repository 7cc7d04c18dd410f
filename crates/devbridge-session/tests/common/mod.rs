#![allow(dead_code)]

use std::io::{BufRead, BufReader, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::path::PathBuf;
use std::process::Command;
use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crossbeam_channel::{Receiver, Sender};
use serde_json::{json, Value};

use devbridge_session::ClientEnd;

pub fn unique_temp_dir(prefix: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system time before unix epoch")
        .as_nanos();
    let dir = std::env::temp_dir().join(format!(
        "devbridge-{prefix}-{}-{nanos}",
        std::process::id()
    ));
    std::fs::create_dir_all(&dir).expect("create temp dir");
    dir
}

pub fn pid_alive(pid: u32) -> bool {
    Command::new("kill")
        .args(["-0", &pid.to_string()])
        .status()
        .map(|status| status.success())
        .unwrap_or(false)
}

/// Next browser-bound event, parsed.
pub fn next_event(end: &ClientEnd, timeout: Duration) -> Value {
    let text = end
        .from_session
        .recv_timeout(timeout)
        .expect("session event");
    serde_json::from_str(&text).expect("event is JSON")
}

/// Every remaining event once the session has dropped its side.
pub fn remaining_events(end: &ClientEnd) -> Vec<Value> {
    end.from_session
        .iter()
        .map(|text| serde_json::from_str(&text).expect("event is JSON"))
        .collect()
}

/// A line JSON-RPC peer answering every request with its first parameter.
///
/// Every request line is reported on the returned channel. Connections that
/// close without sending anything (readiness checks) are ignored.
pub struct FakeDebugger {
    pub addr: SocketAddr,
    pub requests: Receiver<Value>,
}

impl FakeDebugger {
    pub fn start() -> Self {
        Self::start_with_limit(None)
    }

    /// Closes each connection after answering `limit` requests.
    pub fn hanging_up_after(limit: usize) -> Self {
        Self::start_with_limit(Some(limit))
    }

    fn start_with_limit(limit: Option<usize>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind fake debugger");
        let addr = listener.local_addr().expect("local addr");
        let (requests_tx, requests) = crossbeam_channel::unbounded();
        thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(stream) = stream else { break };
                let requests = requests_tx.clone();
                thread::spawn(move || serve(stream, &requests, limit));
            }
        });
        Self { addr, requests }
    }

    pub fn next_request(&self) -> Value {
        self.requests
            .recv_timeout(Duration::from_secs(5))
            .expect("debugger request")
    }
}

fn serve(stream: TcpStream, requests: &Sender<Value>, limit: Option<usize>) {
    let mut writer = stream.try_clone().expect("clone stream");
    let reader = BufReader::new(stream.try_clone().expect("clone stream"));
    let mut answered = 0;
    for line in reader.lines() {
        let Ok(line) = line else { break };
        let Ok(request) = serde_json::from_str::<Value>(&line) else {
            continue;
        };
        let reply = json!({
            "id": request["id"],
            "result": request["params"][0],
            "error": null,
        });
        let _ = requests.send(request);
        let mut encoded = reply.to_string();
        encoded.push('\n');
        if writer.write_all(encoded.as_bytes()).is_err() {
            break;
        }
        answered += 1;
        if limit.is_some_and(|limit| answered >= limit) {
            let _ = stream.shutdown(std::net::Shutdown::Both);
            break;
        }
    }
}

/// An address with nothing listening on it.
pub fn closed_port() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    listener.local_addr().expect("local addr")
}
