//! devbridge local development server.
//!
//! Hosts the session bridges of `devbridge-session` behind a WebSocket
//! listener (`/ws/lsp`, `/ws/debug`, `/ws/exec`) and serves the editor's
//! HTTP API (files, analysis tool, run-and-capture, process control) plus
//! its static UI assets.

pub mod cli;
pub mod config;
pub mod error;
pub mod files;
pub mod http;
pub mod state;
pub mod ws;

pub use cli::Cli;
pub use config::{ConfigError, DevServerConfig};
pub use error::ServerError;
pub use files::{FileError, ProjectFiles};
pub use http::{start_http_server, HttpServer};
pub use state::ServerState;
pub use ws::{start_ws_server, Route, WsServer};
