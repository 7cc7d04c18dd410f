//! `devbridge.toml` loading.

#![allow(missing_docs)]

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use devbridge_session::{
    AnalysisTool, DebugSessionConfig, DebuggerDialect, ExecOptions, ProcessSpec, ReadinessPolicy,
};
use serde::Deserialize;
use smol_str::SmolStr;
use thiserror::Error;

pub const CONFIG_FILE_NAME: &str = "devbridge.toml";
pub const DEFAULT_MAPPING_ARTIFACT: &str = ".devbridge/mappings.json";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(SmolStr),
}

#[derive(Debug, Clone)]
pub struct DevServerConfig {
    pub project_root: PathBuf,
    pub server: ServerConfig,
    pub tool: SmolStr,
    pub language_server: CommandConfig,
    pub debugger: DebuggerConfig,
    pub executable: ExecutableConfig,
    pub run_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub http_listen: SmolStr,
    pub ws_listen: SmolStr,
    pub ui_dir: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct CommandConfig {
    pub program: SmolStr,
    pub args: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct DebuggerConfig {
    pub command: CommandConfig,
    pub listen: SocketAddr,
    pub mapping_artifact: PathBuf,
    pub dialect: DebuggerDialect,
    pub readiness: ReadinessPolicy,
    pub rpc_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct ExecutableConfig {
    pub program: Option<SmolStr>,
    pub args: Vec<String>,
    pub kill_grace: Duration,
}

impl DevServerConfig {
    /// Loads `path`, or `<root>/devbridge.toml` when present, or defaults.
    pub fn load(project_root: impl Into<PathBuf>, path: Option<&Path>) -> Result<Self, ConfigError> {
        let project_root = project_root.into();
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => {
                let candidate = project_root.join(CONFIG_FILE_NAME);
                if !candidate.is_file() {
                    return Self::from_toml_str(project_root, "");
                }
                candidate
            }
        };
        let text = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.clone(),
            source,
        })?;
        let raw: DevBridgeToml =
            toml::from_str(&text).map_err(|source| ConfigError::Parse { path, source })?;
        raw.into_config(project_root)
    }

    pub fn from_toml_str(project_root: impl Into<PathBuf>, text: &str) -> Result<Self, ConfigError> {
        let raw: DevBridgeToml = toml::from_str(text).map_err(|source| ConfigError::Parse {
            path: PathBuf::from(CONFIG_FILE_NAME),
            source,
        })?;
        raw.into_config(project_root.into())
    }

    #[must_use]
    pub fn language_server_spec(&self) -> ProcessSpec {
        ProcessSpec::new(self.language_server.program.clone())
            .args(self.language_server.args.iter().cloned())
            .cwd(&self.project_root)
    }

    /// The debugger command line, with `--listen` added unless configured.
    #[must_use]
    pub fn debugger_spec(&self) -> ProcessSpec {
        let command = &self.debugger.command;
        let mut spec = ProcessSpec::new(command.program.clone())
            .args(command.args.iter().cloned())
            .cwd(&self.project_root);
        if !command.args.iter().any(|arg| arg.starts_with("--listen")) {
            spec = spec.arg(format!("--listen={}", self.debugger.listen));
        }
        spec
    }

    #[must_use]
    pub fn debug_session_config(&self) -> DebugSessionConfig {
        DebugSessionConfig {
            spec: self.debugger_spec(),
            address: self.debugger.listen,
            readiness: self.debugger.readiness,
            mapping_artifact: self.debugger.mapping_artifact.clone(),
            dialect: self.debugger.dialect.clone(),
            rpc_timeout: self.debugger.rpc_timeout,
        }
    }

    /// The monitored executable; `args` replaces the configured arguments.
    pub fn executable_spec(&self, args: Option<Vec<String>>) -> Result<ProcessSpec, ConfigError> {
        let program = self.executable.program.clone().ok_or_else(|| {
            ConfigError::Invalid("executable.program is not configured".into())
        })?;
        let args = args.unwrap_or_else(|| self.executable.args.clone());
        Ok(ProcessSpec::new(program)
            .args(args)
            .cwd(&self.project_root))
    }

    #[must_use]
    pub fn exec_options(&self) -> ExecOptions {
        ExecOptions {
            kill_grace: self.executable.kill_grace,
            ..ExecOptions::default()
        }
    }

    #[must_use]
    pub fn analysis_tool(&self) -> AnalysisTool {
        let mut tool = AnalysisTool::new(self.tool.clone(), &self.project_root);
        tool.timeout = self.run_timeout;
        tool
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct DevBridgeToml {
    #[serde(default)]
    server: ServerSection,
    #[serde(default)]
    tool: ToolSection,
    #[serde(default)]
    language_server: CommandSection,
    #[serde(default)]
    debugger: DebuggerSection,
    #[serde(default)]
    executable: ExecutableSection,
    #[serde(default)]
    run: RunSection,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ServerSection {
    http_listen: Option<String>,
    ws_listen: Option<String>,
    ui_dir: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ToolSection {
    program: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct CommandSection {
    program: Option<String>,
    args: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct DebuggerSection {
    program: Option<String>,
    args: Option<Vec<String>>,
    listen: Option<String>,
    mapping_artifact: Option<PathBuf>,
    api_version: Option<u32>,
    substitute_path_method: Option<String>,
    ready_interval_ms: Option<u64>,
    ready_timeout_ms: Option<u64>,
    rpc_timeout_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ExecutableSection {
    program: Option<String>,
    args: Option<Vec<String>>,
    kill_grace_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RunSection {
    timeout_ms: Option<u64>,
}

fn default_debugger_args() -> Vec<String> {
    ["debug", "--headless", "--api-version=2", "--accept-multiclient"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn millis(value: Option<u64>, default: u64, field: &str) -> Result<Duration, ConfigError> {
    match value.unwrap_or(default) {
        0 => Err(ConfigError::Invalid(format!("{field} must be greater than 0").into())),
        ms => Ok(Duration::from_millis(ms)),
    }
}

fn program(value: Option<String>, default: &str, field: &str) -> Result<SmolStr, ConfigError> {
    let program = value.unwrap_or_else(|| default.to_string());
    if program.trim().is_empty() {
        return Err(ConfigError::Invalid(format!("{field} must not be empty").into()));
    }
    Ok(SmolStr::new(program))
}

impl DevBridgeToml {
    fn into_config(self, project_root: PathBuf) -> Result<DevServerConfig, ConfigError> {
        let listen_text = self
            .debugger
            .listen
            .unwrap_or_else(|| "127.0.0.1:2345".to_string());
        let listen = listen_text.parse::<SocketAddr>().map_err(|err| {
            ConfigError::Invalid(format!("debugger.listen '{listen_text}': {err}").into())
        })?;

        let mapping_artifact = self
            .debugger
            .mapping_artifact
            .unwrap_or_else(|| PathBuf::from(DEFAULT_MAPPING_ARTIFACT));
        let mapping_artifact = if mapping_artifact.is_absolute() {
            mapping_artifact
        } else {
            project_root.join(mapping_artifact)
        };

        let readiness = ReadinessPolicy {
            interval: millis(self.debugger.ready_interval_ms, 100, "debugger.ready_interval_ms")?,
            timeout: millis(self.debugger.ready_timeout_ms, 2000, "debugger.ready_timeout_ms")?,
        };
        let default_dialect = DebuggerDialect::default();
        let dialect = DebuggerDialect {
            // 0 disables the version directive.
            api_version: match self.debugger.api_version {
                Some(0) => None,
                Some(version) => Some(version),
                None => default_dialect.api_version,
            },
            substitute_path_method: self
                .debugger
                .substitute_path_method
                .map_or(default_dialect.substitute_path_method, SmolStr::new),
        };

        let executable_program = match self.executable.program {
            Some(program) if program.trim().is_empty() => {
                return Err(ConfigError::Invalid(
                    "executable.program must not be empty".into(),
                ))
            }
            other => other.map(SmolStr::new),
        };

        let ui_dir = self.server.ui_dir.map(|dir| {
            if dir.is_absolute() {
                dir
            } else {
                project_root.join(dir)
            }
        });

        Ok(DevServerConfig {
            server: ServerConfig {
                http_listen: SmolStr::new(
                    self.server
                        .http_listen
                        .as_deref()
                        .unwrap_or("127.0.0.1:8080"),
                ),
                ws_listen: SmolStr::new(self.server.ws_listen.as_deref().unwrap_or("127.0.0.1:8081")),
                ui_dir,
            },
            tool: program(self.tool.program, "gotool", "tool.program")?,
            language_server: CommandConfig {
                program: program(
                    self.language_server.program,
                    "gopls",
                    "language_server.program",
                )?,
                args: self.language_server.args.unwrap_or_default(),
            },
            debugger: DebuggerConfig {
                command: CommandConfig {
                    program: program(self.debugger.program, "dlv", "debugger.program")?,
                    args: self.debugger.args.unwrap_or_else(default_debugger_args),
                },
                listen,
                mapping_artifact,
                dialect,
                readiness,
                rpc_timeout: millis(self.debugger.rpc_timeout_ms, 5000, "debugger.rpc_timeout_ms")?,
            },
            executable: ExecutableConfig {
                program: executable_program,
                args: self.executable.args.unwrap_or_default(),
                kill_grace: millis(self.executable.kill_grace_ms, 200, "executable.kill_grace_ms")?,
            },
            run_timeout: millis(self.run.timeout_ms, 10_000, "run.timeout_ms")?,
            project_root,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_yields_defaults() {
        let config = DevServerConfig::from_toml_str("/work/project", "").unwrap();
        assert_eq!(config.server.http_listen, "127.0.0.1:8080");
        assert_eq!(config.server.ws_listen, "127.0.0.1:8081");
        assert_eq!(config.tool, "gotool");
        assert_eq!(config.language_server.program, "gopls");
        assert_eq!(config.debugger.listen.port(), 2345);
        assert_eq!(
            config.debugger.mapping_artifact,
            PathBuf::from("/work/project/.devbridge/mappings.json")
        );
        assert_eq!(config.debugger.readiness, ReadinessPolicy::default());
        assert_eq!(config.debugger.dialect, DebuggerDialect::default());
        assert_eq!(config.executable.kill_grace, Duration::from_millis(200));
        assert_eq!(config.run_timeout, Duration::from_secs(10));
        assert!(config.executable.program.is_none());
    }

    #[test]
    fn sections_override_defaults() {
        let text = r#"
[server]
http_listen = "0.0.0.0:9000"
ui_dir = "ui"

[debugger]
program = "/opt/dlv"
args = ["exec", "./bin/app", "--headless", "--listen=127.0.0.1:4000"]
listen = "127.0.0.1:4000"
api_version = 0
ready_timeout_ms = 500

[executable]
program = "./bin/app"
args = ["-v"]
"#;
        let config = DevServerConfig::from_toml_str("/p", text).unwrap();
        assert_eq!(config.server.http_listen, "0.0.0.0:9000");
        assert_eq!(config.server.ui_dir, Some(PathBuf::from("/p/ui")));
        assert_eq!(config.debugger.dialect.api_version, None);
        assert_eq!(config.debugger.readiness.timeout, Duration::from_millis(500));

        let spec = config.debugger_spec();
        assert_eq!(spec.program, "/opt/dlv");
        assert_eq!(
            spec.args.iter().filter(|arg| arg.starts_with("--listen")).count(),
            1
        );

        let exec = config.executable_spec(None).unwrap();
        assert_eq!(exec.args, ["-v"]);
        let exec = config
            .executable_spec(Some(vec!["--fast".to_string()]))
            .unwrap();
        assert_eq!(exec.args, ["--fast"]);
    }

    #[test]
    fn default_debugger_listens_on_configured_address() {
        let config = DevServerConfig::from_toml_str("/p", "").unwrap();
        let spec = config.debugger_spec();
        assert_eq!(spec.args.last().map(String::as_str), Some("--listen=127.0.0.1:2345"));
    }

    #[test]
    fn invalid_values_are_rejected() {
        let err = DevServerConfig::from_toml_str("/p", "[debugger]\nlisten = \"nowhere\"\n")
            .unwrap_err();
        assert!(err.to_string().contains("debugger.listen"));

        let err =
            DevServerConfig::from_toml_str("/p", "[run]\ntimeout_ms = 0\n").unwrap_err();
        assert!(err.to_string().contains("run.timeout_ms"));

        let err = DevServerConfig::from_toml_str("/p", "[server]\nport = 1\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn unconfigured_executable_is_an_error() {
        let config = DevServerConfig::from_toml_str("/p", "").unwrap();
        assert!(config.executable_spec(None).is_err());
    }
}
