//! CLI definitions for devbridge.

use std::path::PathBuf;

use clap::Parser;
use smol_str::SmolStr;

use crate::config::{ConfigError, DevServerConfig};

#[derive(Debug, Parser)]
#[command(
    name = "devbridge",
    version,
    about = "Local development server bridging a browser editor to language server, debugger and program processes",
    after_help = "Examples:\n  devbridge                          # serve the current directory\n  devbridge --project ./service      # serve another project\n  devbridge --http 0.0.0.0:8080 -v   # listen on all interfaces, debug logging"
)]
pub struct Cli {
    /// Project root served to the editor.
    #[arg(long, default_value = ".")]
    pub project: PathBuf,
    /// Configuration file (defaults to <project>/devbridge.toml).
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// HTTP API listen address (overrides the config file).
    #[arg(long)]
    pub http: Option<String>,
    /// WebSocket listen address (overrides the config file).
    #[arg(long)]
    pub ws: Option<String>,
    /// Debug-level logging.
    #[arg(long, short)]
    pub verbose: bool,
}

impl Cli {
    /// Loads the configuration and applies command-line overrides.
    pub fn load_config(&self) -> Result<DevServerConfig, ConfigError> {
        let project = self
            .project
            .canonicalize()
            .map_err(|source| ConfigError::Read {
                path: self.project.clone(),
                source,
            })?;
        let mut config = DevServerConfig::load(project, self.config.as_deref())?;
        if let Some(http) = &self.http {
            config.server.http_listen = SmolStr::new(http);
        }
        if let Some(ws) = &self.ws {
            config.server.ws_listen = SmolStr::new(ws);
        }
        Ok(config)
    }
}
