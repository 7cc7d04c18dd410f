use devbridge_session::ProcessRegistry;

use crate::config::DevServerConfig;
use crate::files::ProjectFiles;

/// Everything the HTTP and WebSocket handlers share.
#[derive(Debug)]
pub struct ServerState {
    pub config: DevServerConfig,
    pub registry: ProcessRegistry,
    pub files: ProjectFiles,
}

impl ServerState {
    #[must_use]
    pub fn new(config: DevServerConfig) -> Self {
        let files = ProjectFiles::new(config.project_root.clone());
        Self {
            config,
            registry: ProcessRegistry::new(),
            files,
        }
    }
}
