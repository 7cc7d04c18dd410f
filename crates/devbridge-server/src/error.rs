//! Server errors.

#![allow(missing_docs)]

use smol_str::SmolStr;
use thiserror::Error;

use crate::config::ConfigError;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind {listen}: {message}")]
    Bind { listen: SmolStr, message: SmolStr },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}
