//! Config-crate error taxonomy, mirroring `loomsync_core::error`.

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Io,
    Parse,
    Invariant,
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse {path}: {reason}")]
    Parse { path: String, reason: String },

    #[error("invalid configuration: {0}")]
    Invariant(String),
}

impl ConfigError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ConfigError::Io(_) => ErrorKind::Io,
            ConfigError::Parse { .. } => ErrorKind::Parse,
            ConfigError::Invariant(_) => ErrorKind::Invariant,
        }
    }
}

pub type Result<T> = std::result::Result<T, ConfigError>;
