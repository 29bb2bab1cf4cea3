use thiserror::Error;

/// Coarse failure category, independent of the specific error variant.
///
/// Orchestration layers (the sync engine, the dispatcher, session
/// admission) branch on this rather than matching error variants directly,
/// so new variants can be added without touching call sites that only
/// care about retry/degrade/surface behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Io,
    Parse,
    Protocol,
    Conflict,
    Capacity,
    Invariant,
    NotFound,
}

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("source conversion rejected {path}: {reason}")]
    Parse { path: String, reason: String },

    #[error("IR record not found: {0}")]
    NotFound(String),

    #[error("conflict detected for id {0}")]
    Conflict(String),

    #[error("capacity exceeded: {0}")]
    Capacity(String),

    #[error("invariant violation: {0}")]
    Invariant(String),

    #[error("read-only in current mode: {framework} ({mode})")]
    ReadOnlyInMode { framework: String, mode: String },

    #[error("internal error: {0}")]
    Internal(String),
}

impl CoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CoreError::Io(_) => ErrorKind::Io,
            CoreError::Serialization(_) => ErrorKind::Parse,
            CoreError::Parse { .. } => ErrorKind::Parse,
            CoreError::NotFound(_) => ErrorKind::NotFound,
            CoreError::Conflict(_) => ErrorKind::Conflict,
            CoreError::Capacity(_) => ErrorKind::Capacity,
            CoreError::Invariant(_) => ErrorKind::Invariant,
            CoreError::ReadOnlyInMode { .. } => ErrorKind::Invariant,
            CoreError::Internal(_) => ErrorKind::Invariant,
        }
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
