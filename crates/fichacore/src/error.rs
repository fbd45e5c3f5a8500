use crate::model::RecordStatus;
use crate::status::StatusAction;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FichaError {
    #[error("Ficha {0} failed structural validation")]
    StructuralInvariant(String),

    #[error("Invalid transition: cannot {action} a ficha that is {from}")]
    InvalidTransition {
        from: RecordStatus,
        action: StatusAction,
    },

    #[error("Resource limit exceeded: {0}")]
    ResourceLimit(String),

    #[error("Degraded mode active: {0}")]
    Degraded(String),

    #[error("Section not found: {0}")]
    SectionNotFound(String),

    #[error("Ficha already exists: {0}")]
    AlreadyExists(String),

    #[error("Invalid ficha id: {0:?}")]
    InvalidId(String),

    #[error("Ficha is not open: {0}")]
    FichaNotOpen(String),

    #[error("Ficha is read-only while {0}")]
    ReadOnly(RecordStatus),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Worker error: {0}")]
    Worker(String),
}

pub type Result<T> = std::result::Result<T, FichaError>;
