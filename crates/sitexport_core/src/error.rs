use thiserror::Error;

use crate::{ContentKey, ExportState};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ModelError {
    #[error("invalid export action ({0}); should be one of post, delete")]
    InvalidAction(String),
    #[error("invalid invalidation scope: {0}")]
    InvalidScope(String),
    #[error("export has no task for {0}")]
    UnknownTask(ContentKey),
    #[error("invalid export state transition from {from} to {to}")]
    InvalidTransition { from: ExportState, to: ExportState },
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("destination is missing required field `{0}`")]
    MissingField(&'static str),
    #[error("destination kind `{0}` has no exporter implementation")]
    UnsupportedKind(String),
}
