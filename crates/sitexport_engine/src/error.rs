use std::io;
use std::path::PathBuf;

use sitexport_core::{ConfigError, ContentKey, DestinationId, ExportId, ModelError};
use thiserror::Error;

use crate::decode::DecodeError;
use crate::persist::PersistError;
use crate::FetchError;

#[derive(Debug, Error)]
pub enum ExporterError {
    #[error("exporter is not open")]
    NotOpen,
    #[error("invalid export path {0:?}")]
    InvalidPath(Vec<String>),
    #[error("{0} exporter cannot remove files")]
    RemoveUnsupported(&'static str),
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Persist(#[from] PersistError),
    #[error("archive error: {0}")]
    Archive(#[from] zip::result::ZipError),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("no export with id {0}")]
    UnknownExport(ExportId),
    #[error("no destination with id {0}")]
    UnknownDestination(DestinationId),
    #[error("a destination titled {0:?} already exists")]
    DuplicateTitle(String),
    #[error("store lock poisoned")]
    Poisoned,
    #[error("failed to read store {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse store: {0}")]
    Parse(#[from] ron::error::SpannedError),
    #[error("failed to serialize store: {0}")]
    Serialize(#[from] ron::Error),
    #[error(transparent)]
    Persist(#[from] PersistError),
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Any failure an export job can run into. Its `Display` is what a failed
/// task records as its error message.
#[derive(Debug, Error)]
pub enum ExportError {
    #[error("fetch failed: {0}")]
    Fetch(#[from] FetchError),
    #[error("decode failed: {0}")]
    Decode(#[from] DecodeError),
    #[error("exporter failed: {0}")]
    Exporter(#[from] ExporterError),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("no url to export for {0}")]
    NoExportUrl(ContentKey),
}
