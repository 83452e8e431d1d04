use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use export_logging::export_info;
use serde::{Deserialize, Serialize};
use sitexport_core::{ConfigError, DestinationConfig, DestinationId};
use thiserror::Error;

use crate::fetch::FetchSettings;
use crate::store::Datastore;
use crate::{ErrorMode, StoreError};

/// Knobs of a single job execution.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportSettings {
    pub fetch: FetchSettings,
    pub errors: ErrorMode,
    /// Put every task back to pending when the job starts.
    pub reset: bool,
}

/// A settings file: job settings plus the destinations to register.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    pub settings: ExportSettings,
    pub destinations: Vec<DestinationConfig>,
}

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to read settings {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse settings: {0}")]
    Parse(#[from] ron::error::SpannedError),
    #[error("invalid destination {title:?}: {source}")]
    Destination {
        title: String,
        #[source]
        source: ConfigError,
    },
}

pub fn parse_settings(text: &str) -> Result<ExportConfig, SettingsError> {
    let config: ExportConfig = ron::from_str(text)?;
    for destination in &config.destinations {
        destination
            .validate()
            .map_err(|source| SettingsError::Destination {
                title: destination.title.clone(),
                source,
            })?;
    }
    Ok(config)
}

pub fn load_settings(path: &Path) -> Result<ExportConfig, SettingsError> {
    let text = fs::read_to_string(path).map_err(|source| SettingsError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let config = parse_settings(&text)?;
    export_info!(
        "Loaded settings from {} ({} destinations)",
        path.display(),
        config.destinations.len()
    );
    Ok(config)
}

impl ExportConfig {
    /// Inserts the configured destinations missing from `store`, matching
    /// on title. Returns the ids of all configured destinations.
    pub fn register_destinations(
        &self,
        store: &Datastore,
    ) -> Result<Vec<DestinationId>, StoreError> {
        store.transaction(|data| {
            let mut ids = Vec::with_capacity(self.destinations.len());
            for config in &self.destinations {
                let id = match data.destination_by_title(&config.title) {
                    Some(existing) => existing.id(),
                    None => data.insert_destination(config.clone())?,
                };
                ids.push(id);
            }
            Ok(ids)
        })
    }
}
