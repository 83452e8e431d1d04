//! Transactional persistence of exports and destinations.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use export_logging::{export_debug, export_info};
use serde::{Deserialize, Serialize};
use sitexport_core::{
    Destination, DestinationConfig, DestinationId, Export, ExportId, ExportState,
};

use crate::persist::AtomicFileWriter;
use crate::StoreError;

/// Everything the exporter persists.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreData {
    exports: BTreeMap<ExportId, Export>,
    destinations: BTreeMap<DestinationId, Destination>,
    next_export_id: ExportId,
    next_destination_id: DestinationId,
}

impl StoreData {
    pub fn export(&self, id: ExportId) -> Result<&Export, StoreError> {
        self.exports.get(&id).ok_or(StoreError::UnknownExport(id))
    }

    pub fn export_mut(&mut self, id: ExportId) -> Result<&mut Export, StoreError> {
        self.exports.get_mut(&id).ok_or(StoreError::UnknownExport(id))
    }

    pub fn exports(&self) -> impl Iterator<Item = &Export> {
        self.exports.values()
    }

    pub fn destination(&self, id: DestinationId) -> Result<&Destination, StoreError> {
        self.destinations
            .get(&id)
            .ok_or(StoreError::UnknownDestination(id))
    }

    pub fn destination_mut(&mut self, id: DestinationId) -> Result<&mut Destination, StoreError> {
        self.destinations
            .get_mut(&id)
            .ok_or(StoreError::UnknownDestination(id))
    }

    pub fn destinations(&self) -> impl Iterator<Item = &Destination> {
        self.destinations.values()
    }

    pub fn destinations_mut(&mut self) -> impl Iterator<Item = &mut Destination> {
        self.destinations.values_mut()
    }

    pub fn destination_by_title(&self, title: &str) -> Option<&Destination> {
        self.destinations
            .values()
            .find(|destination| destination.title() == title)
    }

    /// An export together with the destination it targets, both mutable.
    pub fn export_with_destination_mut(
        &mut self,
        id: ExportId,
    ) -> Result<(&mut Export, &mut Destination), StoreError> {
        let export = self.exports.get_mut(&id).ok_or(StoreError::UnknownExport(id))?;
        let destination_id = export.destination();
        let destination = self
            .destinations
            .get_mut(&destination_id)
            .ok_or(StoreError::UnknownDestination(destination_id))?;
        Ok((export, destination))
    }

    /// Titles are unique among destinations.
    pub fn insert_destination(
        &mut self,
        config: DestinationConfig,
    ) -> Result<DestinationId, StoreError> {
        if self.destination_by_title(&config.title).is_some() {
            return Err(StoreError::DuplicateTitle(config.title));
        }
        self.next_destination_id += 1;
        let id = self.next_destination_id;
        self.destinations.insert(id, Destination::new(id, config)?);
        Ok(id)
    }

    pub fn create_export(&mut self, destination: DestinationId) -> Result<ExportId, StoreError> {
        self.destination(destination)?;
        self.next_export_id += 1;
        let id = self.next_export_id;
        self.exports.insert(id, Export::new(id, destination));
        Ok(id)
    }
}

/// Shared handle on the persisted state.
///
/// All changes go through [`Datastore::transaction`]: the closure works on
/// a copy that replaces the committed state only if it returns `Ok`, and
/// file-backed stores write the new snapshot before committing it.
#[derive(Debug, Clone)]
pub struct Datastore {
    inner: Arc<Mutex<StoreData>>,
    file: Option<PathBuf>,
}

impl Datastore {
    pub fn in_memory() -> Self {
        Self {
            inner: Arc::new(Mutex::new(StoreData::default())),
            file: None,
        }
    }

    /// Loads the RON snapshot at `path`, or starts empty if there is none.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let data = match fs::read_to_string(&path) {
            Ok(text) => {
                export_info!("Loaded export store from {}", path.display());
                ron::from_str(&text)?
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => StoreData::default(),
            Err(source) => return Err(StoreError::Read { path, source }),
        };
        Ok(Self {
            inner: Arc::new(Mutex::new(data)),
            file: Some(path),
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.file.as_deref()
    }

    /// Observes the latest committed state.
    pub fn read<T>(&self, f: impl FnOnce(&StoreData) -> T) -> Result<T, StoreError> {
        let data = self.inner.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(f(&data))
    }

    pub fn snapshot(&self) -> Result<StoreData, StoreError> {
        self.read(StoreData::clone)
    }

    pub fn transaction<T, E>(&self, f: impl FnOnce(&mut StoreData) -> Result<T, E>) -> Result<T, E>
    where
        E: From<StoreError>,
    {
        let mut committed = self.inner.lock().map_err(|_| StoreError::Poisoned)?;
        let mut working = committed.clone();
        let value = f(&mut working)?;
        if let Some(path) = &self.file {
            write_snapshot(path, &working)?;
        }
        *committed = working;
        Ok(value)
    }

    pub fn insert_destination(
        &self,
        config: DestinationConfig,
    ) -> Result<DestinationId, StoreError> {
        self.transaction(|data| data.insert_destination(config))
    }

    pub fn create_export(&self, destination: DestinationId) -> Result<ExportId, StoreError> {
        self.transaction(|data| data.create_export(destination))
    }

    pub fn export(&self, id: ExportId) -> Result<Export, StoreError> {
        self.read(|data| data.export(id).cloned())?
    }

    pub fn destination(&self, id: DestinationId) -> Result<Destination, StoreError> {
        self.read(|data| data.destination(id).cloned())?
    }

    pub fn export_state(&self, id: ExportId) -> Result<ExportState, StoreError> {
        self.read(|data| data.export(id).map(Export::state))?
    }

    /// Stops a running export; its job halts before the next task.
    pub fn cancel_export(&self, id: ExportId) -> Result<(), StoreError> {
        self.transaction(|data| {
            data.export_mut(id)?.cancel()?;
            Ok::<_, StoreError>(())
        })
    }
}

fn write_snapshot(path: &Path, data: &StoreData) -> Result<(), StoreError> {
    let content = ron::ser::to_string_pretty(data, ron::ser::PrettyConfig::new())?;
    let folder = match path.parent().filter(|p| !p.as_os_str().is_empty()) {
        Some(folder) => folder.to_path_buf(),
        None => PathBuf::from("."),
    };
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "exports.ron".to_string());
    AtomicFileWriter::new(folder).write(&file_name, content.as_bytes())?;
    export_debug!("Saved export store to {}", path.display());
    Ok(())
}
