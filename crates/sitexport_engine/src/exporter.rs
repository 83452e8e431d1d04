//! Backends that receive exported files.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use export_logging::{export_debug, export_info};
use sitexport_core::{ConfigError, Destination, DestinationKind, ExportId};
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

use crate::persist::{ensure_output_dir, AtomicFileWriter};
use crate::ExporterError;

/// Write/remove capability behind a destination.
///
/// `open` is called once before the first write and `close` exactly once
/// when the job ends, whatever the outcome.
pub trait Exporter: Send {
    fn open(&mut self) -> Result<(), ExporterError> {
        Ok(())
    }

    fn close(&mut self) -> Result<(), ExporterError> {
        Ok(())
    }

    fn write_file(
        &mut self,
        path: &[String],
        content: &[u8],
        content_type: Option<&str>,
    ) -> Result<(), ExporterError>;

    fn remove_file(&mut self, path: &[String]) -> Result<(), ExporterError>;

    /// File the exporter produces as a whole, such as an archive.
    fn location(&self) -> Option<PathBuf> {
        None
    }
}

/// Builds the exporter configured for `destination`. Object store
/// destinations have no built-in client and must be given one explicitly.
pub fn create_exporter(
    destination: &Destination,
    export: ExportId,
) -> Result<Box<dyn Exporter>, ConfigError> {
    match &destination.config().kind {
        DestinationKind::Folder {
            root_folder: Some(root),
        } => Ok(Box::new(FolderExporter::new(root.clone()))),
        DestinationKind::Folder { root_folder: None } => {
            Err(ConfigError::MissingField("root_folder"))
        }
        DestinationKind::Zip { zip_folder } => {
            let folder = zip_folder
                .clone()
                .unwrap_or_else(|| PathBuf::from("zip-exports"));
            Ok(Box::new(ZipExporter::new(folder.join(format!("{export}.zip")))))
        }
        DestinationKind::Memory => Ok(Box::new(MemoryExporter::new())),
        kind @ DestinationKind::ObjectStore { .. } => {
            Err(ConfigError::UnsupportedKind(kind.name().to_string()))
        }
    }
}

/// Rejects segments that would escape the export root or that no file
/// system can store.
fn checked_segments(path: &[String]) -> Result<(), ExporterError> {
    let invalid = path.is_empty()
        || path.iter().any(|segment| {
            segment.is_empty()
                || segment == "."
                || segment == ".."
                || segment.contains(['/', '\\', '\0'])
        });
    if invalid {
        return Err(ExporterError::InvalidPath(path.to_vec()));
    }
    Ok(())
}

/// Writes each file below a root folder, replacing files atomically.
#[derive(Debug)]
pub struct FolderExporter {
    root: PathBuf,
}

impl FolderExporter {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn file_path(&self, path: &[String]) -> PathBuf {
        path.iter().fold(self.root.clone(), |acc, segment| acc.join(segment))
    }
}

impl Exporter for FolderExporter {
    fn open(&mut self) -> Result<(), ExporterError> {
        ensure_output_dir(&self.root)?;
        Ok(())
    }

    fn write_file(
        &mut self,
        path: &[String],
        content: &[u8],
        _content_type: Option<&str>,
    ) -> Result<(), ExporterError> {
        checked_segments(path)?;
        let (file_name, folders) = match path.split_last() {
            Some(parts) => parts,
            None => return Err(ExporterError::InvalidPath(Vec::new())),
        };
        let folder = folders
            .iter()
            .fold(self.root.clone(), |acc, segment| acc.join(segment));
        let target = AtomicFileWriter::new(folder).write(file_name, content)?;
        export_debug!("Wrote {} bytes to {}", content.len(), target.display());
        Ok(())
    }

    fn remove_file(&mut self, path: &[String]) -> Result<(), ExporterError> {
        checked_segments(path)?;
        let target = self.file_path(path);
        match fs::remove_file(&target) {
            Ok(()) => {
                export_debug!("Removed {}", target.display());
                Ok(())
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(ExporterError::Io {
                path: target,
                source,
            }),
        }
    }
}

/// Packs every exported file into a single ZIP archive.
pub struct ZipExporter {
    path: PathBuf,
    writer: Option<ZipWriter<File>>,
}

impl ZipExporter {
    pub fn new(path: PathBuf) -> Self {
        Self { path, writer: None }
    }

    fn io_error(&self, source: io::Error) -> ExporterError {
        ExporterError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

impl Exporter for ZipExporter {
    fn open(&mut self) -> Result<(), ExporterError> {
        if let Some(folder) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            ensure_output_dir(folder)?;
        }
        let file = File::create(&self.path).map_err(|err| self.io_error(err))?;
        self.writer = Some(ZipWriter::new(file));
        export_info!("Writing archive {}", self.path.display());
        Ok(())
    }

    fn close(&mut self) -> Result<(), ExporterError> {
        if let Some(writer) = self.writer.take() {
            let mut file = writer.finish()?;
            file.flush().map_err(|err| self.io_error(err))?;
        }
        Ok(())
    }

    fn write_file(
        &mut self,
        path: &[String],
        content: &[u8],
        _content_type: Option<&str>,
    ) -> Result<(), ExporterError> {
        checked_segments(path)?;
        let writer = self.writer.as_mut().ok_or(ExporterError::NotOpen)?;
        let options =
            SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);
        writer.start_file(path.join("/"), options)?;
        if let Err(err) = writer.write_all(content) {
            return Err(self.io_error(err));
        }
        Ok(())
    }

    fn remove_file(&mut self, _path: &[String]) -> Result<(), ExporterError> {
        Err(ExporterError::RemoveUnsupported("zip"))
    }

    fn location(&self) -> Option<PathBuf> {
        Some(self.path.clone())
    }
}

/// A file held by a [`MemoryExporter`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredFile {
    pub content: Vec<u8>,
    pub content_type: Option<String>,
}

#[derive(Debug, Default)]
struct MemoryState {
    files: BTreeMap<String, StoredFile>,
    removed: Vec<String>,
    opened: usize,
    closed: usize,
    open: bool,
}

/// Keeps exported files in memory. Clones share the same storage, so a
/// test can keep one handle and give another to the job.
#[derive(Debug, Default, Clone)]
pub struct MemoryExporter {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryExporter {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        // The state stays consistent even if a holder panicked.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Content of the file at `path` (segments joined with `/`).
    pub fn file(&self, path: &str) -> Option<StoredFile> {
        self.state().files.get(path).cloned()
    }

    pub fn paths(&self) -> Vec<String> {
        self.state().files.keys().cloned().collect()
    }

    pub fn removed(&self) -> Vec<String> {
        self.state().removed.clone()
    }

    pub fn open_count(&self) -> usize {
        self.state().opened
    }

    pub fn close_count(&self) -> usize {
        self.state().closed
    }

    pub fn is_open(&self) -> bool {
        self.state().open
    }
}

impl Exporter for MemoryExporter {
    fn open(&mut self) -> Result<(), ExporterError> {
        let mut state = self.state();
        state.opened += 1;
        state.open = true;
        Ok(())
    }

    fn close(&mut self) -> Result<(), ExporterError> {
        let mut state = self.state();
        state.closed += 1;
        state.open = false;
        Ok(())
    }

    fn write_file(
        &mut self,
        path: &[String],
        content: &[u8],
        content_type: Option<&str>,
    ) -> Result<(), ExporterError> {
        checked_segments(path)?;
        let mut state = self.state();
        if !state.open {
            return Err(ExporterError::NotOpen);
        }
        state.files.insert(
            path.join("/"),
            StoredFile {
                content: content.to_vec(),
                content_type: content_type.map(str::to_string),
            },
        );
        Ok(())
    }

    fn remove_file(&mut self, path: &[String]) -> Result<(), ExporterError> {
        checked_segments(path)?;
        let mut state = self.state();
        if !state.open {
            return Err(ExporterError::NotOpen);
        }
        let key = path.join("/");
        state.files.remove(&key);
        state.removed.push(key);
        Ok(())
    }
}
