//! Site export engine: fetches rendered pages, rewrites their links and
//! hands the results to a destination's exporter.
mod config;
mod decode;
mod error;
mod events;
mod exporter;
mod fetch;
mod hooks;
mod invalidation;
mod job;
mod links;
mod persist;
mod report;
mod resource;
mod rewrite;
mod runner;
mod store;
mod types;

pub use config::{load_settings, parse_settings, ExportConfig, ExportSettings, SettingsError};
pub use decode::{decode_text, DecodeError, DecodedText};
pub use error::{ExportError, ExporterError, StoreError};
pub use events::{ChannelEventSink, CollectingEventSink, EventSink, NullEventSink};
pub use exporter::{
    create_exporter, Exporter, FolderExporter, MemoryExporter, StoredFile, ZipExporter,
};
pub use fetch::{FetchRequest, FetchSettings, Fetcher, ReqwestFetcher};
pub use hooks::{DefaultHooks, ExportHooks};
pub use invalidation::{ContentChange, InvalidationHandler};
pub use job::ExportJob;
pub use links::{base_url, DependencyTracker, ExportPaths, ResourceLinks};
pub use persist::{ensure_output_dir, AtomicFileWriter, PersistError};
pub use report::{task_reports, task_reports_with_hooks, ExportReport, TaskReport};
pub use resource::ExportedResource;
pub use rewrite::{rewrite_css, rewrite_html, rewrite_script, UrlRewriter};
pub use runner::{ExportRunner, RunnerEvent};
pub use store::{Datastore, StoreData};
pub use types::{
    ErrorMode, ExportEvent, FailureKind, FetchError, FetchMetadata, FetchOutput, JobOutcome,
    AUTH_TOKEN_HEADER, CACHE_TAGS_HEADER, EXPORT_ID_HEADER, USER_AGENT,
};
