//! The export engine: runs the tasks of one export and drains the
//! dependencies they reference.

use std::collections::BTreeSet;
use std::sync::Arc;

use export_logging::{export_debug, export_error, export_info, export_warn};
use sitexport_core::{
    ContentModel, Destination, Export, ExportId, ExportState, NullTokenIssuer, Task, TaskAction,
    TokenIssuer, AUTH_TOKEN_LIFETIME,
};
use url::Url;

use crate::config::ExportSettings;
use crate::events::{EventSink, NullEventSink};
use crate::exporter::{create_exporter, Exporter};
use crate::fetch::{Fetcher, ReqwestFetcher};
use crate::hooks::{DefaultHooks, ExportHooks};
use crate::links::{DependencyTracker, ExportPaths};
use crate::resource::ExportedResource;
use crate::store::Datastore;
use crate::{
    ErrorMode, ExportError, ExportEvent, JobOutcome, AUTH_TOKEN_HEADER, EXPORT_ID_HEADER,
};

/// Why the task loop stopped without an error.
enum LoopEnd {
    Finished,
    Halted,
}

/// Executes one export against its destination.
///
/// Tasks and dependencies are processed one at a time. Every state change is
/// committed through the [`Datastore`], and the export's persisted state is
/// re-read before each task so an external actor can stop the run.
pub struct ExportJob {
    export: ExportId,
    store: Datastore,
    paths: ExportPaths,
    tracker: DependencyTracker,
    exporter: Box<dyn Exporter>,
    exporter_open: bool,
    fetcher: Arc<dyn Fetcher>,
    events: Arc<dyn EventSink>,
    tokens: Arc<dyn TokenIssuer>,
    errors: ErrorMode,
    reset: bool,
}

impl ExportJob {
    /// Builds a job with the exporter configured for the export's
    /// destination. Configuration errors surface here, never mid-run.
    pub fn new(
        store: Datastore,
        export: ExportId,
        model: Arc<dyn ContentModel>,
        settings: &ExportSettings,
    ) -> Result<Self, ExportError> {
        let destination = target_destination(&store, export)?;
        let exporter = create_exporter(&destination, export)?;
        Self::build(store, export, destination, model, settings, exporter)
    }

    /// Builds a job writing through `exporter`, whatever the destination
    /// kind says.
    pub fn with_exporter(
        store: Datastore,
        export: ExportId,
        model: Arc<dyn ContentModel>,
        settings: &ExportSettings,
        exporter: Box<dyn Exporter>,
    ) -> Result<Self, ExportError> {
        let destination = target_destination(&store, export)?;
        Self::build(store, export, destination, model, settings, exporter)
    }

    fn build(
        store: Datastore,
        export: ExportId,
        destination: Destination,
        model: Arc<dyn ContentModel>,
        settings: &ExportSettings,
        exporter: Box<dyn Exporter>,
    ) -> Result<Self, ExportError> {
        destination.config().validate()?;

        Ok(Self {
            export,
            paths: ExportPaths::new(destination, model, Arc::new(DefaultHooks)),
            store,
            tracker: DependencyTracker::new(),
            exporter,
            exporter_open: false,
            fetcher: Arc::new(ReqwestFetcher::new(settings.fetch.clone())),
            events: Arc::new(NullEventSink),
            tokens: Arc::new(NullTokenIssuer),
            errors: settings.errors,
            reset: settings.reset,
        })
    }

    pub fn with_fetcher(mut self, fetcher: Arc<dyn Fetcher>) -> Self {
        self.fetcher = fetcher;
        self
    }

    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    pub fn with_token_issuer(mut self, tokens: Arc<dyn TokenIssuer>) -> Self {
        self.tokens = tokens;
        self
    }

    pub fn with_hooks(mut self, hooks: Arc<dyn ExportHooks>) -> Self {
        self.paths = self.paths.with_hooks(hooks);
        self
    }

    pub fn export_id(&self) -> ExportId {
        self.export
    }

    pub fn paths(&self) -> &ExportPaths {
        &self.paths
    }

    /// Dependencies discovered by the latest run, fetched or not.
    pub fn dependencies(&self) -> impl Iterator<Item = &Url> {
        self.tracker.dependencies()
    }

    /// Runs every pending task, then every discovered dependency.
    ///
    /// Returns `Err` only for job-level failures under [`ErrorMode::Raise`],
    /// or when the export cannot be started at all.
    pub async fn execute(&mut self) -> Result<JobOutcome, ExportError> {
        let auth_token = self.begin()?;
        // Each run rediscovers its dependencies from scratch.
        self.tracker = DependencyTracker::new();
        self.paths.forget_output_paths();
        export_info!(export = self.export; "Export started");
        self.emit(ExportEvent::ExportStarting {
            export: self.export,
        });

        let run = self.run(auth_token.as_deref()).await;
        // A successful run is only complete once the exporter has flushed.
        let run = match run {
            Ok(LoopEnd::Finished) => self.close_exporter().map(|()| LoopEnd::Finished),
            other => other,
        };

        let outcome = match run {
            Ok(LoopEnd::Finished) => self.complete().map(|()| JobOutcome::Completed),
            Ok(LoopEnd::Halted) => {
                export_info!(export = self.export; "Export halted");
                Ok(JobOutcome::Halted)
            }
            Err(error) => Err(error),
        };

        let outcome = match outcome {
            Ok(outcome) => Ok(outcome),
            Err(error) => {
                export_error!(export = self.export; "Export failed: {}", error);
                self.fail();
                self.emit(ExportEvent::ExportFailed {
                    export: self.export,
                    error: error.to_string(),
                });
                match self.errors {
                    ErrorMode::Raise => Err(error),
                    ErrorMode::Resume => Ok(JobOutcome::Failed(error.to_string())),
                }
            }
        };

        self.emit(ExportEvent::ExportEnded {
            export: self.export,
        });
        if self.exporter_open {
            if let Err(err) = self.close_exporter() {
                export_warn!(export = self.export; "Failed to close exporter: {}", err);
            }
        }
        outcome
    }

    /// `idle -> running`, committed before any work starts. Returns the auth
    /// token requests must carry.
    fn begin(&mut self) -> Result<Option<String>, ExportError> {
        let user = self
            .store
            .read(|data| data.export(self.export).map(Export::needs_auth_token))??;
        let issued = user.and_then(|user| self.tokens.issue_token(user, AUTH_TOKEN_LIFETIME));
        let location = self.exporter.location();
        let reset = self.reset;

        let begun = self.store.transaction(|data| {
            let export = data.export_mut(self.export)?;
            export.begin_run(reset, issued.clone())?;
            if location.is_some() {
                export.archive_path = location;
            }
            Ok::<_, ExportError>(export.auth_token().map(str::to_string))
        });
        if begun.is_err() {
            if let Some(token) = &issued {
                self.tokens.revoke_token(token);
            }
        }
        begun
    }

    async fn run(&mut self, auth_token: Option<&str>) -> Result<LoopEnd, ExportError> {
        self.exporter.open()?;
        self.exporter_open = true;

        let keys = self
            .store
            .read(|data| data.export(self.export).map(Export::task_keys))??;

        for key in keys {
            // Fresh read of the committed state: someone may have stopped us.
            let (state, task) = self.store.read(|data| {
                data.export(self.export)
                    .map(|export| (export.state(), export.task(&key).cloned()))
            })??;
            let Some(task) = task.filter(Task::is_pending) else {
                continue;
            };
            if state != ExportState::Running {
                return Ok(LoopEnd::Halted);
            }
            self.execute_task(task, auth_token).await?;
        }

        if self.tracker.has_dependencies() {
            self.export_dependencies(auth_token).await?;
        }
        Ok(LoopEnd::Finished)
    }

    async fn execute_task(
        &mut self,
        task: Task,
        auth_token: Option<&str>,
    ) -> Result<(), ExportError> {
        let key = task.key();
        self.emit(ExportEvent::TaskStarting {
            export: self.export,
            task: key.clone(),
        });

        let mut tags = BTreeSet::new();
        let error = match self.perform_task(&task, auth_token, &mut tags).await {
            Ok(()) => {
                self.emit(ExportEvent::TaskExecuted {
                    export: self.export,
                    task: key.clone(),
                });
                None
            }
            Err(error) if self.errors == ErrorMode::Raise => return Err(error),
            Err(error) => Some(error.to_string()),
        };

        self.store.transaction(|data| {
            let (export, destination) = data.export_with_destination_mut(self.export)?;
            let stored = export.task_mut(&key)?;
            match &error {
                Some(message) => stored.mark_failed(message.clone()),
                None => {
                    stored.mark_success();
                    destination.set_pending_task(key.item, &key.language, None);
                    destination.set_exported_content_tags(key.item, &key.language, tags);
                }
            }
            Ok::<_, ExportError>(())
        })?;

        match error {
            None => {
                export_info!(export = self.export; "Task {} {} succeeded", task.action, key);
                self.emit(ExportEvent::TaskSucceeded {
                    export: self.export,
                    task: key,
                });
            }
            Some(error) => {
                export_warn!(
                    export = self.export;
                    "Task {} {} failed: {}", task.action, key, error
                );
                self.emit(ExportEvent::TaskFailed {
                    export: self.export,
                    task: key,
                    error,
                });
            }
        }
        Ok(())
    }

    async fn perform_task(
        &mut self,
        task: &Task,
        auth_token: Option<&str>,
        tags: &mut BTreeSet<String>,
    ) -> Result<(), ExportError> {
        let urls = self.paths.export_urls(task.item, &task.language);
        if urls.is_empty() {
            return Err(ExportError::NoExportUrl(task.key()));
        }
        let headers = self.request_headers(auth_token);

        for url in urls {
            match task.action {
                TaskAction::Post => {
                    let mut resource =
                        ExportedResource::new(&self.paths, url, Some(task.language.clone()));
                    resource.open(self.fetcher.as_ref(), &headers).await?;
                    tags.extend(resource.cache_tags().iter().cloned());
                    resource.process(&mut self.tracker)?;

                    // A document is never also fetched as a dependency.
                    self.tracker.mark_document(resource.source_url());

                    self.exporter.write_file(
                        resource.export_path(),
                        resource.content(),
                        resource.content_type(),
                    )?;
                }
                TaskAction::Delete => {
                    let path = self.paths.export_path(&url, None, true);
                    self.exporter.remove_file(&path)?;
                }
            }
        }
        Ok(())
    }

    async fn export_dependencies(&mut self, auth_token: Option<&str>) -> Result<(), ExportError> {
        self.emit(ExportEvent::DependencyTransfersStarting {
            export: self.export,
            count: self.tracker.dependency_count(),
        });
        let headers = self.request_headers(auth_token);

        while let Some(url) = self.tracker.pop_pending() {
            let url_text = url.to_string();
            self.emit(ExportEvent::DependencyTransferStarting {
                export: self.export,
                url: url_text.clone(),
            });

            match self.export_dependency(url, &headers).await {
                Ok(()) => {
                    export_debug!(export = self.export; "Exported dependency {}", url_text);
                    self.emit(ExportEvent::DependencySucceeded {
                        export: self.export,
                        url: url_text,
                    });
                }
                Err(error) => {
                    export_warn!(export = self.export; "Dependency {} failed: {}", url_text, error);
                    self.emit(ExportEvent::DependencyFailed {
                        export: self.export,
                        url: url_text,
                        error: error.to_string(),
                    });
                    if self.errors == ErrorMode::Raise {
                        return Err(error);
                    }
                }
            }
        }
        Ok(())
    }

    async fn export_dependency(
        &mut self,
        url: Url,
        headers: &[(String, String)],
    ) -> Result<(), ExportError> {
        let mut resource = ExportedResource::new(&self.paths, url, None);
        resource.open(self.fetcher.as_ref(), headers).await?;
        resource.process(&mut self.tracker)?;
        self.exporter.write_file(
            resource.export_path(),
            resource.content(),
            resource.content_type(),
        )?;
        Ok(())
    }

    fn request_headers(&self, auth_token: Option<&str>) -> Vec<(String, String)> {
        let mut headers = vec![(EXPORT_ID_HEADER.to_string(), self.export.to_string())];
        if let Some(token) = auth_token {
            headers.push((AUTH_TOKEN_HEADER.to_string(), token.to_string()));
        }
        headers
    }

    /// `running -> completed`, revoking the run's auth token.
    fn complete(&mut self) -> Result<(), ExportError> {
        let token = self.store.transaction(|data| {
            let export = data.export_mut(self.export)?;
            if export.state() != ExportState::Running {
                // Stopped between the last task and now; leave it as is.
                return Ok::<_, ExportError>(None);
            }
            Ok(Some(export.complete()?))
        })?;

        match token {
            Some(token) => {
                if let Some(token) = token {
                    self.tokens.revoke_token(&token);
                }
                export_info!(export = self.export; "Export completed");
                self.emit(ExportEvent::ExportCompleted {
                    export: self.export,
                });
            }
            None => export_info!(export = self.export; "Export was stopped before completion"),
        }
        Ok(())
    }

    /// `running -> idle` after a job-level failure. An export that is no
    /// longer running keeps whatever state it was given.
    fn fail(&mut self) {
        let result = self.store.transaction(|data| {
            let export = data.export_mut(self.export)?;
            if export.state() == ExportState::Running {
                export.fail()?;
            }
            Ok::<_, ExportError>(())
        });
        if let Err(err) = result {
            export_error!(export = self.export; "Failed to record export failure: {}", err);
        }
    }

    fn close_exporter(&mut self) -> Result<(), ExportError> {
        self.exporter_open = false;
        self.exporter.close()?;
        Ok(())
    }

    fn emit(&self, event: ExportEvent) {
        self.events.emit(event);
    }
}

/// Snapshot of the destination `export` targets, taken once per job.
fn target_destination(store: &Datastore, export: ExportId) -> Result<Destination, ExportError> {
    let destination = store.read(|data| {
        let export = data.export(export)?;
        data.destination(export.destination()).cloned()
    })??;
    Ok(destination)
}
