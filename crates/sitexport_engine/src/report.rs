use std::sync::Arc;

use serde::Serialize;
use sitexport_core::{ContentModel, ExportId, ExportState, ItemId, TaskAction, TaskState};

use crate::hooks::{DefaultHooks, ExportHooks};
use crate::links::ExportPaths;
use crate::store::Datastore;
use crate::ExportError;

/// One task as shown to a user: what it is, how it went, and where the
/// content comes from and goes to.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskReport {
    pub item: ItemId,
    pub language: String,
    pub action: TaskAction,
    pub state: TaskState,
    pub error_message: Option<String>,
    pub source_url: Option<String>,
    pub export_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExportReport {
    pub export: ExportId,
    pub state: ExportState,
    pub progress: f64,
    pub tasks: Vec<TaskReport>,
}

impl ExportReport {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

/// Reports every task of `export`, in task key order.
pub fn task_reports(
    store: &Datastore,
    model: Arc<dyn ContentModel>,
    export: ExportId,
) -> Result<ExportReport, ExportError> {
    task_reports_with_hooks(store, model, Arc::new(DefaultHooks), export)
}

pub fn task_reports_with_hooks(
    store: &Datastore,
    model: Arc<dyn ContentModel>,
    hooks: Arc<dyn ExportHooks>,
    export: ExportId,
) -> Result<ExportReport, ExportError> {
    let (export, destination) = store.read(|data| {
        let export = data.export(export)?.clone();
        let destination = data.destination(export.destination())?.clone();
        Ok::<_, ExportError>((export, destination))
    })??;
    let paths = ExportPaths::new(destination, model, hooks);

    let tasks = export
        .tasks()
        .map(|task| {
            let source = paths.export_urls(task.item, &task.language).into_iter().next();
            TaskReport {
                item: task.item,
                language: task.language.clone(),
                action: task.action,
                state: task.state,
                error_message: task.error_message.clone(),
                export_url: source.as_ref().map(|url| paths.export_url(url, None)),
                source_url: source.map(String::from),
            }
        })
        .collect();

    Ok(ExportReport {
        export: export.id(),
        state: export.state(),
        progress: export.progress(),
        tasks,
    })
}
