use std::sync::Arc;

use pretty_assertions::assert_eq;
use sitexport_core::{
    ContentKey, DestinationConfig, DestinationKind, ExportState, StaticContentModel, TaskAction,
    TaskState,
};
use sitexport_engine::{task_reports, Datastore, StoreError, TaskReport};
use url::Url;

#[test]
fn reports_list_tasks_with_their_urls() {
    let store = Datastore::in_memory();
    let mut config = DestinationConfig::new(
        "public",
        DestinationKind::Folder {
            root_folder: Some("/srv/public".into()),
        },
    );
    config.url = Some(Url::parse("https://www.example.test/").unwrap());
    let destination = store.insert_destination(config).unwrap();
    let export = store.create_export(destination).unwrap();
    store
        .transaction(|data| {
            let export = data.export_mut(export)?;
            export.add_task(TaskAction::Post, 1, "en");
            export.add_task(TaskAction::Delete, 2, "en");
            export.task_mut(&ContentKey::new(1, "en"))?.mark_success();
            export
                .task_mut(&ContentKey::new(2, "en"))?
                .mark_failed("exporter failed: boom");
            Ok::<_, StoreError>(())
        })
        .unwrap();

    let model = StaticContentModel::new(Url::parse("http://cms.test").unwrap())
        .with_page(1, "en", "/articles/foo", Some("text/html"));
    let report = task_reports(&store, Arc::new(model), export).unwrap();

    assert_eq!(report.export, export);
    assert_eq!(report.state, ExportState::Idle);
    assert_eq!(report.progress, 1.0);
    assert_eq!(
        report.tasks,
        vec![
            TaskReport {
                item: 1,
                language: "en".into(),
                action: TaskAction::Post,
                state: TaskState::Success,
                error_message: None,
                source_url: Some("http://cms.test/articles/foo".into()),
                export_url: Some("https://www.example.test/articles/foo.html".into()),
            },
            TaskReport {
                item: 2,
                language: "en".into(),
                action: TaskAction::Delete,
                state: TaskState::Failed,
                error_message: Some("exporter failed: boom".into()),
                source_url: None,
                export_url: None,
            },
        ]
    );

    let json: serde_json::Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();
    assert_eq!(json["state"], "idle");
    assert_eq!(json["tasks"][0]["action"], "post");
    assert_eq!(json["tasks"][1]["state"], "failed");
    assert_eq!(json["tasks"][1]["error_message"], "exporter failed: boom");
}
