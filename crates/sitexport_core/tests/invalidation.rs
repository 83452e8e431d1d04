use std::collections::BTreeSet;

use pretty_assertions::assert_eq;
use sitexport_core::{
    ContentKey, Destination, DestinationConfig, ModelError, PendingAction, PendingTask, Scope,
    StaticContentModel,
};
use url::Url;

fn init_logging() {
    export_logging::initialize_for_tests();
}

fn tags(values: &[&str]) -> BTreeSet<String> {
    values.iter().map(|tag| tag.to_string()).collect()
}

/// Tags A -> {x, y}, B -> {y, z} where x, y, z are items 1, 2, 3.
fn tagged_destination() -> Destination {
    let mut dest = Destination::new(1, DestinationConfig::memory("site")).unwrap();
    dest.set_exported_content_tags(1, "en", tags(&["A"]));
    dest.set_exported_content_tags(2, "en", tags(&["A", "B"]));
    dest.set_exported_content_tags(3, "en", tags(&["B"]));
    dest
}

fn pending(dest: &Destination) -> Vec<(u64, String, PendingAction)> {
    dest.iter_pending_tasks(None, None)
        .map(|PendingTask { action, item, language }| (item, language, action))
        .collect()
}

fn nothing() -> Vec<ContentKey> {
    Vec::new()
}

#[test]
fn intersection_marks_only_common_entries() {
    init_logging();
    let mut dest = tagged_destination();

    let marked = dest
        .invalidate_scope(&Scope::intersection(["A", "B"]), PendingAction::Modify, &nothing)
        .unwrap();

    assert_eq!(marked, 1);
    assert_eq!(pending(&dest), vec![(2, "en".to_string(), PendingAction::Modify)]);
}

#[test]
fn intersection_with_unknown_tag_is_empty() {
    let mut dest = tagged_destination();
    let marked = dest
        .invalidate_scope(
            &Scope::intersection(["A", "missing"]),
            PendingAction::Modify,
            &nothing,
        )
        .unwrap();
    assert_eq!(marked, 0);
    assert!(!dest.has_pending_tasks(None, None));
}

#[test]
fn single_tag_marks_all_its_entries() {
    let mut dest = tagged_destination();
    dest.invalidate_scope(&Scope::tag("B"), PendingAction::Modify, &nothing)
        .unwrap();
    let items: Vec<_> = pending(&dest).into_iter().map(|(item, _, _)| item).collect();
    assert_eq!(items, vec![2, 3]);
}

#[test]
fn union_recurses_into_sub_scopes() {
    let mut dest = tagged_destination();
    let scope = Scope::Union(vec![
        Scope::tag("missing"),
        Scope::Union(vec![Scope::intersection(["A", "B"]), Scope::tag("B")]),
    ]);
    assert_eq!(
        dest.invalidate_scope(&scope, PendingAction::Modify, &nothing)
            .unwrap(),
        2
    );
}

#[test]
fn everything_marks_all_exportable_content() {
    let mut dest = tagged_destination();
    let all = || vec![ContentKey::new(8, "en"), ContentKey::new(9, "fr")];
    dest.invalidate_scope(&Scope::Everything, PendingAction::Add, &all)
        .unwrap();
    assert_eq!(
        pending(&dest),
        vec![
            (8, "en".to_string(), PendingAction::Add),
            (9, "fr".to_string(), PendingAction::Add)
        ]
    );
}

#[test]
fn malformed_scope_is_an_invalid_argument() {
    let mut dest = tagged_destination();
    let err = dest
        .invalidate_scope(&Scope::Intersection(Vec::new()), PendingAction::Modify, &nothing)
        .unwrap_err();
    assert!(matches!(err, ModelError::InvalidScope(_)));
    assert!(!dest.has_pending_tasks(None, None));
}

#[test]
fn content_changes_use_the_model_scope() {
    let model = StaticContentModel::new(Url::parse("http://site.test").unwrap())
        .with_page(1, "en", "/one", None)
        .with_page(2, "en", "/two", None)
        .with_invalidation_scope(5, Scope::intersection(["A", "B"]));
    let mut dest = tagged_destination();

    assert_eq!(
        dest.invalidate_exported_content(&model, 5, None, None).unwrap(),
        1
    );
    assert_eq!(dest.get_pending_task(2, "en"), Some(PendingAction::Modify));
}
