//! Turns content-change notifications into pending tasks on every
//! destination.

use std::collections::BTreeSet;
use std::sync::Arc;

use export_logging::export_debug;
use sitexport_core::{ContentModel, DestinationId, ItemId, PendingAction, Scope};

use crate::store::Datastore;
use crate::ExportError;

/// A change in the host content that may make exported files stale.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentChange {
    ItemInserted {
        item: ItemId,
    },
    /// A cache-relevant field changed, optionally for one language only.
    ItemChanged {
        item: ItemId,
        language: Option<String>,
        cache_part: Option<String>,
    },
    ItemDeleted {
        item: ItemId,
    },
    TranslationRemoved {
        item: ItemId,
        language: String,
    },
    /// The set of languages in which `item` can be exported changed.
    PublicationChanged {
        item: ItemId,
        previous: BTreeSet<String>,
        current: BTreeSet<String>,
    },
    DestinationInserted {
        destination: DestinationId,
    },
}

/// Applies [`ContentChange`]s to the pending-task indexes of the store.
#[derive(Clone)]
pub struct InvalidationHandler {
    store: Datastore,
    model: Arc<dyn ContentModel>,
}

impl InvalidationHandler {
    pub fn new(store: Datastore, model: Arc<dyn ContentModel>) -> Self {
        Self { store, model }
    }

    /// Applies `change` in one transaction and returns how many entries it
    /// marked pending across all affected destinations.
    pub fn apply(&self, change: &ContentChange) -> Result<usize, ExportError> {
        let model = self.model.as_ref();
        let marked = self.store.transaction(|data| {
            let mut marked = 0;
            match change {
                ContentChange::ItemInserted { item } | ContentChange::ItemDeleted { item } => {
                    for destination in data.destinations_mut() {
                        marked +=
                            destination.invalidate_exported_content(model, *item, None, None)?;
                    }
                }
                ContentChange::ItemChanged {
                    item,
                    language,
                    cache_part,
                } => {
                    for destination in data.destinations_mut() {
                        marked += destination.invalidate_exported_content(
                            model,
                            *item,
                            language.as_deref(),
                            cache_part.as_deref(),
                        )?;
                    }
                }
                ContentChange::TranslationRemoved { item, language } => {
                    for destination in data.destinations_mut() {
                        marked += destination.invalidate_exported_content(
                            model,
                            *item,
                            Some(language.as_str()),
                            None,
                        )?;
                    }
                }
                ContentChange::PublicationChanged {
                    item,
                    previous,
                    current,
                } => {
                    for destination in data.destinations_mut() {
                        for language in current.difference(previous) {
                            destination.set_pending_task(*item, language, Some(PendingAction::Add));
                            marked += 1;
                        }
                        for language in previous.difference(current) {
                            destination.set_pending_task(
                                *item,
                                language,
                                Some(PendingAction::Delete),
                            );
                            marked += 1;
                        }
                    }
                }
                ContentChange::DestinationInserted { destination } => {
                    marked += data.destination_mut(*destination)?.invalidate_scope(
                        &Scope::Everything,
                        PendingAction::Add,
                        &|| model.exportable_content(),
                    )?;
                }
            }
            Ok::<_, ExportError>(marked)
        })?;

        export_debug!("{:?} marked {} entries pending", change, marked);
        Ok(marked)
    }
}
