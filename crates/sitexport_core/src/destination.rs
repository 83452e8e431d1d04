use std::collections::{BTreeMap, BTreeSet};
use std::ops::Bound;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::model::HTML_CONTENT_TYPE;
use crate::{
    ConfigError, ContentKey, ContentModel, DestinationId, ItemId, ModelError, Resolution, Scope,
    SiteId, TaskAction,
};

pub const DEFAULT_PAGE_EXTENSION: &str = ".html";

/// File name used for URLs whose path is empty (site roots).
pub const INDEX_SEGMENT: &str = "index";

fn default_page_extension() -> Option<String> {
    Some(DEFAULT_PAGE_EXTENSION.to_string())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DestinationKind {
    Folder { root_folder: Option<PathBuf> },
    Zip { zip_folder: Option<PathBuf> },
    /// Cloud object storage; the engine has no built-in client, callers
    /// inject their own exporter.
    ObjectStore { bucket: String },
    Memory,
}

impl DestinationKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Folder { .. } => "folder",
            Self::Zip { .. } => "zip",
            Self::ObjectStore { .. } => "object_store",
            Self::Memory => "memory",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DestinationConfig {
    pub title: String,
    /// Public root under which the exported site is served.
    #[serde(default)]
    pub url: Option<Url>,
    #[serde(default)]
    pub website_prefixes: BTreeMap<SiteId, String>,
    #[serde(default = "default_page_extension")]
    pub export_file_extension: Option<String>,
    pub kind: DestinationKind,
}

impl DestinationConfig {
    pub fn new(title: impl Into<String>, kind: DestinationKind) -> Self {
        Self {
            title: title.into(),
            url: None,
            website_prefixes: BTreeMap::new(),
            export_file_extension: default_page_extension(),
            kind,
        }
    }

    pub fn folder(title: impl Into<String>, root_folder: impl Into<PathBuf>) -> Self {
        Self::new(
            title,
            DestinationKind::Folder {
                root_folder: Some(root_folder.into()),
            },
        )
    }

    pub fn memory(title: impl Into<String>) -> Self {
        Self::new(title, DestinationKind::Memory)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.title.trim().is_empty() {
            return Err(ConfigError::MissingField("title"));
        }
        match &self.kind {
            DestinationKind::Folder { root_folder: None } => {
                Err(ConfigError::MissingField("root_folder"))
            }
            DestinationKind::ObjectStore { bucket } if bucket.is_empty() => {
                Err(ConfigError::MissingField("bucket"))
            }
            _ => Ok(()),
        }
    }
}

/// Why an entry is waiting to be exported again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PendingAction {
    #[serde(rename = "add")]
    Add,
    #[serde(rename = "mod")]
    Modify,
    #[serde(rename = "del")]
    Delete,
}

impl PendingAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Modify => "mod",
            Self::Delete => "del",
        }
    }

    pub fn task_action(&self) -> TaskAction {
        match self {
            Self::Add | Self::Modify => TaskAction::Post,
            Self::Delete => TaskAction::Delete,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingTask {
    pub action: PendingAction,
    pub item: ItemId,
    pub language: String,
}

/// A configured output target together with its invalidation indexes.
///
/// `entry_tags` and `entries_by_tag` are exact inverses of each other; they
/// are only ever updated together through [`Destination::set_exported_content_tags`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Destination {
    id: DestinationId,
    config: DestinationConfig,
    pending_tasks: BTreeMap<ItemId, BTreeMap<String, PendingAction>>,
    entry_tags: BTreeMap<ContentKey, BTreeSet<String>>,
    entries_by_tag: BTreeMap<String, BTreeSet<ContentKey>>,
}

impl Destination {
    pub fn new(id: DestinationId, config: DestinationConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            id,
            config,
            pending_tasks: BTreeMap::new(),
            entry_tags: BTreeMap::new(),
            entries_by_tag: BTreeMap::new(),
        })
    }

    pub fn id(&self) -> DestinationId {
        self.id
    }

    pub fn title(&self) -> &str {
        &self.config.title
    }

    pub fn config(&self) -> &DestinationConfig {
        &self.config
    }

    // ----- export paths -----

    /// Output location of `url`, as path segments relative to the
    /// destination root.
    ///
    /// The path is: the site prefix (when the URL resolves to an item of
    /// exactly one prefixed site), the URL path segments, the query string
    /// as one extra segment (`=` -> `-`, `&` -> `.`), and finally, if
    /// `add_extension` is set and the last segment has none, an extension
    /// derived from `content_type`.
    pub fn export_path(
        &self,
        url: &Url,
        resolution: &Resolution,
        content_type: Option<&str>,
        add_extension: bool,
    ) -> Vec<String> {
        let mut export_path = Vec::new();

        if !self.config.website_prefixes.is_empty() {
            if let Some(prefix) = resolution
                .site()
                .and_then(|site| self.config.website_prefixes.get(&site))
            {
                export_path.extend(
                    prefix
                        .split('/')
                        .filter(|segment| !segment.is_empty())
                        .map(str::to_string),
                );
            }
        }

        let segments = path_segments(url);
        // Dots in the query segment are separators, so only the path decides.
        let has_extension = segments.last().is_some_and(|last| last.contains('.'));
        let has_segments = !segments.is_empty();
        export_path.extend(segments);

        let query = url.query().filter(|query| !query.is_empty());
        if let Some(query) = query {
            export_path.push(query.replace('=', "-").replace('&', "."));
        }

        if add_extension && !has_extension {
            if !has_segments && query.is_none() {
                export_path.push(INDEX_SEGMENT.to_string());
            }
            if let Some(extension) = self.extension_for(content_type) {
                if let Some(last) = export_path.last_mut() {
                    last.push_str(&extension);
                }
            }
        }

        export_path
    }

    /// Public URL of an exported path: the destination URL joined with the
    /// path, or a root-relative URL when the destination has none.
    pub fn export_url(&self, export_path: &[String]) -> String {
        let joined = export_path.join("/");
        match &self.config.url {
            Some(root) => {
                let base = root.as_str().trim_end_matches('/');
                format!("{base}/{joined}")
            }
            None => format!("/{joined}"),
        }
    }

    fn extension_for(&self, content_type: Option<&str>) -> Option<String> {
        match content_type {
            None | Some(HTML_CONTENT_TYPE) => self.config.export_file_extension.clone(),
            Some(content_type) => guess_extension(content_type),
        }
    }

    // ----- pending tasks -----

    pub fn get_pending_task(&self, item: ItemId, language: &str) -> Option<PendingAction> {
        self.pending_tasks
            .get(&item)
            .and_then(|tasks| tasks.get(language))
            .copied()
    }

    /// Records (`Some`) or clears (`None`) the pending action of an entry.
    pub fn set_pending_task(
        &mut self,
        item: ItemId,
        language: &str,
        action: Option<PendingAction>,
    ) {
        match action {
            Some(action) => {
                self.pending_tasks
                    .entry(item)
                    .or_default()
                    .insert(language.to_string(), action);
            }
            None => {
                if let Some(tasks) = self.pending_tasks.get_mut(&item) {
                    tasks.remove(language);
                    if tasks.is_empty() {
                        self.pending_tasks.remove(&item);
                    }
                }
            }
        }
    }

    pub fn iter_pending_tasks<'a>(
        &'a self,
        item: Option<ItemId>,
        languages: Option<&'a [String]>,
    ) -> impl Iterator<Item = PendingTask> + 'a {
        let range = match item {
            Some(item) => (Bound::Included(item), Bound::Included(item)),
            None => (Bound::Unbounded, Bound::Unbounded),
        };
        self.pending_tasks
            .range(range)
            .flat_map(|(item, tasks)| {
                tasks.iter().map(move |(language, action)| PendingTask {
                    action: *action,
                    item: *item,
                    language: language.clone(),
                })
            })
            .filter(move |task| languages.map_or(true, |langs| langs.contains(&task.language)))
    }

    pub fn has_pending_tasks(&self, item: Option<ItemId>, languages: Option<&[String]>) -> bool {
        self.iter_pending_tasks(item, languages).next().is_some()
    }

    pub fn clear_pending_tasks(&mut self, item: Option<ItemId>, languages: Option<&[String]>) {
        let cleared: Vec<_> = self.iter_pending_tasks(item, languages).collect();
        for task in cleared {
            self.set_pending_task(task.item, &task.language, None);
        }
    }

    fn mark_pending(&mut self, key: &ContentKey, action: PendingAction) -> bool {
        let tasks = self.pending_tasks.entry(key.item).or_default();
        if tasks.contains_key(&key.language) {
            return false;
        }
        tasks.insert(key.language.clone(), action);
        true
    }

    // ----- cache tags -----

    pub fn exported_content_tags(&self, item: ItemId, language: &str) -> Option<&BTreeSet<String>> {
        self.entry_tags.get(&ContentKey::new(item, language))
    }

    pub fn entries_tagged(&self, tag: &str) -> impl Iterator<Item = &ContentKey> {
        self.entries_by_tag.get(tag).into_iter().flatten()
    }

    pub fn tags(&self) -> impl Iterator<Item = &str> {
        self.entries_by_tag.keys().map(String::as_str)
    }

    /// Replaces the tag set of an entry, keeping the reverse index exact.
    /// An empty set removes the entry from the index.
    pub fn set_exported_content_tags(
        &mut self,
        item: ItemId,
        language: &str,
        tags: BTreeSet<String>,
    ) {
        let entry = ContentKey::new(item, language);

        if let Some(previous) = self.entry_tags.remove(&entry) {
            for tag in previous {
                if let Some(entries) = self.entries_by_tag.get_mut(&tag) {
                    entries.remove(&entry);
                    if entries.is_empty() {
                        self.entries_by_tag.remove(&tag);
                    }
                }
            }
        }

        if tags.is_empty() {
            return;
        }

        for tag in &tags {
            self.entries_by_tag
                .entry(tag.clone())
                .or_default()
                .insert(entry.clone());
        }
        self.entry_tags.insert(entry, tags);
    }

    // ----- invalidation -----

    /// Marks every entry affected by a change to `item` as pending
    /// modification. Returns the number of entries newly marked.
    pub fn invalidate_exported_content(
        &mut self,
        model: &dyn ContentModel,
        item: ItemId,
        language: Option<&str>,
        cache_part: Option<&str>,
    ) -> Result<usize, ModelError> {
        let scope = model.invalidation_scope(item, language, cache_part);
        self.invalidate_scope(&scope, PendingAction::Modify, &|| model.exportable_content())
    }

    /// Resolves `scope` against the tag index and marks the matching entries
    /// pending with `action`. Entries that already have a pending action keep
    /// it.
    pub fn invalidate_scope(
        &mut self,
        scope: &Scope,
        action: PendingAction,
        all_content: &dyn Fn() -> Vec<ContentKey>,
    ) -> Result<usize, ModelError> {
        scope.validate()?;
        let matching = self.resolve_scope(scope, all_content);
        Ok(matching
            .iter()
            .filter(|key| self.mark_pending(key, action))
            .count())
    }

    fn resolve_scope(
        &self,
        scope: &Scope,
        all_content: &dyn Fn() -> Vec<ContentKey>,
    ) -> BTreeSet<ContentKey> {
        match scope {
            Scope::Everything => all_content().into_iter().collect(),
            Scope::Tag(tag) => self.entries_tagged(tag).cloned().collect(),
            Scope::Intersection(tags) => {
                let mut matching: Option<BTreeSet<ContentKey>> = None;
                for tag in tags {
                    let Some(tagged) = self.entries_by_tag.get(tag) else {
                        return BTreeSet::new();
                    };
                    let next = match matching {
                        None => tagged.clone(),
                        Some(current) => current.intersection(tagged).cloned().collect(),
                    };
                    if next.is_empty() {
                        return next;
                    }
                    matching = Some(next);
                }
                matching.unwrap_or_default()
            }
            Scope::Union(scopes) => scopes
                .iter()
                .flat_map(|scope| self.resolve_scope(scope, all_content))
                .collect(),
        }
    }
}

/// Non-empty path segments of a URL, still percent-encoded.
pub fn path_segments(url: &Url) -> Vec<String> {
    url.path_segments()
        .map(|segments| {
            segments
                .filter(|segment| !segment.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn guess_extension(content_type: &str) -> Option<String> {
    let preferred = match content_type {
        "text/css" => Some("css"),
        "text/javascript" | "application/javascript" => Some("js"),
        "application/json" => Some("json"),
        "image/jpeg" => Some("jpg"),
        "image/svg+xml" => Some("svg"),
        "text/plain" => Some("txt"),
        _ => None,
    };
    preferred
        .or_else(|| {
            mime_guess::get_mime_extensions_str(content_type)
                .and_then(|extensions| extensions.first().copied())
        })
        .map(|extension| format!(".{extension}"))
}
