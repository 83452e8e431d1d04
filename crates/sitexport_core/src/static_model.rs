use std::collections::{BTreeMap, BTreeSet};

use url::Url;

use crate::destination::path_segments;
use crate::scope::item_tag;
use crate::{ContentKey, ContentModel, ItemId, Resolution, Scope, SiteId};

#[derive(Debug, Clone, PartialEq, Eq)]
struct PageRoute {
    item: ItemId,
    language: String,
    segments: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct ItemInfo {
    content_type: Option<String>,
    site: Option<SiteId>,
    exportable: bool,
}

impl Default for ItemInfo {
    fn default() -> Self {
        Self {
            content_type: None,
            site: None,
            exportable: true,
        }
    }
}

/// Table-driven [`ContentModel`] for hosts that can enumerate their routes
/// up front, and for tests.
///
/// Pages are matched on their path prefix, so `/articles/foo/comments`
/// resolves to the page mounted at `/articles/foo` and keeps `comments` as
/// extra path when canonicalized.
#[derive(Debug, Clone)]
pub struct StaticContentModel {
    base: Url,
    hosts: BTreeSet<String>,
    routes: Vec<PageRoute>,
    items: BTreeMap<ItemId, ItemInfo>,
    resources: BTreeMap<String, Option<String>>,
    scopes: BTreeMap<ItemId, Scope>,
}

impl StaticContentModel {
    /// `base` is the origin pages are fetched from; its host is a site host.
    pub fn new(base: Url) -> Self {
        let mut hosts = BTreeSet::new();
        if let Some(host) = base.host_str() {
            hosts.insert(host.to_string());
        }
        Self {
            base,
            hosts,
            routes: Vec::new(),
            items: BTreeMap::new(),
            resources: BTreeMap::new(),
            scopes: BTreeMap::new(),
        }
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.hosts.insert(host.into());
        self
    }

    /// Mounts `item` rendered in `language` at `path`.
    pub fn with_page(
        mut self,
        item: ItemId,
        language: impl Into<String>,
        path: &str,
        content_type: Option<&str>,
    ) -> Self {
        self.routes.push(PageRoute {
            item,
            language: language.into(),
            segments: split_path(path),
        });
        let info = self.items.entry(item).or_default();
        if content_type.is_some() {
            info.content_type = content_type.map(str::to_string);
        }
        self
    }

    pub fn with_site(mut self, item: ItemId, site: SiteId) -> Self {
        self.items.entry(item).or_default().site = Some(site);
        self
    }

    /// Keeps the item routable but leaves it out of full exports.
    pub fn with_unexportable(mut self, item: ItemId) -> Self {
        self.items.entry(item).or_default().exportable = false;
        self
    }

    pub fn with_resource(mut self, path: &str, content_type: Option<&str>) -> Self {
        self.resources
            .insert(split_path(path).join("/"), content_type.map(str::to_string));
        self
    }

    pub fn with_invalidation_scope(mut self, item: ItemId, scope: Scope) -> Self {
        self.scopes.insert(item, scope);
        self
    }

    fn is_local(&self, url: &Url) -> bool {
        url.host_str().is_some_and(|host| self.hosts.contains(host))
    }

    /// Longest mounted route that prefixes `segments`, preferring `language`.
    fn route_for(&self, segments: &[String], language: Option<&str>) -> Option<&PageRoute> {
        self.routes
            .iter()
            .filter(|route| {
                // The site root only matches itself.
                if route.segments.is_empty() {
                    segments.is_empty()
                } else {
                    segments.starts_with(&route.segments)
                }
            })
            .max_by_key(|route| {
                (
                    route.segments.len(),
                    language.is_some_and(|lang| lang == route.language),
                )
            })
    }
}

impl ContentModel for StaticContentModel {
    fn item_url(&self, item: ItemId, language: &str) -> Option<Url> {
        let route = self
            .routes
            .iter()
            .find(|route| route.item == item && route.language == language)?;
        let mut url = self.base.clone();
        url.set_path(&format!("/{}", route.segments.join("/")));
        Some(url)
    }

    fn resolve(&self, url: &Url) -> Resolution {
        if !self.is_local(url) {
            return Resolution::NotResolved;
        }
        let segments = path_segments(url);
        if let Some(content_type) = self.resources.get(&segments.join("/")) {
            return Resolution::Resource {
                content_type: content_type.clone(),
            };
        }
        match self.route_for(&segments, None) {
            Some(route) => {
                let info = self.items.get(&route.item).cloned().unwrap_or_default();
                Resolution::Publishable {
                    item: route.item,
                    content_type: info.content_type,
                    site: info.site,
                }
            }
            None => Resolution::NotResolved,
        }
    }

    fn canonical_url(&self, url: &Url, language: Option<&str>) -> Url {
        let segments = path_segments(url);
        let Some(route) = self.route_for(&segments, language) else {
            return url.clone();
        };
        let canonical = language
            .and_then(|lang| {
                self.routes
                    .iter()
                    .find(|other| other.item == route.item && other.language == lang)
            })
            .unwrap_or(route);

        let mut path = canonical.segments.clone();
        path.extend(segments[route.segments.len()..].iter().cloned());
        let mut result = url.clone();
        result.set_path(&format!("/{}", path.join("/")));
        result
    }

    fn is_site_host(&self, host: &str) -> bool {
        self.hosts.contains(host)
    }

    fn invalidation_scope(
        &self,
        item: ItemId,
        _language: Option<&str>,
        _cache_part: Option<&str>,
    ) -> Scope {
        self.scopes
            .get(&item)
            .cloned()
            .unwrap_or_else(|| Scope::Tag(item_tag(item)))
    }

    fn exportable_content(&self) -> Vec<ContentKey> {
        let keys: BTreeSet<_> = self
            .routes
            .iter()
            .filter(|route| self.items.get(&route.item).is_some_and(|info| info.exportable))
            .map(|route| ContentKey::new(route.item, route.language.clone()))
            .collect();
        keys.into_iter().collect()
    }
}

fn split_path(path: &str) -> Vec<String> {
    path.split('/')
        .filter(|segment| !segment.is_empty())
        .map(str::to_string)
        .collect()
}
