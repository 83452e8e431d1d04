//! URL normalization, dependency discovery and export path computation.

use std::collections::{BTreeSet, HashMap};
use std::iter;
use std::sync::{Arc, Mutex};

use export_logging::export_debug;
use sitexport_core::{path_segments, ContentModel, Destination, ItemId, Resolution};
use url::Url;

use crate::hooks::ExportHooks;
use crate::resource::ExportedResource;
use crate::rewrite::UrlRewriter;

/// Everything needed to map URLs onto a destination's output layout.
///
/// Holds a snapshot of the destination configuration taken when the job was
/// created, and memoizes URL resolutions for the lifetime of the job.
///
/// Output paths are memoized too: the first link to a URL (or its own
/// download, if that comes first) fixes where it is written, so links and
/// files always agree.
pub struct ExportPaths {
    destination: Destination,
    model: Arc<dyn ContentModel>,
    hooks: Arc<dyn ExportHooks>,
    resolutions: Mutex<HashMap<Url, Resolution>>,
    output_paths: Mutex<HashMap<Url, Vec<String>>>,
}

impl ExportPaths {
    pub fn new(
        destination: Destination,
        model: Arc<dyn ContentModel>,
        hooks: Arc<dyn ExportHooks>,
    ) -> Self {
        Self {
            destination,
            model,
            hooks,
            resolutions: Mutex::new(HashMap::new()),
            output_paths: Mutex::new(HashMap::new()),
        }
    }

    /// Same layout, with the site-specific adjustments of `hooks`.
    pub fn with_hooks(mut self, hooks: Arc<dyn ExportHooks>) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn destination(&self) -> &Destination {
        &self.destination
    }

    pub fn model(&self) -> &dyn ContentModel {
        self.model.as_ref()
    }

    pub fn hooks(&self) -> &dyn ExportHooks {
        self.hooks.as_ref()
    }

    pub fn export_urls(&self, item: ItemId, language: &str) -> Vec<Url> {
        self.hooks.export_urls(self.model.as_ref(), item, language)
    }

    pub fn resolve(&self, url: &Url) -> Resolution {
        let key = without_fragment(url);
        if let Ok(cache) = self.resolutions.lock() {
            if let Some(resolution) = cache.get(&key) {
                return resolution.clone();
            }
        }
        let resolution = self.model.resolve(&key);
        if let Ok(mut cache) = self.resolutions.lock() {
            cache.insert(key, resolution.clone());
        }
        resolution
    }

    /// A URL is external when it names a host that serves none of the
    /// configured sites.
    pub fn is_external(&self, url: &Url) -> bool {
        url.host_str()
            .is_some_and(|host| !self.model.is_site_host(host))
    }

    /// Local URLs become dependencies unless they resolve to an HTML page.
    pub fn is_exportable_dependency(&self, url: &Url, hint: Option<&str>) -> bool {
        !self.is_external(url) && !self.resolve(url).is_html_page(hint)
    }

    pub fn export_path(
        &self,
        url: &Url,
        content_type: Option<&str>,
        add_extension: bool,
    ) -> Vec<String> {
        let resolution = self.resolve(url);
        let content_type = content_type.or(resolution.content_type());
        let path = self
            .destination
            .export_path(url, &resolution, content_type, add_extension);
        self.hooks.adjust_export_path(url, path)
    }

    /// Where the file for `url` is written during this job. `content_type`
    /// only matters the first time a URL is seen.
    pub fn output_path(&self, url: &Url, content_type: Option<&str>) -> Vec<String> {
        let key = without_fragment(url);
        if let Ok(cache) = self.output_paths.lock() {
            if let Some(path) = cache.get(&key) {
                return path.clone();
            }
        }
        let path = self.export_path(&key, content_type, true);
        match self.output_paths.lock() {
            Ok(mut cache) => cache.entry(key).or_insert(path).clone(),
            Err(_) => path,
        }
    }

    /// Drops the output paths fixed by a previous run.
    pub fn forget_output_paths(&self) {
        if let Ok(mut cache) = self.output_paths.lock() {
            cache.clear();
        }
    }

    /// Public URL of the exported copy of `url`, fragment included.
    pub fn export_url(&self, url: &Url, content_type: Option<&str>) -> String {
        let mut export_url = self
            .destination
            .export_url(&self.output_path(url, content_type));
        if let Some(fragment) = url.fragment() {
            export_url.push('#');
            export_url.push_str(fragment);
        }
        export_url
    }

    /// Path from `folder` to the exported copy of `url`.
    ///
    /// The query is not repeated since it is already part of the target's
    /// file name.
    pub fn relative_url(&self, url: &Url, folder: &[String], content_type: Option<&str>) -> String {
        let target = self.output_path(url, content_type);
        let common = folder
            .iter()
            .zip(&target)
            .take_while(|(a, b)| a == b)
            .count()
            .min(target.len().saturating_sub(1));

        let parts: Vec<&str> = iter::repeat("..")
            .take(folder.len() - common)
            .chain(target[common..].iter().map(String::as_str))
            .collect();
        let mut relative = if parts.is_empty() {
            ".".to_string()
        } else {
            parts.join("/")
        };
        if let Some(fragment) = url.fragment() {
            relative.push('#');
            relative.push_str(fragment);
        }
        relative
    }

    /// Turns a reference found in content into an absolute, canonical URL.
    /// `None` for anything that is not an http(s) URL.
    pub fn normalize(&self, value: &str, base: &Url, language: Option<&str>) -> Option<Url> {
        if value.starts_with('#') {
            return None;
        }
        let mut url = match Url::parse(value) {
            Ok(url) => url,
            Err(url::ParseError::RelativeUrlWithoutBase) => base.join(value).ok()?,
            Err(_) => return None,
        };
        if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
            return None;
        }

        if !self.is_external(&url) && self.resolve(&url).publishable().is_some() {
            let fragment = url.fragment().map(str::to_string);
            url = self.model.canonical_url(&url, language);
            url.set_fragment(fragment.as_deref());
        }
        Some(url)
    }
}

/// The URL relative references in a resource are resolved against: the
/// resource URL minus its last path segment, when it has more than one.
/// Always ends with `/`.
pub fn base_url(url: &Url) -> Url {
    let segments = path_segments(url);
    let kept = match segments.len() {
        0 | 1 => &segments[..],
        len => &segments[..len - 1],
    };
    let mut path = String::from("/");
    for segment in kept {
        path.push_str(segment);
        path.push('/');
    }
    let mut base = url.clone();
    base.set_path(&path);
    base.set_query(None);
    base.set_fragment(None);
    base
}

fn without_fragment(url: &Url) -> Url {
    let mut key = url.clone();
    key.set_fragment(None);
    key
}

/// Bookkeeping of the URLs seen during one job execution.
///
/// `dependencies` keeps every dependency ever discovered; `pending` only
/// those still to be fetched. Documents (task URLs) are never dependencies.
#[derive(Debug, Default)]
pub struct DependencyTracker {
    documents: BTreeSet<Url>,
    dependencies: BTreeSet<Url>,
    pending: BTreeSet<Url>,
}

impl DependencyTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues `url` if it is an exportable dependency not seen before.
    pub fn add_dependency(&mut self, url: &Url, hint: Option<&str>, paths: &ExportPaths) -> bool {
        let key = without_fragment(url);
        if self.dependencies.contains(&key) || self.documents.contains(&key) {
            return false;
        }
        if !paths.is_exportable_dependency(&key, hint) {
            return false;
        }
        export_debug!("Discovered dependency {}", key);
        self.pending.insert(key.clone());
        self.dependencies.insert(key);
        true
    }

    pub fn mark_document(&mut self, url: &Url) {
        let key = without_fragment(url);
        self.dependencies.remove(&key);
        self.pending.remove(&key);
        self.documents.insert(key);
    }

    pub fn pop_pending(&mut self) -> Option<Url> {
        self.pending.pop_first()
    }

    pub fn dependencies(&self) -> impl Iterator<Item = &Url> {
        self.dependencies.iter()
    }

    pub fn is_dependency(&self, url: &Url) -> bool {
        self.dependencies.contains(&without_fragment(url))
    }

    pub fn is_document(&self, url: &Url) -> bool {
        self.documents.contains(&without_fragment(url))
    }

    pub fn has_dependencies(&self) -> bool {
        !self.dependencies.is_empty()
    }

    pub fn dependency_count(&self) -> usize {
        self.dependencies.len()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

/// Rewrites the URLs of one resource and records what they depend on.
pub struct ResourceLinks<'a, 'p> {
    resource: &'a ExportedResource<'p>,
    tracker: &'a mut DependencyTracker,
}

impl<'a, 'p> ResourceLinks<'a, 'p> {
    pub fn new(resource: &'a ExportedResource<'p>, tracker: &'a mut DependencyTracker) -> Self {
        Self { resource, tracker }
    }
}

impl UrlRewriter for ResourceLinks<'_, '_> {
    fn rewrite_url(&mut self, value: &str, hint: Option<&str>) -> Option<String> {
        let paths = self.resource.paths();
        let url = paths.normalize(value, self.resource.base_url(), self.resource.language())?;

        self.tracker.add_dependency(&url, hint, paths);

        if paths.is_external(&url) {
            return None;
        }
        let rewritten = if paths
            .hooks()
            .should_make_url_absolute(&url, self.resource.source_url())
        {
            paths.export_url(&url, hint)
        } else {
            paths.relative_url(&url, self.resource.export_folder(), hint)
        };
        Some(rewritten)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::DefaultHooks;
    use sitexport_core::{DestinationConfig, StaticContentModel};

    fn url(raw: &str) -> Url {
        Url::parse(raw).unwrap()
    }

    fn paths() -> ExportPaths {
        let model = StaticContentModel::new(url("http://site.test"))
            .with_page(1, "en", "/articles/foo", Some("text/html"))
            .with_page(1, "es", "/articulos/foo", Some("text/html"))
            .with_resource("/img/logo.png", Some("image/png"));
        let destination = Destination::new(1, DestinationConfig::memory("dest")).unwrap();
        ExportPaths::new(destination, Arc::new(model), Arc::new(DefaultHooks))
    }

    #[test]
    fn base_url_strips_last_segment_of_deep_paths_only() {
        assert_eq!(base_url(&url("http://s.test/a/b/c.html?x=1")).as_str(), "http://s.test/a/b/");
        assert_eq!(base_url(&url("http://s.test/about")).as_str(), "http://s.test/about/");
        assert_eq!(base_url(&url("http://s.test/")).as_str(), "http://s.test/");
    }

    #[test]
    fn relative_urls_climb_out_of_the_current_folder() {
        let paths = paths();
        let folder = vec!["articles".to_string()];
        assert_eq!(
            paths.relative_url(&url("http://site.test/img/logo.png"), &folder, None),
            "../img/logo.png"
        );
        assert_eq!(
            paths.relative_url(&url("http://site.test/articles/bar#top"), &folder, None),
            "bar.html#top"
        );
    }

    #[test]
    fn relative_url_keeps_the_file_name_when_target_is_a_prefix() {
        let paths = paths();
        let folder = vec!["img".to_string(), "logo.png".to_string()];
        assert_eq!(
            paths.relative_url(&url("http://site.test/img/logo.png"), &folder, None),
            "../logo.png"
        );
        assert_eq!(
            paths.relative_url(&url("http://site.test/img"), &folder, None),
            "../../img.html"
        );
    }

    #[test]
    fn the_first_link_fixes_the_output_path() {
        let paths = paths();
        let photo = url("http://site.test/img/photo");
        let folder = vec!["articles".to_string()];
        assert_eq!(paths.relative_url(&photo, &folder, None), "../img/photo.html");
        assert_eq!(paths.output_path(&photo, Some("image/png")), ["img", "photo.html"]);

        paths.forget_output_paths();
        assert_eq!(paths.output_path(&photo, Some("image/png")), ["img", "photo.png"]);
    }

    #[test]
    fn normalize_resolves_and_canonicalizes_local_pages() {
        let paths = paths();
        let base = url("http://site.test/articles/");
        assert_eq!(
            paths.normalize("/articles/foo/comments#c1", &base, Some("es")).unwrap().as_str(),
            "http://site.test/articulos/foo/comments#c1"
        );
        assert_eq!(
            paths.normalize("logo.png", &base, None).unwrap().as_str(),
            "http://site.test/articles/logo.png"
        );
        assert!(paths.normalize("mailto:a@b.c", &base, None).is_none());
        assert!(paths.normalize("data:image/png;base64,AAAA", &base, None).is_none());
        assert!(paths.normalize("#anchor", &base, None).is_none());
    }

    #[test]
    fn pages_are_never_dependencies() {
        let paths = paths();
        let mut tracker = DependencyTracker::new();
        assert!(!tracker.add_dependency(&url("http://site.test/articles/foo"), None, &paths));
        assert!(!tracker.add_dependency(&url("http://cdn.test/x.js"), None, &paths));
        assert!(tracker.add_dependency(&url("http://site.test/img/logo.png#x"), None, &paths));
        assert!(!tracker.add_dependency(&url("http://site.test/img/logo.png"), None, &paths));
        // Forcing a non-HTML hint turns a page into a plain asset.
        assert!(tracker.add_dependency(
            &url("http://site.test/articles/foo"),
            Some("text/plain"),
            &paths
        ));
    }

    #[test]
    fn documents_leave_the_dependency_queue() {
        let paths = paths();
        let mut tracker = DependencyTracker::new();
        let logo = url("http://site.test/img/logo.png");
        tracker.add_dependency(&logo, None, &paths);
        tracker.mark_document(&logo);

        assert!(tracker.is_document(&logo));
        assert!(!tracker.is_dependency(&logo));
        assert_eq!(tracker.pop_pending(), None);
        assert!(!tracker.add_dependency(&logo, None, &paths));
    }
}
