use std::sync::OnceLock;

use sitexport_core::HTML_CONTENT_TYPE;
use url::Url;

use crate::decode::{decode_text, DecodeError};
use crate::fetch::{FetchRequest, Fetcher};
use crate::links::{base_url, DependencyTracker, ExportPaths, ResourceLinks};
use crate::rewrite::{rewrite_css, rewrite_html};
use crate::FetchError;

const CSS_CONTENT_TYPE: &str = "text/css";

/// One fetched payload (a page or a dependency) and where it goes.
///
/// Borrows the job's [`ExportPaths`]; it never outlives the job that
/// created it. Export paths are derived on first use and then fixed.
pub struct ExportedResource<'p> {
    paths: &'p ExportPaths,
    source_url: Url,
    base_url: Url,
    language: Option<String>,
    content: Vec<u8>,
    content_type: Option<String>,
    declared_content_type: Option<String>,
    cache_tags: Vec<String>,
    export_path: OnceLock<Vec<String>>,
    export_folder: OnceLock<Vec<String>>,
}

impl<'p> ExportedResource<'p> {
    pub fn new(paths: &'p ExportPaths, source_url: Url, language: Option<String>) -> Self {
        Self {
            paths,
            base_url: base_url(&source_url),
            source_url,
            language,
            content: Vec::new(),
            content_type: None,
            declared_content_type: None,
            cache_tags: Vec::new(),
            export_path: OnceLock::new(),
            export_folder: OnceLock::new(),
        }
    }

    /// A resource whose content is already known, with `content_type` given
    /// as a full `Content-Type` header value.
    pub fn with_content(
        paths: &'p ExportPaths,
        source_url: Url,
        language: Option<String>,
        content_type: Option<&str>,
        content: Vec<u8>,
    ) -> Self {
        let mut resource = Self::new(paths, source_url, language);
        resource.set_content_type(content_type.map(str::to_string));
        resource.content = content;
        resource
    }

    /// Fetches the resource, replacing any previous content.
    pub async fn open(
        &mut self,
        fetcher: &dyn Fetcher,
        headers: &[(String, String)],
    ) -> Result<(), FetchError> {
        let request = FetchRequest {
            url: self.source_url.clone(),
            headers: headers.to_vec(),
        };
        let output = fetcher.fetch(&request).await?;
        self.set_content_type(output.metadata.content_type.clone());
        self.cache_tags = output.metadata.cache_tags;
        self.content = output.bytes;
        Ok(())
    }

    fn set_content_type(&mut self, declared: Option<String>) {
        self.content_type = declared
            .as_deref()
            .map(|value| value.split(';').next().unwrap_or(value).trim().to_ascii_lowercase())
            .filter(|value| !value.is_empty());
        self.declared_content_type = declared;
        self.export_path = OnceLock::new();
        self.export_folder = OnceLock::new();
    }

    pub fn paths(&self) -> &'p ExportPaths {
        self.paths
    }

    pub fn source_url(&self) -> &Url {
        &self.source_url
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn language(&self) -> Option<&str> {
        self.language.as_deref()
    }

    pub fn content(&self) -> &[u8] {
        &self.content
    }

    /// Media type of the payload, without parameters.
    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    pub fn cache_tags(&self) -> &[String] {
        &self.cache_tags
    }

    pub fn export_path(&self) -> &[String] {
        self.export_path.get_or_init(|| {
            self.paths
                .output_path(&self.source_url, self.content_type.as_deref())
        })
    }

    /// The folder holding [`Self::export_path`]; links in this resource are
    /// made relative to it.
    pub fn export_folder(&self) -> &[String] {
        self.export_folder.get_or_init(|| {
            let path = self.export_path();
            path[..path.len().saturating_sub(1)].to_vec()
        })
    }

    /// Runs HTML and CSS payloads through the rewriting pipeline, recording
    /// discovered dependencies. Returns whether the content was rewritten.
    pub fn process(&mut self, tracker: &mut DependencyTracker) -> Result<bool, DecodeError> {
        let is_html = match self.content_type.as_deref() {
            Some(HTML_CONTENT_TYPE) => true,
            Some(CSS_CONTENT_TYPE) => false,
            _ => return Ok(false),
        };
        let text = decode_text(&self.content, self.declared_content_type.as_deref())?.text;

        let rewritten = {
            let mut links = ResourceLinks::new(self, tracker);
            if is_html {
                rewrite_html(&text, &mut links)
            } else {
                rewrite_css(&text, &mut links)
            }
        };
        self.content = rewritten.into_bytes();
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use pretty_assertions::assert_eq;
    use sitexport_core::{Destination, DestinationConfig, StaticContentModel};

    use super::*;
    use crate::hooks::DefaultHooks;

    fn paths() -> ExportPaths {
        let model = StaticContentModel::new(Url::parse("http://site.test").unwrap())
            .with_page(1, "en", "/articles/foo", Some("text/html"))
            .with_resource("/css/site.css", Some("text/css"))
            .with_resource("/img/logo.png", Some("image/png"));
        let destination = Destination::new(1, DestinationConfig::memory("dest")).unwrap();
        ExportPaths::new(destination, Arc::new(model), Arc::new(DefaultHooks))
    }

    #[test]
    fn export_path_and_folder_follow_the_content_type() {
        let paths = paths();
        let resource = ExportedResource::with_content(
            &paths,
            Url::parse("http://site.test/articles/foo?page=2").unwrap(),
            Some("en".into()),
            Some("text/html; charset=utf-8"),
            Vec::new(),
        );
        assert_eq!(resource.content_type(), Some("text/html"));
        assert_eq!(resource.export_path(), ["articles", "foo", "page-2.html"]);
        assert_eq!(resource.export_folder(), ["articles", "foo"]);
    }

    #[test]
    fn stylesheets_are_rewritten_relative_to_their_folder() {
        let paths = paths();
        let mut tracker = DependencyTracker::new();
        let mut resource = ExportedResource::with_content(
            &paths,
            Url::parse("http://site.test/css/site.css").unwrap(),
            None,
            Some("text/css"),
            b"body { background: url(\"../img/logo.png\") }".to_vec(),
        );

        assert!(resource.process(&mut tracker).unwrap());
        assert_eq!(
            String::from_utf8(resource.content().to_vec()).unwrap(),
            "body { background: url('../img/logo.png') }"
        );
        assert!(tracker.is_dependency(&Url::parse("http://site.test/img/logo.png").unwrap()));
    }

    #[test]
    fn binary_payloads_are_left_alone() {
        let paths = paths();
        let mut tracker = DependencyTracker::new();
        let mut resource = ExportedResource::with_content(
            &paths,
            Url::parse("http://site.test/img/logo.png").unwrap(),
            None,
            Some("image/png"),
            vec![0x89, b'P', b'N', b'G'],
        );
        assert!(!resource.process(&mut tracker).unwrap());
        assert_eq!(resource.content(), [0x89, b'P', b'N', b'G']);
    }
}
