use sitexport_core::{ContentModel, ItemId};
use url::Url;

/// Extension points of an export job. Every method has a default, so
/// implementors only override what they customize.
pub trait ExportHooks: Send + Sync {
    /// URLs fetched for one task. Defaults to the item's own URL in
    /// `language`.
    fn export_urls(&self, model: &dyn ContentModel, item: ItemId, language: &str) -> Vec<Url> {
        model.item_url(item, language).into_iter().collect()
    }

    /// Whether a link from `resource` to `url` should point at the
    /// destination's public URL instead of a relative path.
    fn should_make_url_absolute(&self, _url: &Url, _resource: &Url) -> bool {
        false
    }

    /// Last chance to alter the output location computed for `url`.
    fn adjust_export_path(&self, _url: &Url, path: Vec<String>) -> Vec<String> {
        path
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultHooks;

impl ExportHooks for DefaultHooks {}
