//! Read-only view of the host content system.
//!
//! The exporter never owns pages, sites or users; it asks a [`ContentModel`]
//! how URLs map onto publishable items and which cache tags a change touches.

use std::time::Duration;

use url::Url;

use crate::{ContentKey, ItemId, Scope, SiteId, UserId};

pub const HTML_CONTENT_TYPE: &str = "text/html";

/// Outcome of mapping a URL onto the host's routing table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    NotResolved,
    /// A static resource served by the host (file, stylesheet, image...).
    Resource { content_type: Option<String> },
    /// A publishable item. `site` is set when the item belongs to exactly
    /// one site.
    Publishable {
        item: ItemId,
        content_type: Option<String>,
        site: Option<SiteId>,
    },
}

impl Resolution {
    pub fn publishable(&self) -> Option<ItemId> {
        match self {
            Self::Publishable { item, .. } => Some(*item),
            _ => None,
        }
    }

    pub fn content_type(&self) -> Option<&str> {
        match self {
            Self::Resource { content_type } | Self::Publishable { content_type, .. } => {
                content_type.as_deref()
            }
            Self::NotResolved => None,
        }
    }

    pub fn site(&self) -> Option<SiteId> {
        match self {
            Self::Publishable { site, .. } => *site,
            _ => None,
        }
    }

    /// Whether this resolves to a page. Publishables without a declared
    /// content type are documents.
    pub fn is_html_page(&self, hint: Option<&str>) -> bool {
        match self {
            Self::Publishable { content_type, .. } => {
                hint.or(content_type.as_deref()).unwrap_or(HTML_CONTENT_TYPE)
                    == HTML_CONTENT_TYPE
            }
            _ => false,
        }
    }
}

pub trait ContentModel: Send + Sync {
    /// Absolute URL rendering `item` in `language`.
    fn item_url(&self, item: ItemId, language: &str) -> Option<Url>;

    fn resolve(&self, url: &Url) -> Resolution;

    /// Canonical form of a URL that resolves to a publishable, keeping any
    /// extra path and query beyond the item's own mapping.
    fn canonical_url(&self, url: &Url, language: Option<&str>) -> Url;

    /// Whether `host` serves one of the configured sites.
    fn is_site_host(&self, host: &str) -> bool;

    fn invalidation_scope(
        &self,
        item: ItemId,
        language: Option<&str>,
        cache_part: Option<&str>,
    ) -> Scope;

    /// Every (item, language) pair that should exist in a full export.
    fn exportable_content(&self) -> Vec<ContentKey>;
}

/// Issues the credentials an export presents when it fetches restricted
/// content on behalf of a user.
pub trait TokenIssuer: Send + Sync {
    fn issue_token(&self, user: UserId, lifetime: Duration) -> Option<String>;
    fn revoke_token(&self, token: &str);
}

/// Issuer for hosts without authentication; exports always run anonymously.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullTokenIssuer;

impl TokenIssuer for NullTokenIssuer {
    fn issue_token(&self, _user: UserId, _lifetime: Duration) -> Option<String> {
        None
    }

    fn revoke_token(&self, _token: &str) {}
}
