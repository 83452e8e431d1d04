use serde::{Deserialize, Serialize};

use crate::ModelError;

/// The part of the exported content affected by a change in the host system.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Scope {
    /// Every exportable entry.
    Everything,
    /// Entries registered under a single cache tag.
    Tag(String),
    /// Entries registered under all of the given tags.
    Intersection(Vec<String>),
    /// The union of several sub-scopes.
    Union(Vec<Scope>),
}

impl Scope {
    pub fn tag(tag: impl Into<String>) -> Self {
        Self::Tag(tag.into())
    }

    pub fn intersection<I, S>(tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Intersection(tags.into_iter().map(Into::into).collect())
    }

    /// Rejects shapes that cannot select anything meaningful.
    pub fn validate(&self) -> Result<(), ModelError> {
        match self {
            Self::Everything => Ok(()),
            Self::Tag(tag) if tag.is_empty() => {
                Err(ModelError::InvalidScope("empty tag".into()))
            }
            Self::Tag(_) => Ok(()),
            Self::Intersection(tags) if tags.is_empty() => Err(ModelError::InvalidScope(
                "intersection without tags".into(),
            )),
            Self::Intersection(tags) => {
                if tags.iter().any(String::is_empty) {
                    Err(ModelError::InvalidScope("empty tag in intersection".into()))
                } else {
                    Ok(())
                }
            }
            Self::Union(scopes) => scopes.iter().try_for_each(Scope::validate),
        }
    }
}

/// Cache tag conventionally attached to everything rendered from `item`.
pub fn item_tag(item: crate::ItemId) -> String {
    format!("item-{item}")
}
