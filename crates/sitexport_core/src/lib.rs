//! Site export core: export records, destinations and their invalidation
//! indexes. Pure data and policy; all IO lives in `sitexport_engine`.
mod destination;
mod error;
mod export;
mod model;
mod scope;
mod static_model;
mod task;

pub use destination::{
    path_segments, Destination, DestinationConfig, DestinationKind, PendingAction, PendingTask,
    DEFAULT_PAGE_EXTENSION, INDEX_SEGMENT,
};
pub use error::{ConfigError, ModelError};
pub use export::{Export, ExportState, AUTH_TOKEN_LIFETIME};
pub use model::{
    ContentModel, NullTokenIssuer, Resolution, TokenIssuer, HTML_CONTENT_TYPE,
};
pub use scope::{item_tag, Scope};
pub use static_model::StaticContentModel;
pub use task::{
    ContentKey, DestinationId, ExportId, ItemId, SiteId, Task, TaskAction, TaskState, UserId,
};
