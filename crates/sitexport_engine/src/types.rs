use std::fmt;

use serde::{Deserialize, Serialize};
use sitexport_core::{ContentKey, ExportId};

/// `User-Agent` sent with every export request.
pub const USER_AGENT: &str = concat!("sitexport/", env!("CARGO_PKG_VERSION"));
/// Identifies the export run a request belongs to.
pub const EXPORT_ID_HEADER: &str = "X-Export-Id";
pub const AUTH_TOKEN_HEADER: &str = "X-Auth-Token";
/// Space separated cache tags attached to a rendered response.
pub const CACHE_TAGS_HEADER: &str = "X-Cache-Tags";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchOutput {
    pub bytes: Vec<u8>,
    pub metadata: FetchMetadata,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchMetadata {
    pub original_url: String,
    pub final_url: String,
    pub redirect_count: usize,
    /// Raw `Content-Type` header, parameters included.
    pub content_type: Option<String>,
    pub cache_tags: Vec<String>,
    pub byte_len: u64,
}

impl FetchMetadata {
    /// The content type without any `;` parameter.
    pub fn media_type(&self) -> Option<String> {
        self.content_type
            .as_deref()
            .map(|value| value.split(';').next().unwrap_or(value).trim())
            .filter(|value| !value.is_empty())
            .map(str::to_ascii_lowercase)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct FetchError {
    pub kind: FailureKind,
    pub message: String,
}

impl FetchError {
    pub(crate) fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureKind {
    InvalidUrl,
    HttpStatus(u16),
    Timeout,
    RedirectLimitExceeded,
    TooLarge { max_bytes: u64, actual: Option<u64> },
    Network,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::InvalidUrl => write!(f, "invalid url"),
            FailureKind::HttpStatus(code) => write!(f, "http status {code}"),
            FailureKind::Timeout => write!(f, "timeout"),
            FailureKind::RedirectLimitExceeded => write!(f, "redirect limit exceeded"),
            FailureKind::TooLarge { max_bytes, actual } => {
                write!(f, "response too large (max {max_bytes}, actual {actual:?})")
            }
            FailureKind::Network => write!(f, "network error"),
        }
    }
}

/// What a job does when a task or dependency fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorMode {
    /// Record the failure and carry on with the next task.
    #[default]
    Resume,
    /// Abort the job on the first failure.
    Raise,
}

/// How a call to [`crate::ExportJob::execute`] ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Completed,
    /// The export stopped being `running` under the job's feet.
    Halted,
    /// A job-level failure under [`ErrorMode::Resume`]; the export is idle.
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportEvent {
    ExportStarting {
        export: ExportId,
    },
    ExportFailed {
        export: ExportId,
        error: String,
    },
    ExportCompleted {
        export: ExportId,
    },
    ExportEnded {
        export: ExportId,
    },
    TaskStarting {
        export: ExportId,
        task: ContentKey,
    },
    TaskExecuted {
        export: ExportId,
        task: ContentKey,
    },
    TaskSucceeded {
        export: ExportId,
        task: ContentKey,
    },
    TaskFailed {
        export: ExportId,
        task: ContentKey,
        error: String,
    },
    DependencyTransfersStarting {
        export: ExportId,
        count: usize,
    },
    DependencyTransferStarting {
        export: ExportId,
        url: String,
    },
    DependencySucceeded {
        export: ExportId,
        url: String,
    },
    DependencyFailed {
        export: ExportId,
        url: String,
        error: String,
    },
}
