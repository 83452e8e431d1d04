use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::ModelError;

pub type ItemId = u64;
pub type ExportId = u64;
pub type DestinationId = u64;
pub type SiteId = u64;
pub type UserId = u64;

/// One exported entry: a publishable item rendered in one language.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ContentKey {
    pub item: ItemId,
    pub language: String,
}

impl ContentKey {
    pub fn new(item: ItemId, language: impl Into<String>) -> Self {
        Self {
            item,
            language: language.into(),
        }
    }
}

impl fmt::Display for ContentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.language.is_empty() {
            write!(f, "#{}", self.item)
        } else {
            write!(f, "#{} ({})", self.item, self.language)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskAction {
    Post,
    Delete,
}

impl TaskAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Post => "post",
            Self::Delete => "delete",
        }
    }
}

impl fmt::Display for TaskAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskAction {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "post" => Ok(Self::Post),
            "delete" => Ok(Self::Delete),
            other => Err(ModelError::InvalidAction(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Pending,
    Failed,
    Success,
}

impl TaskState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Failed => "failed",
            Self::Success => "success",
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub item: ItemId,
    pub language: String,
    pub action: TaskAction,
    pub state: TaskState,
    pub error_message: Option<String>,
}

impl Task {
    pub fn new(action: TaskAction, item: ItemId, language: impl Into<String>) -> Self {
        Self {
            item,
            language: language.into(),
            action,
            state: TaskState::Pending,
            error_message: None,
        }
    }

    pub fn key(&self) -> ContentKey {
        ContentKey::new(self.item, self.language.clone())
    }

    pub fn is_pending(&self) -> bool {
        self.state == TaskState::Pending
    }

    pub fn mark_success(&mut self) {
        self.state = TaskState::Success;
        self.error_message = None;
    }

    pub fn mark_failed(&mut self, message: impl Into<String>) {
        self.state = TaskState::Failed;
        self.error_message = Some(message.into());
    }

    pub fn reset(&mut self) {
        self.state = TaskState::Pending;
        self.error_message = None;
    }
}
