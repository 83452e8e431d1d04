use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{
    ContentKey, Destination, DestinationId, ExportId, ItemId, ModelError, Task, TaskAction,
    TaskState, UserId,
};

/// Lifetime of the token issued when an export runs as a user.
pub const AUTH_TOKEN_LIFETIME: Duration = Duration::from_secs(2 * 60 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportState {
    Idle,
    Running,
    Completed,
}

impl ExportState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Completed => "completed",
        }
    }
}

impl fmt::Display for ExportState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A batch of tasks targeting one destination.
///
/// Tasks are keyed by [`ContentKey`] and iterate in key order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Export {
    id: ExportId,
    destination: DestinationId,
    pub user: Option<UserId>,
    state: ExportState,
    tasks: BTreeMap<ContentKey, Task>,
    auth_token: Option<String>,
    pub archive_path: Option<PathBuf>,
}

impl Export {
    pub fn new(id: ExportId, destination: DestinationId) -> Self {
        Self {
            id,
            destination,
            user: None,
            state: ExportState::Idle,
            tasks: BTreeMap::new(),
            auth_token: None,
            archive_path: None,
        }
    }

    pub fn id(&self) -> ExportId {
        self.id
    }

    pub fn destination(&self) -> DestinationId {
        self.destination
    }

    pub fn state(&self) -> ExportState {
        self.state
    }

    pub fn auth_token(&self) -> Option<&str> {
        self.auth_token.as_deref()
    }

    /// Adds a task, or overwrites the action of an existing one with the same
    /// key and puts it back into the pending state.
    pub fn add_task(
        &mut self,
        action: TaskAction,
        item: ItemId,
        language: impl Into<String>,
    ) -> &Task {
        let key = ContentKey::new(item, language);
        let task = self
            .tasks
            .entry(key.clone())
            .or_insert_with(|| Task::new(action, key.item, key.language.clone()));
        task.action = action;
        task.reset();
        task
    }

    pub fn task(&self, key: &ContentKey) -> Option<&Task> {
        self.tasks.get(key)
    }

    pub fn task_mut(&mut self, key: &ContentKey) -> Result<&mut Task, ModelError> {
        self.tasks
            .get_mut(key)
            .ok_or_else(|| ModelError::UnknownTask(key.clone()))
    }

    pub fn tasks(&self) -> impl Iterator<Item = &Task> {
        self.tasks.values()
    }

    pub fn task_keys(&self) -> Vec<ContentKey> {
        self.tasks.keys().cloned().collect()
    }

    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    pub fn count_in_state(&self, state: TaskState) -> usize {
        self.tasks.values().filter(|task| task.state == state).count()
    }

    /// Fraction of tasks that are no longer pending.
    pub fn progress(&self) -> f64 {
        let total = self.tasks.len();
        if total == 0 {
            return 0.0;
        }
        let processed = total - self.count_in_state(TaskState::Pending);
        processed as f64 / total as f64
    }

    /// Seeds tasks from the destination's pending index. Pending additions
    /// and modifications become `post` tasks, deletions become `delete`.
    pub fn add_pending_tasks(
        &mut self,
        destination: &Destination,
        item: Option<ItemId>,
        languages: Option<&[String]>,
    ) -> usize {
        let pending: Vec<_> = destination.iter_pending_tasks(item, languages).collect();
        for entry in &pending {
            self.add_task(entry.action.task_action(), entry.item, entry.language.clone());
        }
        pending.len()
    }

    /// The user an auth token must be issued for before running, if any.
    pub fn needs_auth_token(&self) -> Option<UserId> {
        match (self.user, &self.auth_token) {
            (Some(user), None) => Some(user),
            _ => None,
        }
    }

    /// `idle -> running`. With `reset`, every task goes back to pending.
    pub fn begin_run(&mut self, reset: bool, token: Option<String>) -> Result<(), ModelError> {
        if self.state != ExportState::Idle {
            return Err(ModelError::InvalidTransition {
                from: self.state,
                to: ExportState::Running,
            });
        }
        self.state = ExportState::Running;
        if reset {
            self.tasks.values_mut().for_each(Task::reset);
        }
        if self.auth_token.is_none() {
            self.auth_token = token;
        }
        Ok(())
    }

    /// `running -> completed`. Returns the auth token that must now be
    /// revoked; the export forgets it so it is handed out only once.
    pub fn complete(&mut self) -> Result<Option<String>, ModelError> {
        self.leave_running(ExportState::Completed)?;
        Ok(self.auth_token.take())
    }

    /// `running -> idle`, after a job-level failure.
    pub fn fail(&mut self) -> Result<(), ModelError> {
        self.leave_running(ExportState::Idle)
    }

    /// Externally stops a running export; the engine halts before its next
    /// task.
    pub fn cancel(&mut self) -> Result<(), ModelError> {
        self.leave_running(ExportState::Idle)
    }

    /// `completed -> idle` with every task pending again, so a finished
    /// export can be replayed.
    pub fn reopen(&mut self) -> Result<(), ModelError> {
        if self.state != ExportState::Completed {
            return Err(ModelError::InvalidTransition {
                from: self.state,
                to: ExportState::Idle,
            });
        }
        self.state = ExportState::Idle;
        self.tasks.values_mut().for_each(Task::reset);
        Ok(())
    }

    fn leave_running(&mut self, to: ExportState) -> Result<(), ModelError> {
        if self.state != ExportState::Running {
            return Err(ModelError::InvalidTransition {
                from: self.state,
                to,
            });
        }
        self.state = to;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{DestinationConfig, PendingAction};

    #[test]
    fn re_adding_a_task_overwrites_action_and_state() {
        let mut export = Export::new(1, 1);
        export.add_task(TaskAction::Post, 10, "en");
        export
            .task_mut(&ContentKey::new(10, "en"))
            .unwrap()
            .mark_failed("timeout");

        export.add_task(TaskAction::Delete, 10, "en");

        assert_eq!(export.task_count(), 1);
        let task = export.task(&ContentKey::new(10, "en")).unwrap();
        assert_eq!(task.action, TaskAction::Delete);
        assert_eq!(task.state, TaskState::Pending);
        assert_eq!(task.error_message, None);
    }

    #[test]
    fn progress_counts_processed_tasks() {
        let mut export = Export::new(1, 1);
        assert_eq!(export.progress(), 0.0);
        export.add_task(TaskAction::Post, 1, "en");
        export.add_task(TaskAction::Post, 2, "en");
        export
            .task_mut(&ContentKey::new(1, "en"))
            .unwrap()
            .mark_success();
        assert_eq!(export.progress(), 0.5);
    }

    #[test]
    fn state_machine_only_allows_documented_transitions() {
        let mut export = Export::new(1, 1);
        assert!(export.complete().is_err());
        export.begin_run(false, None).unwrap();
        assert!(export.begin_run(false, None).is_err());
        export.fail().unwrap();
        assert_eq!(export.state(), ExportState::Idle);
        export.begin_run(false, None).unwrap();
        export.complete().unwrap();
        assert_eq!(export.state(), ExportState::Completed);
        assert!(export.begin_run(false, None).is_err());
        export.reopen().unwrap();
        assert_eq!(export.state(), ExportState::Idle);
    }

    #[test]
    fn auth_token_is_handed_back_once_on_completion() {
        let mut export = Export::new(1, 1);
        export.user = Some(99);
        assert_eq!(export.needs_auth_token(), Some(99));

        export.begin_run(false, Some("secret".into())).unwrap();
        assert_eq!(export.auth_token(), Some("secret"));
        assert_eq!(export.needs_auth_token(), None);

        assert_eq!(export.complete().unwrap(), Some("secret".to_string()));
        assert_eq!(export.auth_token(), None);
    }

    #[test]
    fn reset_puts_every_task_back_to_pending() {
        let mut export = Export::new(1, 1);
        export.add_task(TaskAction::Post, 1, "en");
        export
            .task_mut(&ContentKey::new(1, "en"))
            .unwrap()
            .mark_success();

        export.begin_run(true, None).unwrap();
        assert_eq!(export.count_in_state(TaskState::Pending), 1);
    }

    #[test]
    fn pending_index_seeds_tasks() {
        let mut destination = Destination::new(1, DestinationConfig::memory("dest")).unwrap();
        destination.set_pending_task(1, "en", Some(PendingAction::Modify));
        destination.set_pending_task(2, "en", Some(PendingAction::Delete));
        destination.set_pending_task(2, "es", Some(PendingAction::Add));

        let mut export = Export::new(1, 1);
        let languages = vec!["en".to_string()];
        assert_eq!(export.add_pending_tasks(&destination, None, Some(&languages)), 2);

        let tasks: Vec<_> = export
            .tasks()
            .map(|task| (task.item, task.language.as_str(), task.action))
            .collect();
        assert_eq!(
            tasks,
            vec![(1, "en", TaskAction::Post), (2, "en", TaskAction::Delete)]
        );
    }
}
