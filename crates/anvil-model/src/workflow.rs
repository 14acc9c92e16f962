use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::key::ObjectKey;

/// State of a single action, per spec.md §3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum ActionState {
    Pending,
    Running,
    Success,
    Failed,
    Timeout,
}

impl ActionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, ActionState::Success | ActionState::Failed | ActionState::Timeout)
    }
}

/// Workflow-level state machine, per spec.md §3:
/// `Pending -> Preparing -> Running -> Post -> Succeeded | Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum WorkflowState {
    Pending,
    Preparing,
    Running,
    Post,
    Succeeded,
    Failed,
}

impl WorkflowState {
    pub fn is_terminal(self) -> bool {
        matches!(self, WorkflowState::Succeeded | WorkflowState::Failed)
    }
}

/// One unit of work performed by the agent: a container image, an
/// optional command, per-action environment/volumes, a timeout, and a
/// pid-namespace toggle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Action {
    pub id: String,
    pub name: String,
    pub image: String,
    pub command: Option<Vec<String>>,
    #[serde(default)]
    pub environment: HashMap<String, String>,
    #[serde(default)]
    pub volumes: Vec<String>,
    pub timeout_seconds: u64,
    pub pid_namespace: bool,
    pub state: ActionState,
    pub execution_start: Option<DateTime<Utc>>,
    pub execution_stop: Option<DateTime<Utc>>,
    pub execution_duration_seconds: Option<i64>,
    pub message: Option<String>,
}

/// An ordered list of actions scoped to one worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub worker_addr: String,
    #[serde(default)]
    pub environment: HashMap<String, String>,
    #[serde(default)]
    pub volumes: Vec<String>,
    pub actions: Vec<Action>,
}

impl Task {
    /// Merged environment for `action`: task-scoped keys with
    /// action-scoped keys winning on collision (spec.md §4.E.1).
    pub fn merged_environment(&self, action: &Action) -> HashMap<String, String> {
        let mut env = self.environment.clone();
        env.extend(action.environment.iter().map(|(k, v)| (k.clone(), v.clone())));
        env
    }

    /// Task volumes followed by action volumes (spec.md §4.E.1: "task first").
    pub fn merged_volumes(&self, action: &Action) -> Vec<String> {
        let mut volumes = self.volumes.clone();
        volumes.extend(action.volumes.iter().cloned());
        volumes
    }
}

/// Identifies the most recently served action, mirrored back by
/// `GetAction`/`ReportActionStatus` (spec.md §3, §4.E.1).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrentState {
    pub worker_id: String,
    pub task_id: String,
    pub action_id: String,
    pub action_name: String,
    pub state: ActionState,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowCondition {
    pub kind: String,
    pub message: Option<String>,
}

/// Immutable-after-create portion of a workflow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BootOptions {
    pub boot_mode: String,
    pub one_time_pxe: bool,
    pub power_cycle: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowSpec {
    pub hardware_ref: String,
    pub template_ref: String,
    #[serde(default)]
    pub template_params: HashMap<String, String>,
    pub timeout_seconds: Option<u64>,
    pub boot_options: Option<BootOptions>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowStatus {
    pub state: WorkflowState,
    #[serde(default)]
    pub tasks: Vec<Task>,
    pub current_state: Option<CurrentState>,
    pub started_at: Option<DateTime<Utc>>,
    pub last_transition: Option<DateTime<Utc>>,
    #[serde(default)]
    pub conditions: Vec<WorkflowCondition>,
}

impl Default for WorkflowStatus {
    fn default() -> Self {
        Self {
            state: WorkflowState::Pending,
            tasks: Vec::new(),
            current_state: None,
            started_at: None,
            last_transition: None,
            conditions: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workflow {
    pub namespace: String,
    pub name: String,
    pub spec: WorkflowSpec,
    pub status: WorkflowStatus,
}

impl Workflow {
    pub fn key(&self) -> ObjectKey {
        ObjectKey::new(self.namespace.clone(), self.name.clone())
    }

    /// Looks up the task and action identified by `task_id`/`action_id`,
    /// returning `(task_index, task, action_index)` so callers can advance
    /// state in place while still knowing the task's position for
    /// [`Workflow::is_last_action`].
    pub fn find_action_mut(
        &mut self,
        task_id: &str,
        action_id: &str,
    ) -> Option<(usize, &mut Task, usize)> {
        let (task_index, task) = self.status.tasks.iter_mut().enumerate().find(|(_, t)| t.id == task_id)?;
        let action_index = task.actions.iter().position(|a| a.id == action_id)?;
        Some((task_index, task, action_index))
    }

    /// Returns `(task_index, action_index)` of `current_state.action_id`,
    /// if `current_state` is set and still resolves.
    pub fn current_position(&self) -> Option<(usize, usize)> {
        let cur = self.status.current_state.as_ref()?;
        for (ti, task) in self.status.tasks.iter().enumerate() {
            if task.id != cur.task_id {
                continue;
            }
            if let Some(ai) = task.actions.iter().position(|a| a.id == cur.action_id) {
                return Some((ti, ai));
            }
        }
        None
    }

    /// `true` iff `(task_index, action_index)` is the very last action of
    /// the very last task.
    pub fn is_last_action(&self, task_index: usize, action_index: usize) -> bool {
        task_index + 1 == self.status.tasks.len()
            && action_index + 1 == self.status.tasks[task_index].actions.len()
    }
}
