/*
 * SPDX-FileCopyrightText: Copyright (c) 2026 Anvil Project Contributors
 * SPDX-License-Identifier: Apache-2.0
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 * http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 */

//! Workflow template rendering (spec.md §4.E.3; SPEC_FULL.md supplement
//! 3): a small explicit table of `{task_name, actions: [...]}`
//! substituted with `spec.templateParams`, reflecting the minimal
//! templating the original `tink` CRDs perform before the state machine
//! takes over.

use std::collections::HashMap;
use std::sync::RwLock;

use anvil_model::{Action, ActionState, Task};

#[derive(Debug, thiserror::Error)]
pub enum WorkflowControllerError {
    #[error("unknown workflow template {0:?}")]
    UnknownTemplate(String),
    #[error("template rendering failed: {0}")]
    Template(String),
}

/// One action in a [`TaskTemplate`], with `{{param}}` placeholders in
/// its string fields resolved against `spec.templateParams` at render
/// time.
#[derive(Debug, Clone)]
pub struct ActionTemplate {
    pub name: String,
    pub image: String,
    pub command: Option<Vec<String>>,
    pub environment: HashMap<String, String>,
    pub volumes: Vec<String>,
    pub timeout_seconds: u64,
    pub pid_namespace: bool,
}

#[derive(Debug, Clone)]
pub struct TaskTemplate {
    pub name: String,
    pub actions: Vec<ActionTemplate>,
}

/// A named, ordered list of task templates (spec.md §4.E.3: "renders
/// action lists into `status.tasks` from the referenced template").
#[derive(Debug, Clone, Default)]
pub struct WorkflowTemplate {
    pub tasks: Vec<TaskTemplate>,
}

/// Lookup of a [`WorkflowTemplate`] by `spec.templateRef`. The concrete
/// store (a ConfigMap, a file, a database row) is an external
/// collaborator; this crate only defines the lookup contract and an
/// in-memory reference implementation for tests and `--backend=none`
/// standalone runs.
pub trait TemplateStore: Send + Sync {
    fn get(&self, template_ref: &str) -> Option<WorkflowTemplate>;
}

#[derive(Default)]
pub struct InMemoryTemplateStore {
    templates: RwLock<HashMap<String, WorkflowTemplate>>,
}

impl InMemoryTemplateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, template_ref: impl Into<String>, template: WorkflowTemplate) {
        self.templates.write().expect("lock not poisoned").insert(template_ref.into(), template);
    }
}

impl TemplateStore for InMemoryTemplateStore {
    fn get(&self, template_ref: &str) -> Option<WorkflowTemplate> {
        self.templates.read().expect("lock not poisoned").get(template_ref).cloned()
    }
}

/// Renders `template` into the ordered `Task` list a fresh workflow's
/// `status.tasks` is seeded with, substituting `{{key}}` placeholders
/// in every string field from `params` and assigning `worker_addr` to
/// every rendered task.
pub fn render_template(
    template: &WorkflowTemplate,
    params: &HashMap<String, String>,
    worker_addr: &str,
) -> Result<Vec<Task>, WorkflowControllerError> {
    let mut context = tera::Context::new();
    for (key, value) in params {
        context.insert(key, value);
    }

    template
        .tasks
        .iter()
        .enumerate()
        .map(|(task_index, task_tmpl)| render_task(task_index, task_tmpl, &context, worker_addr))
        .collect()
}

fn render_task(
    task_index: usize,
    task_tmpl: &TaskTemplate,
    context: &tera::Context,
    worker_addr: &str,
) -> Result<Task, WorkflowControllerError> {
    let task_id = format!("task-{task_index}");
    let actions = task_tmpl
        .actions
        .iter()
        .enumerate()
        .map(|(action_index, action_tmpl)| render_action(&task_id, action_index, action_tmpl, context))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Task { id: task_id, worker_addr: worker_addr.to_string(), environment: HashMap::new(), volumes: vec![], actions })
}

fn render_action(
    task_id: &str,
    action_index: usize,
    action_tmpl: &ActionTemplate,
    context: &tera::Context,
) -> Result<Action, WorkflowControllerError> {
    let command = action_tmpl
        .command
        .as_ref()
        .map(|cmd| cmd.iter().map(|part| render_string(part, context)).collect::<Result<Vec<_>, _>>())
        .transpose()?;
    let environment = action_tmpl
        .environment
        .iter()
        .map(|(k, v)| Ok((k.clone(), render_string(v, context)?)))
        .collect::<Result<HashMap<_, _>, WorkflowControllerError>>()?;
    let volumes =
        action_tmpl.volumes.iter().map(|v| render_string(v, context)).collect::<Result<Vec<_>, _>>()?;

    Ok(Action {
        id: format!("{task_id}-a{action_index}"),
        name: render_string(&action_tmpl.name, context)?,
        image: render_string(&action_tmpl.image, context)?,
        command,
        environment,
        volumes,
        timeout_seconds: action_tmpl.timeout_seconds,
        pid_namespace: action_tmpl.pid_namespace,
        state: ActionState::Pending,
        execution_start: None,
        execution_stop: None,
        execution_duration_seconds: None,
        message: None,
    })
}

fn render_string(input: &str, context: &tera::Context) -> Result<String, WorkflowControllerError> {
    tera::Tera::one_off(input, context, false).map_err(|e| WorkflowControllerError::Template(e.to_string()))
}
