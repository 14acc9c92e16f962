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

//! Workflow controller (spec.md §4.E.3): renders a workflow's template
//! into `status.tasks`, drives `Pending -> Preparing -> Running -> Post
//! -> Succeeded | Failed`, uses a `BmcJob` as a side effect while
//! `Preparing` to apply one-time-PXE/power-cycle boot options, and
//! enforces the workflow's overall timeout while `Running`.

use std::time::Duration;

use anvil_backend::WorkflowBackend;
use anvil_model::{
    ActionState, BmcJob, BmcJobConditionKind, BmcJobSpec, BmcJobStatus, BootDevice, BootOptions, ObjectKey,
    PowerAction, TaskAction, Workflow, WorkflowState,
};
use chrono::Utc;

use crate::reconcile::{ReconcileError, ReconcileQueue, Requeue};
use crate::template::{TemplateStore, WorkflowControllerError, render_template};

/// Poll interval while waiting on the boot-prep `BmcJob` (spec.md §5's
/// 3-second BMC power-poll interval, reused here for the same reason:
/// there is nothing to do until the job's own reconcile advances it).
const BOOT_PREP_POLL: Duration = Duration::from_secs(3);

/// Reconciles a single `Workflow`: one state-machine step per call.
pub async fn reconcile_workflow(
    backend: &dyn WorkflowBackend,
    templates: &dyn TemplateStore,
    key: &ObjectKey,
    jobs: &ReconcileQueue,
) -> Result<Requeue, ReconcileError> {
    let mut workflow = match backend.get_workflow(key).await {
        Ok(workflow) => workflow,
        Err(e) if e.is_not_found() => return Ok(Requeue::None),
        Err(e) => return Err(ReconcileError(format!("get workflow {key}: {e}"))),
    };

    if workflow.status.state.is_terminal() {
        return Ok(Requeue::None);
    }

    match workflow.status.state {
        WorkflowState::Pending => reconcile_pending(backend, templates, &mut workflow).await,
        WorkflowState::Preparing => reconcile_preparing(backend, &mut workflow, jobs).await,
        WorkflowState::Running => reconcile_running(backend, &mut workflow).await,
        WorkflowState::Post => reconcile_post(backend, &mut workflow).await,
        WorkflowState::Succeeded | WorkflowState::Failed => Ok(Requeue::None),
    }
}

async fn reconcile_pending(
    backend: &dyn WorkflowBackend,
    templates: &dyn TemplateStore,
    workflow: &mut Workflow,
) -> Result<Requeue, ReconcileError> {
    let template = templates
        .get(&workflow.spec.template_ref)
        .ok_or_else(|| ReconcileError(WorkflowControllerError::UnknownTemplate(workflow.spec.template_ref.clone()).to_string()))?;

    let tasks = render_template(&template, &workflow.spec.template_params, &workflow.spec.hardware_ref)
        .map_err(|e| ReconcileError(e.to_string()))?;

    workflow.status.tasks = tasks;
    workflow.status.started_at = Some(Utc::now());
    workflow.status.last_transition = Some(Utc::now());

    let needs_preparing = workflow.spec.boot_options.as_ref().is_some_and(|b| b.one_time_pxe || b.power_cycle);
    workflow.status.state = if needs_preparing { WorkflowState::Preparing } else { WorkflowState::Running };

    backend.write_workflow(workflow.clone()).await.map_err(|e| ReconcileError(e.to_string()))?;
    Ok(Requeue::After(Duration::ZERO))
}

fn boot_prep_job_name(workflow_name: &str) -> String {
    format!("{workflow_name}-boot-prep")
}

async fn reconcile_preparing(
    backend: &dyn WorkflowBackend,
    workflow: &mut Workflow,
    jobs: &ReconcileQueue,
) -> Result<Requeue, ReconcileError> {
    let job_key = ObjectKey::new(workflow.namespace.clone(), boot_prep_job_name(&workflow.name));

    match backend.get_job(&job_key).await {
        Ok(job) => {
            if job.status.has_condition(BmcJobConditionKind::Completed) {
                workflow.status.state = WorkflowState::Running;
                workflow.status.last_transition = Some(Utc::now());
                backend.write_workflow(workflow.clone()).await.map_err(|e| ReconcileError(e.to_string()))?;
                Ok(Requeue::After(Duration::ZERO))
            } else if job.status.has_condition(BmcJobConditionKind::Failed) {
                let message = job
                    .status
                    .conditions
                    .iter()
                    .find(|c| c.kind == BmcJobConditionKind::Failed)
                    .and_then(|c| c.message.clone());
                workflow.status.state = WorkflowState::Failed;
                workflow.status.last_transition = Some(Utc::now());
                if let Some(message) = message {
                    workflow.status.conditions.push(anvil_model::WorkflowCondition { kind: "BootPrepFailed".to_string(), message: Some(message) });
                }
                backend.write_workflow(workflow.clone()).await.map_err(|e| ReconcileError(e.to_string()))?;
                Ok(Requeue::None)
            } else {
                Ok(Requeue::After(BOOT_PREP_POLL))
            }
        }
        Err(e) if e.is_not_found() => create_boot_prep_job(backend, workflow, &job_key, jobs).await,
        Err(e) => Err(ReconcileError(format!("get boot-prep job {job_key}: {e}"))),
    }
}

async fn create_boot_prep_job(
    backend: &dyn WorkflowBackend,
    workflow: &mut Workflow,
    job_key: &ObjectKey,
    jobs: &ReconcileQueue,
) -> Result<Requeue, ReconcileError> {
    let boot_options = workflow.spec.boot_options.clone().unwrap_or(BootOptions {
        boot_mode: String::new(),
        one_time_pxe: false,
        power_cycle: false,
    });

    let mut tasks = Vec::new();
    if boot_options.one_time_pxe {
        tasks.push(TaskAction::OneTimeBootDevice {
            device: BootDevice::Pxe,
            efi_boot: boot_options.boot_mode.eq_ignore_ascii_case("uefi"),
        });
    }
    if boot_options.power_cycle {
        tasks.push(TaskAction::Power(PowerAction::Cycle));
    }

    if tasks.is_empty() {
        workflow.status.state = WorkflowState::Running;
        workflow.status.last_transition = Some(Utc::now());
        backend.write_workflow(workflow.clone()).await.map_err(|e| ReconcileError(e.to_string()))?;
        return Ok(Requeue::After(Duration::ZERO));
    }

    let job = BmcJob {
        namespace: job_key.namespace.clone(),
        name: job_key.name.clone(),
        spec: BmcJobSpec { machine_ref: ObjectKey::new(workflow.namespace.clone(), workflow.spec.hardware_ref.clone()), tasks },
        status: BmcJobStatus::default(),
    };
    backend.write_job(job).await.map_err(|e| ReconcileError(e.to_string()))?;
    jobs.enqueue(job_key.clone());
    Ok(Requeue::After(BOOT_PREP_POLL))
}

async fn reconcile_running(backend: &dyn WorkflowBackend, workflow: &mut Workflow) -> Result<Requeue, ReconcileError> {
    let Some(timeout_seconds) = workflow.spec.timeout_seconds.filter(|s| *s > 0) else {
        return Ok(Requeue::None);
    };
    let Some(started_at) = workflow.status.started_at else {
        return Ok(Requeue::None);
    };

    let elapsed = Utc::now().signed_duration_since(started_at).to_std().unwrap_or_default();
    let budget = Duration::from_secs(timeout_seconds);
    if elapsed < budget {
        return Ok(Requeue::After(budget - elapsed));
    }

    if let Some((task_index, action_index)) = workflow.current_position() {
        workflow.status.tasks[task_index].actions[action_index].state = ActionState::Timeout;
    }
    workflow.status.state = WorkflowState::Failed;
    workflow.status.last_transition = Some(Utc::now());
    backend.write_workflow(workflow.clone()).await.map_err(|e| ReconcileError(e.to_string()))?;
    Ok(Requeue::None)
}

/// `Post` gates agent-visible actions while boot options are undone
/// (spec.md §3). One-time PXE clears itself on the next boot and the
/// power cycle already happened in `Preparing`, so this workspace has
/// nothing further to reverse; `Post` advances straight to `Succeeded`.
/// Decided as part of SPEC_FULL.md's Open Question pass - see DESIGN.md.
async fn reconcile_post(backend: &dyn WorkflowBackend, workflow: &mut Workflow) -> Result<Requeue, ReconcileError> {
    workflow.status.state = WorkflowState::Succeeded;
    workflow.status.last_transition = Some(Utc::now());
    backend.write_workflow(workflow.clone()).await.map_err(|e| ReconcileError(e.to_string()))?;
    Ok(Requeue::None)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use anvil_backend::InMemoryWorkflowBackend;
    use anvil_model::{WorkflowSpec, WorkflowStatus};

    use super::*;
    use crate::template::{ActionTemplate, InMemoryTemplateStore, TaskTemplate, WorkflowTemplate};

    fn workflow(boot_options: Option<BootOptions>) -> Workflow {
        Workflow {
            namespace: "default".to_string(),
            name: "wf-1".to_string(),
            spec: WorkflowSpec {
                hardware_ref: "hw-1".to_string(),
                template_ref: "install".to_string(),
                template_params: HashMap::new(),
                timeout_seconds: None,
                boot_options,
            },
            status: WorkflowStatus::default(),
        }
    }

    fn simple_template() -> WorkflowTemplate {
        WorkflowTemplate {
            tasks: vec![TaskTemplate {
                name: "install".to_string(),
                actions: vec![ActionTemplate {
                    name: "write-image".to_string(),
                    image: "osie:latest".to_string(),
                    command: None,
                    environment: HashMap::new(),
                    volumes: vec![],
                    timeout_seconds: 1800,
                    pid_namespace: false,
                }],
            }],
        }
    }

    #[tokio::test]
    async fn pending_without_boot_options_renders_tasks_and_goes_running() {
        let backend = InMemoryWorkflowBackend::new();
        backend.seed_workflow(workflow(None));
        let templates = InMemoryTemplateStore::new();
        templates.insert("install", simple_template());
        let (jobs, _rx) = ReconcileQueue::new();

        reconcile_workflow(backend.as_ref(), &templates, &ObjectKey::new("default", "wf-1"), &jobs).await.unwrap();

        let updated = backend.get_workflow(&ObjectKey::new("default", "wf-1")).await.unwrap();
        assert_eq!(updated.status.state, WorkflowState::Running);
        assert_eq!(updated.status.tasks.len(), 1);
    }

    #[tokio::test]
    async fn pending_with_boot_options_goes_preparing_then_creates_job() {
        let backend = InMemoryWorkflowBackend::new();
        backend.seed_workflow(workflow(Some(BootOptions {
            boot_mode: "uefi".to_string(),
            one_time_pxe: true,
            power_cycle: true,
        })));
        let templates = InMemoryTemplateStore::new();
        templates.insert("install", simple_template());
        let (jobs, mut jobs_rx) = ReconcileQueue::new();
        let key = ObjectKey::new("default", "wf-1");

        reconcile_workflow(backend.as_ref(), &templates, &key, &jobs).await.unwrap();
        let after_render = backend.get_workflow(&key).await.unwrap();
        assert_eq!(after_render.status.state, WorkflowState::Preparing);

        reconcile_workflow(backend.as_ref(), &templates, &key, &jobs).await.unwrap();
        let job = backend.get_job(&ObjectKey::new("default", "wf-1-boot-prep")).await.unwrap();
        assert_eq!(job.spec.tasks, vec![
            TaskAction::OneTimeBootDevice { device: BootDevice::Pxe, efi_boot: true },
            TaskAction::Power(PowerAction::Cycle),
        ]);
        assert_eq!(jobs_rx.try_recv().unwrap(), ObjectKey::new("default", "wf-1-boot-prep"));
    }

    #[tokio::test]
    async fn preparing_advances_to_running_once_job_completes() {
        let backend = InMemoryWorkflowBackend::new();
        let mut wf = workflow(Some(BootOptions { boot_mode: "uefi".to_string(), one_time_pxe: true, power_cycle: false }));
        wf.status.state = WorkflowState::Preparing;
        backend.seed_workflow(wf);

        let mut job = BmcJob {
            namespace: "default".to_string(),
            name: "wf-1-boot-prep".to_string(),
            spec: BmcJobSpec {
                machine_ref: ObjectKey::new("default", "hw-1"),
                tasks: vec![TaskAction::OneTimeBootDevice { device: BootDevice::Pxe, efi_boot: true }],
            },
            status: BmcJobStatus::default(),
        };
        job.status.set_condition(BmcJobConditionKind::Completed, None);
        backend.write_job(job).await.unwrap();

        let templates = InMemoryTemplateStore::new();
        let (jobs, _rx) = ReconcileQueue::new();
        reconcile_workflow(backend.as_ref(), &templates, &ObjectKey::new("default", "wf-1"), &jobs).await.unwrap();

        let updated = backend.get_workflow(&ObjectKey::new("default", "wf-1")).await.unwrap();
        assert_eq!(updated.status.state, WorkflowState::Running);
    }

    #[tokio::test]
    async fn running_workflow_times_out_and_marks_current_action_timeout() {
        let backend = InMemoryWorkflowBackend::new();
        let mut wf = workflow(None);
        wf.spec.timeout_seconds = Some(60);
        wf.status.state = WorkflowState::Running;
        wf.status.started_at = Some(Utc::now() - chrono::Duration::seconds(120));
        wf.status.tasks = render_template(&simple_template(), &HashMap::new(), "worker").unwrap();
        wf.status.tasks[0].actions[0].state = ActionState::Running;
        wf.status.current_state = Some(anvil_model::CurrentState {
            worker_id: "worker".to_string(),
            task_id: "task-0".to_string(),
            action_id: "task-0-a0".to_string(),
            action_name: "write-image".to_string(),
            state: ActionState::Running,
        });
        backend.seed_workflow(wf);

        let templates = InMemoryTemplateStore::new();
        let (jobs, _rx) = ReconcileQueue::new();
        reconcile_workflow(backend.as_ref(), &templates, &ObjectKey::new("default", "wf-1"), &jobs).await.unwrap();

        let updated = backend.get_workflow(&ObjectKey::new("default", "wf-1")).await.unwrap();
        assert_eq!(updated.status.state, WorkflowState::Failed);
        assert_eq!(updated.status.tasks[0].actions[0].state, ActionState::Timeout);
    }

    #[tokio::test]
    async fn post_advances_to_succeeded() {
        let backend = InMemoryWorkflowBackend::new();
        let mut wf = workflow(None);
        wf.status.state = WorkflowState::Post;
        backend.seed_workflow(wf);

        let templates = InMemoryTemplateStore::new();
        let (jobs, _rx) = ReconcileQueue::new();
        reconcile_workflow(backend.as_ref(), &templates, &ObjectKey::new("default", "wf-1"), &jobs).await.unwrap();

        let updated = backend.get_workflow(&ObjectKey::new("default", "wf-1")).await.unwrap();
        assert_eq!(updated.status.state, WorkflowState::Succeeded);
    }
}
