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

//! BMC job controller (spec.md §4.E.2): fans out ordered `BmcTask`
//! records for a `BmcJob`, one at a time, and watches their completion.
//! Grounded on `rufio/controllers/job_controller.go`'s `reconcile`.

use anvil_backend::WorkflowBackend;
use anvil_model::{BmcJob, BmcJobConditionKind, BmcTask, BmcTaskConditionKind, BmcTaskSpec, BmcTaskStatus, ObjectKey};
use chrono::Utc;

use crate::reconcile::{ReconcileError, ReconcileQueue, Requeue};

/// Reconciles a single `BmcJob`. Mirrors the Go `reconcile` function's
/// control flow step for step, including its early-return-without-
/// patching branch when a child task is still in progress: the queue
/// the caller owns is expected to re-run this reconcile once that
/// task's completion wakes it (see [`crate::bmc_task::reconcile_task`]).
pub async fn reconcile_job(
    backend: &dyn WorkflowBackend,
    key: &ObjectKey,
    tasks: &ReconcileQueue,
) -> Result<Requeue, ReconcileError> {
    let mut job = match backend.get_job(key).await {
        Ok(job) => job,
        Err(e) if e.is_not_found() => return Ok(Requeue::None),
        Err(e) => return Err(ReconcileError(format!("get job {key}: {e}"))),
    };

    if job.status.is_terminal() {
        return Ok(Requeue::None);
    }

    if !job.status.has_condition(BmcJobConditionKind::Running) {
        job.status.start_time = Some(Utc::now());
        job.status.set_condition(BmcJobConditionKind::Running, None);
    }

    let children = backend
        .list_tasks_for_job(key)
        .await
        .map_err(|e| ReconcileError(format!("failed to list owned tasks for job {key}: {e}")))?;

    let mut completed = 0usize;
    for task in &children {
        if task.status.has_condition(BmcTaskConditionKind::Completed) {
            completed += 1;
            continue;
        }

        if task.status.has_condition(BmcTaskConditionKind::Failed) {
            let message = task
                .status
                .conditions
                .iter()
                .find(|c| c.kind == BmcTaskConditionKind::Failed)
                .and_then(|c| c.message.clone())
                .unwrap_or_else(|| format!("task {} failed", task.name));
            job.status.set_condition(BmcJobConditionKind::Failed, Some(message));
            backend.write_job(job).await.map_err(|e| ReconcileError(e.to_string()))?;
            return Ok(Requeue::None);
        }

        // Neither Completed nor Failed: still in progress. Nothing else
        // to do this reconcile; the task controller wakes us again on
        // its next terminal transition.
        return Ok(Requeue::None);
    }

    if completed == job.spec.tasks.len() {
        job.status.completion_time = Some(Utc::now());
        job.status.set_condition(BmcJobConditionKind::Completed, None);
        backend.write_job(job).await.map_err(|e| ReconcileError(e.to_string()))?;
        return Ok(Requeue::None);
    }

    let machine = backend
        .get_machine(&job.spec.machine_ref)
        .await
        .map_err(|e| ReconcileError(format!("get job {key} MachineRef {}: {e}", job.spec.machine_ref)))?;

    let task_index = completed;
    let new_task = BmcTask {
        namespace: job.namespace.clone(),
        name: BmcJob::format_task_name(&job.name, task_index),
        owner_job: job.name.clone(),
        spec: BmcTaskSpec { action: job.spec.tasks[task_index], connection: machine.connection },
        status: BmcTaskStatus::default(),
    };
    let new_task_key = new_task.key();

    if let Err(e) = backend.create_task(new_task).await {
        job.status.set_condition(BmcJobConditionKind::Failed, Some(e.to_string()));
        backend.write_job(job).await.map_err(|e| ReconcileError(e.to_string()))?;
        return Ok(Requeue::None);
    }
    tasks.enqueue(new_task_key);

    backend.write_job(job).await.map_err(|e| ReconcileError(e.to_string()))?;
    Ok(Requeue::None)
}

#[cfg(test)]
mod tests {
    use anvil_backend::InMemoryWorkflowBackend;
    use anvil_model::{BmcJobSpec, BmcJobStatus, Connection, Machine, PowerAction, SecretRef, TaskAction};

    use super::*;

    fn machine() -> Machine {
        Machine {
            namespace: "default".to_string(),
            name: "machine-1".to_string(),
            connection: Connection {
                host: "bmc.example".to_string(),
                port: None,
                auth_secret_ref: SecretRef { namespace: "default".to_string(), name: "machine-1-creds".to_string() },
                insecure_tls: false,
            },
        }
    }

    fn job(tasks: Vec<TaskAction>) -> BmcJob {
        BmcJob {
            namespace: "default".to_string(),
            name: "job-1".to_string(),
            spec: BmcJobSpec { machine_ref: ObjectKey::new("default", "machine-1"), tasks },
            status: BmcJobStatus::default(),
        }
    }

    #[tokio::test]
    async fn first_reconcile_creates_first_task_and_marks_running() {
        let backend = InMemoryWorkflowBackend::new();
        backend.seed_machine(machine());
        backend.write_job(job(vec![TaskAction::Power(PowerAction::Soft), TaskAction::Power(PowerAction::On)])).await.unwrap();

        let (tasks, _rx) = ReconcileQueue::new();
        reconcile_job(backend.as_ref(), &ObjectKey::new("default", "job-1"), &tasks).await.unwrap();

        let updated = backend.get_job(&ObjectKey::new("default", "job-1")).await.unwrap();
        assert!(updated.status.has_condition(BmcJobConditionKind::Running));
        assert!(updated.status.start_time.is_some());

        let created = backend.get_task(&ObjectKey::new("default", "job-1-0")).await.unwrap();
        assert_eq!(created.spec.action, TaskAction::Power(PowerAction::Soft));
        assert_eq!(created.owner_job, "job-1");
    }

    #[tokio::test]
    async fn completed_task_triggers_creation_of_next_task() {
        let backend = InMemoryWorkflowBackend::new();
        backend.seed_machine(machine());
        backend.write_job(job(vec![TaskAction::Power(PowerAction::Soft), TaskAction::Power(PowerAction::On)])).await.unwrap();

        let mut task0 = BmcTask {
            namespace: "default".to_string(),
            name: "job-1-0".to_string(),
            owner_job: "job-1".to_string(),
            spec: BmcTaskSpec { action: TaskAction::Power(PowerAction::Soft), connection: machine().connection },
            status: BmcTaskStatus::default(),
        };
        task0.status.set_condition(BmcTaskConditionKind::Completed, None);
        backend.write_task(task0).await.unwrap();

        let (tasks, _rx) = ReconcileQueue::new();
        reconcile_job(backend.as_ref(), &ObjectKey::new("default", "job-1"), &tasks).await.unwrap();

        let created = backend.get_task(&ObjectKey::new("default", "job-1-1")).await.unwrap();
        assert_eq!(created.spec.action, TaskAction::Power(PowerAction::On));
    }

    #[tokio::test]
    async fn all_tasks_completed_marks_job_completed() {
        let backend = InMemoryWorkflowBackend::new();
        backend.seed_machine(machine());
        backend.write_job(job(vec![TaskAction::Power(PowerAction::On)])).await.unwrap();

        let mut task0 = BmcTask {
            namespace: "default".to_string(),
            name: "job-1-0".to_string(),
            owner_job: "job-1".to_string(),
            spec: BmcTaskSpec { action: TaskAction::Power(PowerAction::On), connection: machine().connection },
            status: BmcTaskStatus::default(),
        };
        task0.status.set_condition(BmcTaskConditionKind::Completed, None);
        backend.write_task(task0).await.unwrap();

        let (tasks, _rx) = ReconcileQueue::new();
        reconcile_job(backend.as_ref(), &ObjectKey::new("default", "job-1"), &tasks).await.unwrap();

        let updated = backend.get_job(&ObjectKey::new("default", "job-1")).await.unwrap();
        assert!(updated.status.has_condition(BmcJobConditionKind::Completed));
        assert!(updated.status.completion_time.is_some());
    }

    #[tokio::test]
    async fn failed_task_marks_job_failed_and_is_terminal() {
        let backend = InMemoryWorkflowBackend::new();
        backend.seed_machine(machine());
        backend.write_job(job(vec![TaskAction::Power(PowerAction::On)])).await.unwrap();

        let mut task0 = BmcTask {
            namespace: "default".to_string(),
            name: "job-1-0".to_string(),
            owner_job: "job-1".to_string(),
            spec: BmcTaskSpec { action: TaskAction::Power(PowerAction::On), connection: machine().connection },
            status: BmcTaskStatus::default(),
        };
        task0.status.set_condition(BmcTaskConditionKind::Failed, Some("bmc task timeout".to_string()));
        backend.write_task(task0).await.unwrap();

        let (tasks, _rx) = ReconcileQueue::new();
        reconcile_job(backend.as_ref(), &ObjectKey::new("default", "job-1"), &tasks).await.unwrap();

        let updated = backend.get_job(&ObjectKey::new("default", "job-1")).await.unwrap();
        assert!(updated.status.has_condition(BmcJobConditionKind::Failed));
        assert!(updated.status.is_terminal());

        let before = updated.clone();
        reconcile_job(backend.as_ref(), &ObjectKey::new("default", "job-1"), &tasks).await.unwrap();
        let after = backend.get_job(&ObjectKey::new("default", "job-1")).await.unwrap();
        assert_eq!(before, after);
    }
}
