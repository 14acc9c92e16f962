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

//! BMC task controller (spec.md §4.E.2, §5, §9): opens a BMC connection
//! fresh for the reconcile, dispatches the task's action, polls for the
//! desired state, and enforces a hard 3-minute wall-clock timeout.
//! Grounded on `rufio/controllers/task_controller.go`'s `reconcile`,
//! `runTask`, `checkTaskStatus`.

use std::time::Duration;

use anvil_backend::WorkflowBackend;
use anvil_bmc::{BmcClient, BmcClientFactory, PowerState, convert_raw_bmc_power_state};
use anvil_model::{BmcTask, BmcTaskConditionKind, BootDevice, ObjectKey, PowerAction, TaskAction};
use chrono::Utc;

use crate::reconcile::{ReconcileError, ReconcileQueue, Requeue};

/// Hard wall-clock bound from first dispatch (spec.md §5, §8 scenario 6).
const TASK_TIMEOUT: Duration = Duration::from_secs(3 * 60);
/// Requeue interval while polling for the commanded power state (spec.md §5).
const POWER_POLL_INTERVAL: Duration = Duration::from_secs(3);

enum Step {
    Completed,
    Failed(String),
    Requeue(Duration),
}

/// Reconciles a single `BmcTask`. `jobs` is woken with the task's owner
/// once the task reaches a terminal state, mirroring
/// `Watches(&Task{}, EnqueueRequestForOwner{...})` in the Go job
/// controller without an actual watch mechanism.
pub async fn reconcile_task(
    backend: &dyn WorkflowBackend,
    bmc_factory: &dyn BmcClientFactory,
    key: &ObjectKey,
    jobs: &ReconcileQueue,
) -> Result<Requeue, ReconcileError> {
    let mut task = match backend.get_task(key).await {
        Ok(task) => task,
        Err(e) if e.is_not_found() => return Ok(Requeue::None),
        Err(e) => return Err(ReconcileError(format!("get task {key}: {e}"))),
    };

    if task.status.is_terminal() {
        return Ok(Requeue::None);
    }

    let (username, password) = match backend.get_secret(&task.spec.connection.auth_secret_ref).await {
        Ok(creds) => creds,
        Err(e) => {
            task.status.set_condition(BmcTaskConditionKind::Failed, Some(format!("resolving connection secret: {e}")));
            return finish(backend, jobs, task).await;
        }
    };

    let client = match bmc_factory
        .open(&task.spec.connection.host, task.spec.connection.port_or_default(), &username, &password)
        .await
    {
        Ok(client) => client,
        Err(e) => {
            tracing::warn!(error = %e, host = %task.spec.connection.host, "BMC connection failed");
            task.status.set_condition(BmcTaskConditionKind::Failed, Some(format!("failed to connect to BMC: {e}")));
            return finish(backend, jobs, task).await;
        }
    };

    let step = run_task(&mut task, client.as_ref()).await;

    if let Err(e) = client.close().await {
        tracing::warn!(error = %e, host = %task.spec.connection.host, "BMC close connection failed");
    }

    match step {
        Step::Failed(message) => {
            task.status.set_condition(BmcTaskConditionKind::Failed, Some(message));
            finish(backend, jobs, task).await
        }
        Step::Completed => {
            task.status.completion_time = Some(Utc::now());
            task.status.set_condition(BmcTaskConditionKind::Completed, None);
            finish(backend, jobs, task).await
        }
        Step::Requeue(delay) => {
            backend.write_task(task).await.map_err(|e| ReconcileError(e.to_string()))?;
            Ok(Requeue::After(delay))
        }
    }
}

/// Writes the terminal task status and wakes the owning job's reconcile.
async fn finish(
    backend: &dyn WorkflowBackend,
    jobs: &ReconcileQueue,
    task: BmcTask,
) -> Result<Requeue, ReconcileError> {
    let owner = ObjectKey::new(task.namespace.clone(), task.owner_job.clone());
    backend.write_task(task).await.map_err(|e| ReconcileError(e.to_string()))?;
    jobs.enqueue(owner);
    Ok(Requeue::None)
}

async fn run_task(task: &mut BmcTask, client: &dyn BmcClient) -> Step {
    if let Some(start) = task.status.start_time {
        let elapsed = Utc::now().signed_duration_since(start).to_std().unwrap_or_default();
        if elapsed >= TASK_TIMEOUT {
            return Step::Failed(format!("bmc task timeout: {elapsed:?}"));
        }

        match check_task_status(task.spec.action, client).await {
            Ok(true) => Step::Completed,
            Ok(false) => Step::Requeue(POWER_POLL_INTERVAL),
            Err(e) => Step::Failed(format!("bmc task status check: {e}")),
        }
    } else {
        task.status.start_time = Some(Utc::now());
        match dispatch_task(task.spec.action, client).await {
            Ok(()) => Step::Requeue(Duration::ZERO),
            Err(e) => Step::Failed(e.to_string()),
        }
    }
}

async fn dispatch_task(action: TaskAction, client: &dyn BmcClient) -> Result<(), anvil_bmc::BmcError> {
    match action {
        TaskAction::Power(power) => client
            .set_power_state(power)
            .await
            .map_err(|e| anvil_bmc::BmcError::Command(format!("failed to perform PowerAction: {e}"))),
        TaskAction::OneTimeBootDevice { device, efi_boot } => client
            .set_boot_device(device, false, efi_boot)
            .await
            .map_err(|e| anvil_bmc::BmcError::Command(format!("failed to perform OneTimeBootDeviceAction: {e}"))),
    }
}

/// `true` once the action's desired end state is observed. Only power
/// actions are pollable (spec.md §4.E.2: "Other actions: no poll");
/// `OneTimeBootDevice` is considered satisfied as soon as it's dispatched.
async fn check_task_status(action: TaskAction, client: &dyn BmcClient) -> Result<bool, anvil_bmc::BmcError> {
    let TaskAction::Power(power) = action else {
        return Ok(true);
    };

    let raw = client.get_power_state().await?;
    let state = convert_raw_bmc_power_state(&raw)?;

    Ok(match power {
        PowerAction::On => state == PowerState::On,
        PowerAction::Off | PowerAction::Soft => state == PowerState::Off,
        PowerAction::Cycle | PowerAction::Reset | PowerAction::Status => true,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use anvil_backend::InMemoryWorkflowBackend;
    use anvil_bmc::{MockBmcClient, MockBmcClientFactory};
    use anvil_model::{BmcTaskSpec, BmcTaskStatus, Connection, SecretRef};

    use super::*;

    fn task(action: TaskAction) -> BmcTask {
        BmcTask {
            namespace: "default".to_string(),
            name: "job-1-0".to_string(),
            owner_job: "job-1".to_string(),
            spec: BmcTaskSpec {
                action,
                connection: Connection {
                    host: "bmc.example".to_string(),
                    port: None,
                    auth_secret_ref: SecretRef { namespace: "default".to_string(), name: "creds".to_string() },
                    insecure_tls: false,
                },
            },
            status: BmcTaskStatus::default(),
        }
    }

    #[tokio::test]
    async fn power_on_settles_after_polling() {
        let backend = InMemoryWorkflowBackend::new();
        backend.seed_secret(SecretRef { namespace: "default".to_string(), name: "creds".to_string() }, "admin", "hunter2");
        backend.write_task(task(TaskAction::Power(PowerAction::On))).await.unwrap();

        let client = Arc::new(MockBmcClient::new("off", 1));
        let factory = MockBmcClientFactory::new(client.clone());
        let (jobs, mut jobs_rx) = ReconcileQueue::new();
        let key = ObjectKey::new("default", "job-1-0");

        // First reconcile: dispatches SetPowerState(On), requeues immediately.
        let outcome = reconcile_task(backend.as_ref(), &factory, &key, &jobs).await.unwrap();
        assert!(matches!(outcome, Requeue::After(d) if d.is_zero()));
        assert_eq!(client.dispatched_power_actions(), vec![PowerAction::On]);

        // Second reconcile: still settling (1 poll remaining).
        let outcome = reconcile_task(backend.as_ref(), &factory, &key, &jobs).await.unwrap();
        assert!(matches!(outcome, Requeue::After(d) if d == POWER_POLL_INTERVAL));

        // Third reconcile: settled, task completes and wakes its job.
        let outcome = reconcile_task(backend.as_ref(), &factory, &key, &jobs).await.unwrap();
        assert_eq!(outcome, Requeue::None);

        let updated = backend.get_task(&key).await.unwrap();
        assert!(updated.status.has_condition(BmcTaskConditionKind::Completed));
        assert!(client.was_closed());
        assert_eq!(jobs_rx.try_recv().unwrap(), ObjectKey::new("default", "job-1"));
    }

    #[tokio::test]
    async fn connect_failure_marks_task_failed() {
        let backend = InMemoryWorkflowBackend::new();
        backend.seed_secret(SecretRef { namespace: "default".to_string(), name: "creds".to_string() }, "admin", "hunter2");
        backend.write_task(task(TaskAction::Power(PowerAction::On))).await.unwrap();

        let factory = MockBmcClientFactory::always_fails();
        let (jobs, _rx) = ReconcileQueue::new();
        let key = ObjectKey::new("default", "job-1-0");

        reconcile_task(backend.as_ref(), &factory, &key, &jobs).await.unwrap();

        let updated = backend.get_task(&key).await.unwrap();
        assert!(updated.status.has_condition(BmcTaskConditionKind::Failed));
    }

    #[tokio::test]
    async fn timeout_after_three_minutes_fails_task() {
        let backend = InMemoryWorkflowBackend::new();
        backend.seed_secret(SecretRef { namespace: "default".to_string(), name: "creds".to_string() }, "admin", "hunter2");
        let mut seeded = task(TaskAction::Power(PowerAction::On));
        seeded.status.start_time = Some(Utc::now() - chrono::Duration::minutes(4));
        backend.write_task(seeded).await.unwrap();

        let client = Arc::new(MockBmcClient::new("off", u32::MAX));
        let factory = MockBmcClientFactory::new(client);
        let (jobs, _rx) = ReconcileQueue::new();
        let key = ObjectKey::new("default", "job-1-0");

        reconcile_task(backend.as_ref(), &factory, &key, &jobs).await.unwrap();

        let updated = backend.get_task(&key).await.unwrap();
        let failed = updated.status.conditions.iter().find(|c| c.kind == BmcTaskConditionKind::Failed).unwrap();
        assert!(failed.message.as_deref().unwrap().starts_with("bmc task timeout"));
    }

    #[tokio::test]
    async fn one_time_boot_device_does_not_poll() {
        let backend = InMemoryWorkflowBackend::new();
        backend.seed_secret(SecretRef { namespace: "default".to_string(), name: "creds".to_string() }, "admin", "hunter2");
        backend.write_task(task(TaskAction::OneTimeBootDevice { device: BootDevice::Pxe, efi_boot: true })).await.unwrap();

        let client = Arc::new(MockBmcClient::new("off", 0));
        let factory = MockBmcClientFactory::new(client.clone());
        let (jobs, _rx) = ReconcileQueue::new();
        let key = ObjectKey::new("default", "job-1-0");

        reconcile_task(backend.as_ref(), &factory, &key, &jobs).await.unwrap();
        let outcome = reconcile_task(backend.as_ref(), &factory, &key, &jobs).await.unwrap();
        assert_eq!(outcome, Requeue::None);

        let updated = backend.get_task(&key).await.unwrap();
        assert!(updated.status.has_condition(BmcTaskConditionKind::Completed));
        assert_eq!(client.dispatched_boot_devices(), vec![(BootDevice::Pxe, false, true)]);
    }
}
