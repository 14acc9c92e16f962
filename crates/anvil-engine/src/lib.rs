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

//! Workflow engine (spec.md §4.E): the agent-facing gRPC service plus
//! the three reconcile loops that drive workflows and their BMC jobs
//! and tasks to completion.

pub mod bmc_job;
pub mod bmc_task;
pub mod grpc;
pub mod reconcile;
pub mod template;
pub mod workflow_controller;

use std::sync::Arc;

use anvil_backend::WorkflowBackend;
use anvil_bmc::BmcClientFactory;
use anvil_model::ObjectKey;

pub use grpc::WorkflowServiceImpl;
pub use reconcile::{ReconcileError, ReconcileQueue, Requeue};
pub use template::{ActionTemplate, InMemoryTemplateStore, TaskTemplate, TemplateStore, WorkflowControllerError, WorkflowTemplate};

/// Wires the three reconcile loops together: workflows enqueue boot-prep
/// jobs, jobs enqueue their tasks, and tasks wake their owning job back
/// up on every terminal transition. Owning this struct keeps all three
/// queues alive for the process's lifetime.
pub struct Engine {
    pub jobs: ReconcileQueue,
    pub tasks: ReconcileQueue,
    pub workflows: ReconcileQueue,
}

impl Engine {
    pub fn new(
        backend: Arc<dyn WorkflowBackend>,
        bmc_factory: Arc<dyn BmcClientFactory>,
        templates: Arc<dyn TemplateStore>,
    ) -> Self {
        let (jobs, jobs_rx) = ReconcileQueue::new();
        let (tasks, tasks_rx) = ReconcileQueue::new();
        let (workflows, workflows_rx) = ReconcileQueue::new();

        {
            let backend = backend.clone();
            let tasks = tasks.clone();
            jobs.run(jobs_rx, move |key| {
                let backend = backend.clone();
                let tasks = tasks.clone();
                Box::pin(async move { bmc_job::reconcile_job(backend.as_ref(), &key, &tasks).await })
            });
        }

        {
            let backend = backend.clone();
            let bmc_factory = bmc_factory.clone();
            let jobs = jobs.clone();
            tasks.run(tasks_rx, move |key| {
                let backend = backend.clone();
                let bmc_factory = bmc_factory.clone();
                let jobs = jobs.clone();
                Box::pin(async move { bmc_task::reconcile_task(backend.as_ref(), bmc_factory.as_ref(), &key, &jobs).await })
            });
        }

        {
            let backend = backend.clone();
            let templates = templates.clone();
            let jobs = jobs.clone();
            workflows.run(workflows_rx, move |key| {
                let backend = backend.clone();
                let templates = templates.clone();
                let jobs = jobs.clone();
                Box::pin(async move { workflow_controller::reconcile_workflow(backend.as_ref(), templates.as_ref(), &key, &jobs).await })
            });
        }

        Self { jobs, tasks, workflows }
    }

    /// Schedules `key` for workflow reconciliation, e.g. after a fresh
    /// workflow has been written by its creator.
    pub fn enqueue_workflow(&self, key: ObjectKey) {
        self.workflows.enqueue(key);
    }
}
