use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use anvil_model::{BmcJob, BmcTask, Machine, ObjectKey, SecretRef, Workflow};
use async_trait::async_trait;

use crate::error::WorkflowBackendError;

/// List/read/write of workflow and BMC-job records, with optimistic
/// concurrency (spec.md §2 component B, §9). The engine never holds
/// authoritative state in memory; every mutation round-trips through
/// this port.
#[async_trait]
pub trait WorkflowBackend: Send + Sync {
    async fn get_workflow(&self, key: &ObjectKey) -> Result<Workflow, WorkflowBackendError>;

    /// The workflow currently assigned to `worker_id`, i.e. the one with
    /// a task whose `worker_addr` matches. Used by `GetAction`.
    async fn get_workflow_for_worker(
        &self,
        worker_id: &str,
    ) -> Result<Workflow, WorkflowBackendError>;

    async fn write_workflow(&self, workflow: Workflow) -> Result<Workflow, WorkflowBackendError>;

    async fn get_machine(&self, key: &ObjectKey) -> Result<Machine, WorkflowBackendError>;

    async fn get_job(&self, key: &ObjectKey) -> Result<BmcJob, WorkflowBackendError>;

    async fn write_job(&self, job: BmcJob) -> Result<BmcJob, WorkflowBackendError>;

    async fn get_task(&self, key: &ObjectKey) -> Result<BmcTask, WorkflowBackendError>;

    /// Idempotent create: if a task with this key already exists, returns
    /// the existing record rather than an error (spec.md §4.E.2: "if the
    /// child task already exists (idempotent create races), treat as
    /// success").
    async fn create_task(&self, task: BmcTask) -> Result<BmcTask, WorkflowBackendError>;

    async fn write_task(&self, task: BmcTask) -> Result<BmcTask, WorkflowBackendError>;

    /// Tasks owned by `job_key`, via the owner-reference index (spec.md §9).
    async fn list_tasks_for_job(
        &self,
        job_key: &ObjectKey,
    ) -> Result<Vec<BmcTask>, WorkflowBackendError>;

    async fn get_secret(&self, secret_ref: &SecretRef) -> Result<(String, String), WorkflowBackendError>;
}

#[derive(Default)]
struct Store {
    workflows: HashMap<ObjectKey, Workflow>,
    machines: HashMap<ObjectKey, Machine>,
    jobs: HashMap<ObjectKey, BmcJob>,
    tasks: HashMap<ObjectKey, BmcTask>,
    secrets: HashMap<ObjectKey, (String, String)>,
}

/// In-memory reference implementation of [`WorkflowBackend`]. Used by
/// `--backend=none` and by every engine test in this workspace.
#[derive(Default)]
pub struct InMemoryWorkflowBackend {
    store: RwLock<Store>,
}

impl InMemoryWorkflowBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn seed_workflow(&self, workflow: Workflow) {
        self.store.write().expect("lock not poisoned").workflows.insert(workflow.key(), workflow);
    }

    pub fn seed_machine(&self, machine: Machine) {
        let key = ObjectKey::new(machine.namespace.clone(), machine.name.clone());
        self.store.write().expect("lock not poisoned").machines.insert(key, machine);
    }

    pub fn seed_secret(&self, secret_ref: SecretRef, username: &str, password: &str) {
        let key = ObjectKey::new(secret_ref.namespace, secret_ref.name);
        self.store
            .write()
            .expect("lock not poisoned")
            .secrets
            .insert(key, (username.to_string(), password.to_string()));
    }
}

#[async_trait]
impl WorkflowBackend for InMemoryWorkflowBackend {
    async fn get_workflow(&self, key: &ObjectKey) -> Result<Workflow, WorkflowBackendError> {
        self.store
            .read()
            .expect("lock not poisoned")
            .workflows
            .get(key)
            .cloned()
            .ok_or(WorkflowBackendError::NotFound)
    }

    async fn get_workflow_for_worker(
        &self,
        worker_id: &str,
    ) -> Result<Workflow, WorkflowBackendError> {
        self.store
            .read()
            .expect("lock not poisoned")
            .workflows
            .values()
            .find(|w| w.status.tasks.iter().any(|t| t.worker_addr == worker_id))
            .cloned()
            .ok_or(WorkflowBackendError::NotFound)
    }

    async fn write_workflow(&self, workflow: Workflow) -> Result<Workflow, WorkflowBackendError> {
        let key = workflow.key();
        let mut store = self.store.write().expect("lock not poisoned");
        store.workflows.insert(key, workflow.clone());
        Ok(workflow)
    }

    async fn get_machine(&self, key: &ObjectKey) -> Result<Machine, WorkflowBackendError> {
        self.store
            .read()
            .expect("lock not poisoned")
            .machines
            .get(key)
            .cloned()
            .ok_or(WorkflowBackendError::NotFound)
    }

    async fn get_job(&self, key: &ObjectKey) -> Result<BmcJob, WorkflowBackendError> {
        self.store
            .read()
            .expect("lock not poisoned")
            .jobs
            .get(key)
            .cloned()
            .ok_or(WorkflowBackendError::NotFound)
    }

    async fn write_job(&self, job: BmcJob) -> Result<BmcJob, WorkflowBackendError> {
        let key = job.key();
        self.store.write().expect("lock not poisoned").jobs.insert(key, job.clone());
        Ok(job)
    }

    async fn get_task(&self, key: &ObjectKey) -> Result<BmcTask, WorkflowBackendError> {
        self.store
            .read()
            .expect("lock not poisoned")
            .tasks
            .get(key)
            .cloned()
            .ok_or(WorkflowBackendError::NotFound)
    }

    async fn create_task(&self, task: BmcTask) -> Result<BmcTask, WorkflowBackendError> {
        let key = task.key();
        let mut store = self.store.write().expect("lock not poisoned");
        if let Some(existing) = store.tasks.get(&key) {
            return Ok(existing.clone());
        }
        store.tasks.insert(key, task.clone());
        Ok(task)
    }

    async fn write_task(&self, task: BmcTask) -> Result<BmcTask, WorkflowBackendError> {
        let key = task.key();
        self.store.write().expect("lock not poisoned").tasks.insert(key, task.clone());
        Ok(task)
    }

    async fn list_tasks_for_job(
        &self,
        job_key: &ObjectKey,
    ) -> Result<Vec<BmcTask>, WorkflowBackendError> {
        Ok(self
            .store
            .read()
            .expect("lock not poisoned")
            .tasks
            .values()
            .filter(|t| t.namespace == job_key.namespace && t.owner_job == job_key.name)
            .cloned()
            .collect())
    }

    async fn get_secret(
        &self,
        secret_ref: &SecretRef,
    ) -> Result<(String, String), WorkflowBackendError> {
        let key = ObjectKey::new(secret_ref.namespace.clone(), secret_ref.name.clone());
        self.store
            .read()
            .expect("lock not poisoned")
            .secrets
            .get(&key)
            .cloned()
            .ok_or(WorkflowBackendError::NotFound)
    }
}
