use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::key::ObjectKey;

/// Out-of-band power operation, per spec.md §3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PowerAction {
    On,
    Off,
    Soft,
    Cycle,
    Reset,
    Status,
}

/// One-time boot device selection, per spec.md §3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BootDevice {
    Pxe,
    Disk,
    Bios,
    Cdrom,
    Safe,
}

/// A single BMC task's dispatched action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskAction {
    Power(PowerAction),
    OneTimeBootDevice { device: BootDevice, efi_boot: bool },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretRef {
    pub namespace: String,
    pub name: String,
}

/// BMC connectivity information, shared between a `Machine` and every
/// `BMCTask` spawned for it (copied in at job-creation time, per
/// spec.md §4.E.2).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connection {
    pub host: String,
    pub port: Option<u16>,
    pub auth_secret_ref: SecretRef,
    pub insecure_tls: bool,
}

impl Connection {
    pub fn port_or_default(&self) -> u16 {
        self.port.unwrap_or(623)
    }
}

/// The machine a BMCJob targets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Machine {
    pub namespace: String,
    pub name: String,
    pub connection: Connection,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BmcJobConditionKind {
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BmcJobCondition {
    pub kind: BmcJobConditionKind,
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BmcJobSpec {
    pub machine_ref: ObjectKey,
    pub tasks: Vec<TaskAction>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BmcJobStatus {
    pub start_time: Option<DateTime<Utc>>,
    pub completion_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub conditions: Vec<BmcJobCondition>,
}

impl BmcJobStatus {
    pub fn has_condition(&self, kind: BmcJobConditionKind) -> bool {
        self.conditions.iter().any(|c| c.kind == kind)
    }

    pub fn set_condition(&mut self, kind: BmcJobConditionKind, message: Option<String>) {
        if let Some(existing) = self.conditions.iter_mut().find(|c| c.kind == kind) {
            existing.message = message;
        } else {
            self.conditions.push(BmcJobCondition { kind, message });
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.has_condition(BmcJobConditionKind::Completed)
            || self.has_condition(BmcJobConditionKind::Failed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BmcJob {
    pub namespace: String,
    pub name: String,
    pub spec: BmcJobSpec,
    pub status: BmcJobStatus,
}

impl BmcJob {
    pub fn key(&self) -> ObjectKey {
        ObjectKey::new(self.namespace.clone(), self.name.clone())
    }

    /// Deterministic child-task name: `(job-name, index)` (spec.md §3, §9).
    pub fn format_task_name(job_name: &str, index: usize) -> String {
        format!("{job_name}-{index}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BmcTaskConditionKind {
    Completed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BmcTaskCondition {
    pub kind: BmcTaskConditionKind,
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BmcTaskSpec {
    pub action: TaskAction,
    pub connection: Connection,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BmcTaskStatus {
    pub start_time: Option<DateTime<Utc>>,
    pub completion_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub conditions: Vec<BmcTaskCondition>,
}

impl BmcTaskStatus {
    pub fn has_condition(&self, kind: BmcTaskConditionKind) -> bool {
        self.conditions.iter().any(|c| c.kind == kind)
    }

    pub fn set_condition(&mut self, kind: BmcTaskConditionKind, message: Option<String>) {
        if let Some(existing) = self.conditions.iter_mut().find(|c| c.kind == kind) {
            existing.message = message;
        } else {
            self.conditions.push(BmcTaskCondition { kind, message });
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.has_condition(BmcTaskConditionKind::Completed)
            || self.has_condition(BmcTaskConditionKind::Failed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BmcTask {
    pub namespace: String,
    pub name: String,
    /// Owner reference to the BMCJob that created this task (by value,
    /// not a pointer back into the job - spec.md §9 "cyclic ownership avoided").
    pub owner_job: String,
    pub spec: BmcTaskSpec,
    pub status: BmcTaskStatus,
}

impl BmcTask {
    pub fn key(&self) -> ObjectKey {
        ObjectKey::new(self.namespace.clone(), self.name.clone())
    }
}
