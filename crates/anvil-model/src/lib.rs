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

//! Data model shared by every Anvil crate: hardware records, workflows,
//! and BMC jobs/tasks. Nothing in this crate talks to a backend or the
//! network; it only defines the shapes everything else agrees on.

pub mod bmc;
pub mod hardware;
pub mod key;
pub mod workflow;

pub use bmc::{
    BmcJob, BmcJobCondition, BmcJobConditionKind, BmcJobSpec, BmcJobStatus, BmcTask,
    BmcTaskCondition, BmcTaskConditionKind, BmcTaskSpec, BmcTaskStatus, BootDevice, Connection,
    Machine, PowerAction, SecretRef, TaskAction,
};
pub use hardware::{
    Architecture, DhcpLease, HardwareRecord, InstallMetadata, NetbootConfig, OsieConfig,
};
pub use key::ObjectKey;
pub use workflow::{
    Action, ActionState, BootOptions, CurrentState, Task, Workflow, WorkflowCondition,
    WorkflowSpec, WorkflowState, WorkflowStatus,
};
