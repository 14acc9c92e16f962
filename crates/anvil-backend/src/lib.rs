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

//! Backend port traits the core depends on (spec.md §4.A, §9), plus
//! in-memory reference implementations used by tests and by
//! `--backend=none` standalone runs. Concrete Kubernetes/flat-file
//! backends are out of scope for this workspace.

mod error;
mod hardware;
mod workflow;

pub use error::{HardwareBackendError, WorkflowBackendError};
pub use hardware::{HardwareBackend, InMemoryHardwareBackend};
pub use workflow::{InMemoryWorkflowBackend, WorkflowBackend};
