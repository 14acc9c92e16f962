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

//! Generated gRPC agent API (spec.md §6), compiled from
//! `proto/anvil/v1/workflow.proto` by `build.rs`.

#![allow(clippy::derive_partial_eq_without_eq)]

use anvil_model::ActionState;

pub mod v1 {
    tonic::include_proto!("anvil.v1");
}

pub use v1::workflow_service_server::{WorkflowService, WorkflowServiceServer};
pub use v1::{
    ActionRequest, ActionResponse, ActionState as WireActionState, ActionStatusRequest,
    ActionStatusResponse, action_status_request,
};

impl From<ActionState> for WireActionState {
    fn from(state: ActionState) -> Self {
        match state {
            ActionState::Pending => WireActionState::Pending,
            ActionState::Running => WireActionState::Running,
            ActionState::Success => WireActionState::Success,
            ActionState::Failed => WireActionState::Failed,
            ActionState::Timeout => WireActionState::Timeout,
        }
    }
}

impl TryFrom<WireActionState> for ActionState {
    type Error = UnspecifiedActionState;

    fn try_from(state: WireActionState) -> Result<Self, Self::Error> {
        match state {
            WireActionState::Unspecified => Err(UnspecifiedActionState),
            WireActionState::Pending => Ok(ActionState::Pending),
            WireActionState::Running => Ok(ActionState::Running),
            WireActionState::Failed => Ok(ActionState::Failed),
            WireActionState::Timeout => Ok(ActionState::Timeout),
            WireActionState::Success => Ok(ActionState::Success),
        }
    }
}

/// An agent reported `ACTION_STATE_UNSPECIFIED`, which is not a real
/// action state (spec.md §6 lists it only as the proto3 zero-value).
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("action state was unspecified")]
pub struct UnspecifiedActionState;
