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

//! The `BmcClient` port (spec.md §4.E.2, §9): four methods, a pluggable
//! factory, and vendor-tolerant power-state normalization. No IPMI or
//! Redfish transport lives here - that's explicitly out of scope.

mod client;
mod error;
mod mock;
mod power;

pub use client::{BmcClient, BmcClientFactory};
pub use error::BmcError;
pub use mock::{MockBmcClient, MockBmcClientFactory};
pub use power::{PowerState, convert_raw_bmc_power_state};
