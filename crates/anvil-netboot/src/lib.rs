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

//! DHCP reservation handling and the iPXE/ISO boot asset server
//! (spec.md §4.C, §4.D): a stateless DHCP responder, a read-only TFTP
//! server, an HTTP binary/script server, and an ISO-patching reverse
//! proxy, all driven by the same [`anvil_backend::HardwareBackend`].

pub mod assets;
pub mod classify;
pub mod error;
pub mod http;
pub mod iso_proxy;
pub mod kernel_args;
pub mod reservation;
pub mod script;
pub mod tftp;

pub use assets::AssetStore;
pub use error::{DhcpError, IsoProxyError, TftpError};
pub use http::{AssetServerState, router};
pub use iso_proxy::{IsoPatchConfig, IsoProxyState};
pub use kernel_args::{BootAction, KernelArgConfig, TraceContext};
pub use reservation::{BootConfig, Outcome, ReservationHandler};
pub use tftp::TftpServer;

use std::net::Ipv4Addr;

/// Picks the host's primary non-loopback IPv4 address to use as the
/// default `server_ipv4`/`ServerIdentifier` when the operator hasn't
/// pinned one explicitly.
pub fn autodetect_server_ipv4() -> Option<Ipv4Addr> {
    match local_ip_address::local_ip() {
        Ok(std::net::IpAddr::V4(addr)) => Some(addr),
        _ => None,
    }
}
