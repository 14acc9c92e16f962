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

//! Layered configuration (spec.md §6; SPEC_FULL.md's Ambient stack
//! section): `clap` for the named CLI surface, `figment` for everything
//! else, following `dsx-exchange-consumer/src/config.rs`'s
//! `Serialized` defaults -> optional TOML file -> env layering.

use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::{Deserialize, Serialize};

/// Which `HardwareBackend`/`WorkflowBackend` implementation to wire up.
/// Only `None` (the in-memory reference backend) ships in this
/// workspace; `File` and `Kube` name the CLI surface spec.md §6
/// describes but resolve to a concrete backend outside this crate's
/// scope (spec.md §4.A Non-goals).
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
#[value(rename_all = "lowercase")]
pub enum BackendKind {
    None,
    File,
    Kube,
}

/// Command-line surface (spec.md §6), each flag with an `ANVIL_`-prefixed
/// environment fallback via clap's `env` feature.
#[derive(Debug, Parser)]
#[command(name = "anvil", about = "Bare-metal provisioning control plane")]
pub struct Cli {
    /// Optional TOML file layered under CLI/env settings.
    #[arg(long, env = "ANVIL_CONFIG")]
    pub config: Option<PathBuf>,

    #[arg(long, env = "ANVIL_BACKEND", value_enum, default_value_t = BackendKind::None)]
    pub backend: BackendKind,

    #[arg(long, env = "ANVIL_BACKEND_FILE_PATH")]
    pub backend_file_path: Option<PathBuf>,

    #[arg(long, env = "ANVIL_BACKEND_KUBE_NAMESPACE")]
    pub backend_kube_namespace: Option<String>,

    /// This host's address, used as the DHCP `ServerIdentifier` and to
    /// build the iPXE/script base URLs when not overridden in the TOML
    /// config. Autodetected via [`anvil_netboot::autodetect_server_ipv4`]
    /// if unset.
    #[arg(long, env = "ANVIL_PUBLIC_IP")]
    pub public_ip: Option<Ipv4Addr>,

    #[arg(long, env = "ANVIL_ENABLE_NETBOOT", default_value_t = true)]
    pub enable_netboot: bool,

    #[arg(long, env = "ANVIL_ENABLE_ENGINE", default_value_t = true)]
    pub enable_engine: bool,

    #[arg(long, env = "ANVIL_DHCP_BIND", default_value = "0.0.0.0:67")]
    pub dhcp_bind: SocketAddr,

    #[arg(long, env = "ANVIL_TFTP_BIND", default_value = "0.0.0.0:69")]
    pub tftp_bind: SocketAddr,

    #[arg(long, env = "ANVIL_HTTP_BIND", default_value = "0.0.0.0:8080")]
    pub http_bind: SocketAddr,

    #[arg(long, env = "ANVIL_GRPC_BIND", default_value = "0.0.0.0:42113")]
    pub grpc_bind: SocketAddr,
}

/// Settings not named as a literal CLI flag in spec.md §6: base URLs,
/// the ISO-patch policy, and the kernel-argument policy. Layered with
/// `figment` rather than `clap` since these are structured and operators
/// are expected to hand them in as a TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub netboot: NetbootConfig,
    pub kernel_args: KernelArgsConfig,
    pub iso: IsoConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self { netboot: NetbootConfig::default(), kernel_args: KernelArgsConfig::default(), iso: IsoConfig::default() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetbootConfig {
    pub remote_tftp_server: Option<Ipv4Addr>,
    pub ipxe_http_base_path: String,
    pub script_http_base_path: String,
}

impl Default for NetbootConfig {
    fn default() -> Self {
        Self {
            remote_tftp_server: None,
            ipxe_http_base_path: "/ipxe/".to_string(),
            script_http_base_path: "/script/".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KernelArgsConfig {
    pub syslog_host: String,
    pub grpc_authority: String,
    pub tink_server_tls: bool,
    pub extra_kernel_args: Vec<String>,
    pub hollow_client_id: Option<String>,
    pub hollow_client_request_secret: Option<String>,
    pub docker_registry: Option<String>,
    pub registry_username: Option<String>,
    pub registry_password: Option<String>,
}

impl Default for KernelArgsConfig {
    fn default() -> Self {
        Self {
            syslog_host: String::new(),
            grpc_authority: String::new(),
            tink_server_tls: false,
            extra_kernel_args: Vec::new(),
            hollow_client_id: None,
            hollow_client_request_secret: None,
            docker_registry: None,
            registry_username: None,
            registry_password: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IsoConfig {
    pub enabled: bool,
    pub path_prefix: String,
    pub source_iso_url: String,
    pub magic_string: String,
}

impl Default for IsoConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            path_prefix: "/iso/".to_string(),
            source_iso_url: String::new(),
            magic_string: "!!!TINKERBELL_KERNEL_PARAMS!!!!!!!".to_string(),
        }
    }
}

impl Config {
    pub fn load(config_path: Option<&std::path::Path>) -> Result<Self, String> {
        let mut figment = Figment::new().merge(Serialized::defaults(Config::default()));

        if let Some(path) = config_path {
            figment = figment.merge(Toml::file(path));
        }

        figment = figment.merge(Env::prefixed("ANVIL__").split("__"));

        figment.extract().map_err(|e| format!("failed to load configuration: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_load_without_a_file() {
        let config = Config::load(None).expect("should load defaults");
        assert_eq!(config.netboot.ipxe_http_base_path, "/ipxe/");
        assert!(!config.iso.enabled);
    }
}
