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

//! Service wiring for the `anvil` binary (spec.md §5, §6): stands up
//! the DHCP reservation handler, TFTP server, HTTP asset/script/ISO-proxy
//! server, agent gRPC server, and workflow engine as independent tokio
//! tasks sharing one cancellation token, and waits for all of them to
//! drain on shutdown.

pub mod config;

use std::net::Ipv4Addr;
use std::sync::Arc;

use anvil_backend::{HardwareBackend, InMemoryHardwareBackend, InMemoryWorkflowBackend, WorkflowBackend};
use anvil_bmc::{BmcClientFactory, MockBmcClient, MockBmcClientFactory};
use anvil_engine::{Engine, InMemoryTemplateStore, TemplateStore, WorkflowServiceImpl};
use anvil_netboot::{
    AssetServerState, AssetStore, BootConfig, IsoPatchConfig, IsoProxyState, KernelArgConfig, ReservationHandler,
    TftpServer,
};
use anvil_rpc::WorkflowServiceServer;
use axum::routing::any;
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;

pub use config::{BackendKind, Cli, Config};

#[derive(Debug, thiserror::Error)]
pub enum AnvilError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("gRPC transport error: {0}")]
    Transport(#[from] tonic::transport::Error),
}

/// Resolves the two backend ports from `cli.backend`. Only `none` (the
/// in-memory reference backend) is implemented in this workspace;
/// concrete Kubernetes/flat-file backends are out of scope (spec.md
/// §4.A Non-goals) and selecting them is a configuration error rather
/// than a silent no-op.
fn build_backends(
    cli: &Cli,
) -> Result<(Arc<dyn HardwareBackend>, Arc<dyn WorkflowBackend>), AnvilError> {
    match cli.backend {
        BackendKind::None => Ok((Arc::new(InMemoryHardwareBackend::new()), InMemoryWorkflowBackend::new())),
        BackendKind::File => Err(AnvilError::Config(
            "--backend=file has no implementation in this workspace; use --backend=none".to_string(),
        )),
        BackendKind::Kube => Err(AnvilError::Config(
            "--backend=kube has no implementation in this workspace; use --backend=none".to_string(),
        )),
    }
}

/// No IPMI/Redfish transport lives in this workspace (spec.md §4.E.2,
/// §9 Non-goals); the engine is wired to a settled, always-succeeding
/// mock BMC so the controllers have something to drive end to end.
fn build_bmc_factory() -> Arc<dyn BmcClientFactory> {
    tracing::warn!("no BMC transport implemented in this workspace; using an in-memory mock BMC client");
    Arc::new(MockBmcClientFactory::new(Arc::new(MockBmcClient::new("off", 0))))
}

fn resolve_public_ip(cli: &Cli) -> Result<Ipv4Addr, AnvilError> {
    cli.public_ip
        .or_else(anvil_netboot::autodetect_server_ipv4)
        .ok_or_else(|| AnvilError::Config("no --public-ip given and autodetection failed".to_string()))
}

pub async fn run_service(cli: Cli, config: Config) -> Result<(), AnvilError> {
    let (hardware_backend, workflow_backend) = build_backends(&cli)?;
    let shutdown = CancellationToken::new();

    let mut tasks = Vec::new();

    if cli.enable_netboot {
        let public_ip = resolve_public_ip(&cli)?;
        tasks.push(spawn_netboot(&cli, &config, public_ip, hardware_backend.clone(), shutdown.clone()));
    }

    if cli.enable_engine {
        tasks.push(spawn_engine(&cli, workflow_backend.clone(), shutdown.clone()));
    }

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("received shutdown signal");
        }
        _ = shutdown.cancelled() => {}
    }
    shutdown.cancel();

    for task in tasks {
        if let Err(e) = task.await.expect("service task panicked") {
            tracing::error!(error = %e, "service exited with an error");
        }
    }

    Ok(())
}

fn spawn_netboot(
    cli: &Cli,
    config: &Config,
    public_ip: Ipv4Addr,
    backend: Arc<dyn HardwareBackend>,
    shutdown: CancellationToken,
) -> tokio::task::JoinHandle<Result<(), AnvilError>> {
    let dhcp_bind = cli.dhcp_bind;
    let tftp_bind = cli.tftp_bind;
    let http_bind = cli.http_bind;

    let boot_config = BootConfig {
        server_ipv4: public_ip,
        remote_tftp_server: config.netboot.remote_tftp_server,
        ipxe_http_base_url: format!("http://{public_ip}:{}{}", http_bind.port(), config.netboot.ipxe_http_base_path),
        script_http_base_url: format!(
            "http://{public_ip}:{}{}",
            http_bind.port(),
            config.netboot.script_http_base_path
        ),
        netboot_enabled: true,
    };
    let reservation_handler = Arc::new(ReservationHandler::new(backend.clone(), boot_config));

    let assets = Arc::new(AssetStore::new());
    let tftp_server = TftpServer::new(assets.clone());

    let kernel_args = KernelArgConfig {
        syslog_host: config.kernel_args.syslog_host.clone(),
        grpc_authority: config.kernel_args.grpc_authority.clone(),
        tink_server_tls: config.kernel_args.tink_server_tls,
        extra_kernel_args: config.kernel_args.extra_kernel_args.clone(),
        hollow_client_id: config.kernel_args.hollow_client_id.clone(),
        hollow_client_request_secret: config.kernel_args.hollow_client_request_secret.clone(),
        docker_registry: config.kernel_args.docker_registry.clone(),
        registry_username: config.kernel_args.registry_username.clone(),
        registry_password: config.kernel_args.registry_password.clone(),
    };
    let asset_state = AssetServerState { assets, backend: backend.clone(), kernel_args };

    let iso_enabled = config.iso.enabled;
    let iso_state = iso_enabled.then(|| IsoProxyState {
        backend: backend.clone(),
        config: Arc::new(IsoPatchConfig {
            source_iso_url: config.iso.source_iso_url.clone(),
            magic_string: config.iso.magic_string.clone(),
            extra_kernel_args: config.kernel_args.extra_kernel_args.clone(),
            syslog_host: config.kernel_args.syslog_host.clone(),
            grpc_authority: config.kernel_args.grpc_authority.clone(),
            tink_server_tls: config.kernel_args.tink_server_tls,
        }),
        client: reqwest::Client::new(),
    });
    let iso_path_prefix = config.iso.path_prefix.clone();

    tokio::spawn(async move {
        let mut http_router = anvil_netboot::router(asset_state);
        if let Some(iso_state) = iso_state {
            http_router = http_router.nest_service(
                iso_path_prefix.trim_end_matches('/'),
                any(anvil_netboot::iso_proxy::handle).with_state(iso_state),
            );
        }

        let listener = tokio::net::TcpListener::bind(http_bind).await?;
        let http_shutdown = shutdown.clone();
        let http_server = axum::serve(listener, http_router)
            .with_graceful_shutdown(async move { http_shutdown.cancelled().await });

        let tftp_shutdown = shutdown.clone();
        let tftp_server = tftp_server.serve(tftp_bind, async move { tftp_shutdown.cancelled().await });

        let dhcp_shutdown = shutdown.clone();
        let dhcp_loop = serve_dhcp(dhcp_bind, reservation_handler, async move { dhcp_shutdown.cancelled().await });

        let (http_result, tftp_result, dhcp_result) = tokio::join!(http_server, tftp_server, dhcp_loop);
        http_result?;
        tftp_result.map_err(|e| AnvilError::Config(e.to_string()))?;
        dhcp_result?;
        Ok(())
    })
}

/// Owns the UDP socket loop around [`ReservationHandler::handle`]
/// (spec.md §4.C): decode, look up, reply, with every per-packet error
/// logged and swallowed rather than propagated.
async fn serve_dhcp(
    bind_addr: std::net::SocketAddr,
    handler: Arc<ReservationHandler>,
    shutdown: impl std::future::Future<Output = ()>,
) -> Result<(), AnvilError> {
    let socket = Arc::new(UdpSocket::bind(bind_addr).await?);
    tracing::info!(%bind_addr, "dhcp reservation handler listening");
    tokio::pin!(shutdown);

    let mut buf = [0u8; 1500];
    loop {
        tokio::select! {
            _ = &mut shutdown => {
                tracing::info!("dhcp reservation handler shutting down");
                return Ok(());
            }
            recv = socket.recv_from(&mut buf) => {
                let (len, peer) = recv?;
                let handler = handler.clone();
                let packet = buf[..len].to_vec();
                let socket = socket.clone();
                tokio::spawn(async move {
                    match handler.handle(Some(&packet), Some(peer), None).await {
                        Ok(anvil_netboot::Outcome::Reply { bytes, dest, .. }) => {
                            if let Err(e) = socket.send_to(&bytes, dest).await {
                                tracing::warn!(error = %e, %dest, "failed to send dhcp reply");
                            }
                        }
                        Ok(anvil_netboot::Outcome::NoReply) => {}
                        Err(e) => tracing::warn!(error = %e, %peer, "dhcp packet handling failed"),
                    }
                });
            }
        }
    }
}

fn spawn_engine(
    cli: &Cli,
    backend: Arc<dyn WorkflowBackend>,
    shutdown: CancellationToken,
) -> tokio::task::JoinHandle<Result<(), AnvilError>> {
    let grpc_bind = cli.grpc_bind;
    let bmc_factory = build_bmc_factory();
    let templates: Arc<dyn TemplateStore> = Arc::new(InMemoryTemplateStore::new());
    let engine = Engine::new(backend.clone(), bmc_factory, templates);

    tokio::spawn(async move {
        // Keeps the reconcile queues' sender handles alive for the life
        // of the gRPC server; the queues' drain loops run as their own
        // spawned tasks regardless, but holding this avoids a handle
        // that looks orphaned to a reader.
        let _engine = engine;
        let service = WorkflowServiceServer::new(WorkflowServiceImpl::new(backend));
        tonic::transport::Server::builder()
            .add_service(service)
            .serve_with_shutdown(grpc_bind, async move { shutdown.cancelled().await })
            .await?;
        Ok(())
    })
}
