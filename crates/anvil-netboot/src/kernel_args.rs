//! Kernel-argument assembly (spec.md §4.D "Kernel-argument policy").
//! Table-driven, following `smee/installers/osie/main.go`'s
//! `kernelParams`: a fixed prefix, then action/state/arch/plan
//! conditional blocks, each pushed onto an ordered `Vec<String>`.

use anvil_model::{Architecture, HardwareRecord};

/// Operator-level settings that apply to every host (spec.md §4.D), as
/// opposed to the per-host fields already on [`HardwareRecord`].
#[derive(Debug, Clone, Default)]
pub struct KernelArgConfig {
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

/// W3C `traceparent` fields, propagated through only if the inbound
/// request already carried a sampled one (spec.md §4.D "If tracing is
/// sampled at script-generation time, append `traceparent=...`").
#[derive(Debug, Clone)]
pub struct TraceContext {
    pub trace_id: String,
    pub span_id: String,
    pub flags: u8,
}

/// The action this boot is for. Drives the `install`-only extra fields
/// and the hollow-credentials block (spec.md §4.D).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootAction {
    Install,
    Rescue,
    Discover,
    Workflow,
    Deprovisioning,
}

impl BootAction {
    pub fn as_str(self) -> &'static str {
        match self {
            BootAction::Install => "install",
            BootAction::Rescue => "rescue",
            BootAction::Discover => "discover",
            BootAction::Workflow => "workflow",
            BootAction::Deprovisioning => "deprovisioning",
        }
    }
}

/// Builds the ordered kernel-argument list for one boot, per spec.md
/// §4.D. `state` is the hardware/provisioning state string echoed back
/// as `packet_state` (e.g. `"active"`, `"deprovisioning"`).
pub fn build(
    record: &HardwareRecord,
    config: &KernelArgConfig,
    action: BootAction,
    state: &str,
    trace: Option<&TraceContext>,
) -> Vec<String> {
    let mut args = vec![
        "ip=dhcp".to_string(),
        "modules=loop,squashfs,sd-mod,usb-storage".to_string(),
        "alpine_repo=${base-url}/repo-${arch}/main".to_string(),
        "modloop=${base-url}/modloop-${parch}".to_string(),
        "tinkerbell=${tinkerbell}".to_string(),
        format!("syslog_host={}", config.syslog_host),
        "parch=${parch}".to_string(),
        format!("packet_action={}", action.as_str()),
        format!("packet_state={state}"),
    ];
    args.extend(config.extra_kernel_args.iter().cloned());

    if let Some(trace) = trace {
        args.push(format!(
            "traceparent=00-{}-{}-{:02x}",
            trace.trace_id, trace.span_id, trace.flags
        ));
    }

    if action == BootAction::Deprovisioning {
        if let (Some(id), Some(secret)) =
            (&config.hollow_client_id, &config.hollow_client_request_secret)
        {
            args.push(format!("hollow_client_id={id}"));
            args.push(format!("hollow_client_request_secret={secret}"));
        }
    }

    if record.netboot.allow_workflow {
        args.push(format!("grpc_authority={}", config.grpc_authority));
        args.push("packet_base_url=${base-url}/workflow".to_string());
        if !config.tink_server_tls {
            args.push("tinkerbell_tls=false".to_string());
        }
        if let Some(registry) = &config.docker_registry {
            args.push(format!("docker_registry={registry}"));
        }
        if let Some(user) = &config.registry_username {
            args.push(format!("registry_username={user}"));
        }
        if let Some(pass) = &config.registry_password {
            args.push(format!("registry_password={pass}"));
        }
        if let Some(instance_id) = &record.instance_id {
            args.push(format!("instance_id={instance_id}"));
        }
        args.push(format!("worker_id={}", record.mac));
    }

    args.push(format!("packet_bootdev_mac={}", record.mac));
    if let Some(facility) = &record.facility {
        args.push(format!("facility={facility}"));
    }

    args.push(iommu_flag(record).to_string());

    if action == BootAction::Install {
        if let Some(install) = &record.install {
            args.push(format!("plan={}", install.plan_slug));
            args.push(format!("manufacturer={}", install.manufacturer));
            match &install.os_tag {
                Some(tag) if !tag.is_empty() => {
                    args.push(format!("slug={}:{tag}", install.os_slug));
                }
                _ => args.push(format!("slug={}", install.os_slug)),
            }
            if let Some(pwhash) = &install.password_hash {
                args.push(format!("pwhash={pwhash}"));
            }
        }
    }

    args.push(format!("console={},115200", console_device(record)));
    args
}

/// ARM plans that hit the firmware IOMMU passthrough bug (spec.md §4.D
/// "IOMMU flag is arch/plan-conditional"). Mirrors the literal plan-slug
/// table in `smee/installers/osie/main.go`.
const IOMMU_PASSTHROUGH_PLANS: &[&str] = &["c2.large.arm", "c2.large.anbox", "c3.large.arm"];

fn iommu_flag(record: &HardwareRecord) -> &'static str {
    let plan = record.install.as_ref().map(|i| i.plan_slug.as_str());
    if plan.is_some_and(|p| IOMMU_PASSTHROUGH_PLANS.contains(&p)) {
        "iommu.passthrough=1"
    } else {
        "intel_iommu=on iommu=pt"
    }
}

/// Plans whose console device diverges from the architecture default
/// (spec.md §4.D "console is plan-conditional"). Mirrors
/// `smee/installers/osie/main.go`'s plan-slug switches.
const ARM_TTYS0_PLANS: &[&str] = &["baremetal_hua"];
const X86_TTYS0_PLANS: &[&str] =
    &["d1p.optane.x86", "d1f.optane.x86", "w3amd.75xx24c.256.4320"];

fn console_device(record: &HardwareRecord) -> &'static str {
    let plan = record.install.as_ref().map(|i| i.plan_slug.as_str());
    if record.arch.is_arm() {
        if plan.is_some_and(|p| ARM_TTYS0_PLANS.contains(&p)) { "ttyS0" } else { "ttyAMA0" }
    } else if plan.is_some_and(|p| X86_TTYS0_PLANS.contains(&p)) {
        "ttyS0"
    } else {
        "ttyS1"
    }
}

#[cfg(test)]
mod tests {
    use anvil_model::{Architecture, DhcpLease, InstallMetadata, NetbootConfig};
    use std::net::Ipv4Addr;

    use super::*;

    fn base_record() -> HardwareRecord {
        HardwareRecord {
            mac: "00:11:22:33:44:55".parse().unwrap(),
            dhcp: DhcpLease {
                address: Ipv4Addr::new(192, 0, 2, 10),
                netmask: Ipv4Addr::new(255, 255, 255, 0),
                gateway: None,
                lease_seconds: 3600,
                dns_servers: vec![],
                time_servers: vec![],
                domain_search: vec![],
                hostname: None,
            },
            netboot: NetbootConfig { allow_pxe: true, allow_workflow: true, ..Default::default() },
            facility: Some("ewr1".to_string()),
            arch: Architecture::X86_64,
            install: None,
            instance_id: Some("inst-123".to_string()),
        }
    }

    #[test]
    fn workflow_args_include_grpc_and_worker_id() {
        let record = base_record();
        let config = KernelArgConfig {
            syslog_host: "syslog.example".to_string(),
            grpc_authority: "tink.example:42113".to_string(),
            tink_server_tls: false,
            ..Default::default()
        };
        let args = build(&record, &config, BootAction::Workflow, "active", None);

        assert!(args.contains(&"grpc_authority=tink.example:42113".to_string()));
        assert!(args.contains(&"tinkerbell_tls=false".to_string()));
        assert!(args.contains(&"instance_id=inst-123".to_string()));
        assert!(args.contains(&"worker_id=00:11:22:33:44:55".to_string()));
        assert!(args.contains(&"console=ttyS1,115200".to_string()));
    }

    #[test]
    fn install_action_emits_plan_and_slug_with_tag() {
        let mut record = base_record();
        record.install = Some(InstallMetadata {
            plan_slug: "c2.large.arm".to_string(),
            manufacturer: "supermicro".to_string(),
            os_slug: "ubuntu_20_04".to_string(),
            os_tag: Some("v3".to_string()),
            password_hash: Some("$6$abc".to_string()),
        });
        record.arch = Architecture::Aarch64;
        let config = KernelArgConfig::default();

        let args = build(&record, &config, BootAction::Install, "active", None);

        assert!(args.contains(&"plan=c2.large.arm".to_string()));
        assert!(args.contains(&"manufacturer=supermicro".to_string()));
        assert!(args.contains(&"slug=ubuntu_20_04:v3".to_string()));
        assert!(args.contains(&"pwhash=$6$abc".to_string()));
        assert!(args.contains(&"iommu.passthrough=1".to_string()));
        assert!(args.contains(&"console=ttyAMA0,115200".to_string()));
    }

    #[test]
    fn deprovisioning_appends_hollow_credentials_when_configured() {
        let record = base_record();
        let config = KernelArgConfig {
            hollow_client_id: Some("client-1".to_string()),
            hollow_client_request_secret: Some("secret-1".to_string()),
            ..Default::default()
        };

        let args = build(&record, &config, BootAction::Deprovisioning, "deprovisioning", None);
        assert!(args.contains(&"hollow_client_id=client-1".to_string()));
        assert!(args.contains(&"hollow_client_request_secret=secret-1".to_string()));
    }

    #[test]
    fn sampled_trace_context_appends_traceparent() {
        let record = base_record();
        let config = KernelArgConfig::default();
        let trace =
            TraceContext { trace_id: "a".repeat(32), span_id: "b".repeat(16), flags: 1 };

        let args = build(&record, &config, BootAction::Workflow, "active", Some(&trace));
        assert!(args.iter().any(|a| a.starts_with("traceparent=00-")));
    }
}
