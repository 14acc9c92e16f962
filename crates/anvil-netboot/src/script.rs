//! Per-host iPXE script rendering (spec.md §4.D "Per-host iPXE script
//! endpoint"). Grounded on `smee/installers/osie/main.go`'s `bootScript`
//! (variable names, `kernel`/`initrd`/`boot` ordering) and templated
//! with `tera`, matching the stack the teacher's `pxe` crate declares
//! for exactly this kind of asset server.

use anvil_model::HardwareRecord;
use tera::{Context, Tera};

use crate::kernel_args::{self, BootAction, KernelArgConfig, TraceContext};

const EXIT_TEMPLATE: &str = "#!ipxe\necho no netboot permitted for this host, exiting to BIOS\nexit\n";

const BOOT_TEMPLATE: &str = "\
#!ipxe
set arch {{ arch }}
set parch {{ parch }}
set base-url {{ base_url }}
set action {{ action }}
set state {{ state }}
set worker_id {{ worker_id }}
kernel {{ kernel_url }} {{ kernel_args }}
initrd {{ initrd_url }}
boot
";

/// `true` iff this host is allowed to netboot at all (spec.md §4.D "if
/// `allow_pxe=false`, returns a short iPXE script that exits to BIOS").
pub fn allowed(record: &HardwareRecord) -> bool {
    record.netboot.allow_pxe
}

/// Renders the per-host iPXE script. Callers must check [`allowed`]
/// first; this function always renders the boot template.
pub fn render(
    record: &HardwareRecord,
    config: &KernelArgConfig,
    action: BootAction,
    state: &str,
    trace: Option<&TraceContext>,
) -> Result<String, tera::Error> {
    if !allowed(record) {
        return Ok(EXIT_TEMPLATE.to_string());
    }

    let osie = record.netboot.osie.as_ref();
    let base_url = osie.map(|o| o.base_url.as_str()).unwrap_or_default();
    let kernel = osie.map(|o| o.kernel.as_str()).unwrap_or("vmlinuz-${parch}");
    let initrd = osie.map(|o| o.initrd.as_str()).unwrap_or("initramfs-${parch}");

    let args = kernel_args::build(record, config, action, state, trace);

    let mut ctx = Context::new();
    ctx.insert("arch", record.arch.slug());
    ctx.insert("parch", record.arch.slug());
    ctx.insert("base_url", base_url);
    ctx.insert("action", action.as_str());
    ctx.insert("state", state);
    // The kernel/initrd lines use iPXE's own `${base-url}` variable, not
    // the expanded value, matching the literal `${base-url}` forms the
    // kernel-arg table already emits (spec.md §4.D).
    ctx.insert("kernel_url", &format!("${{base-url}}/{kernel}"));
    ctx.insert("initrd_url", &format!("${{base-url}}/{initrd}"));
    ctx.insert("kernel_args", &args.join(" "));
    ctx.insert("worker_id", &record.mac.to_string());

    Tera::one_off(BOOT_TEMPLATE, &ctx, false)
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use anvil_model::{Architecture, DhcpLease, NetbootConfig, OsieConfig};

    use super::*;

    fn record(allow_pxe: bool) -> HardwareRecord {
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
            netboot: NetbootConfig {
                allow_pxe,
                allow_workflow: false,
                osie: Some(OsieConfig {
                    kernel: "vmlinuz-x86_64".to_string(),
                    initrd: "initramfs-x86_64".to_string(),
                    base_url: "http://192.0.2.2/misc/osie/current".to_string(),
                }),
                ..Default::default()
            },
            facility: None,
            arch: Architecture::X86_64,
            install: None,
            instance_id: None,
        }
    }

    #[test]
    fn disallowed_host_gets_exit_script() {
        let script = render(
            &record(false),
            &KernelArgConfig::default(),
            BootAction::Install,
            "active",
            None,
        )
        .unwrap();
        assert!(script.contains("exit"));
        assert!(!script.contains("kernel"));
    }

    #[test]
    fn allowed_host_gets_kernel_initrd_boot() {
        let script = render(
            &record(true),
            &KernelArgConfig::default(),
            BootAction::Install,
            "active",
            None,
        )
        .unwrap();
        assert!(script.contains("set worker_id 00:11:22:33:44:55"));
        assert!(script.contains("kernel ${base-url}/vmlinuz-x86_64"));
        assert!(script.contains("initrd ${base-url}/initramfs-x86_64"));
        assert!(script.trim_end().ends_with("boot"));
    }
}
