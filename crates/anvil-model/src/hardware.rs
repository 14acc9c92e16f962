use std::net::Ipv4Addr;

use mac_address::MacAddress;
use serde::{Deserialize, Serialize};

/// Operator-declared architecture hint for a hardware record. Distinct
/// from the DHCP client-architecture code (option 93) used to pick a
/// boot file; this is the "what this host actually is" value used for
/// install-time kernel arguments (`alpine_repo=.../repo-<arch>/...`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Architecture {
    X86_64,
    Aarch64,
}

impl Architecture {
    /// The string used in install-time kernel arguments and repo paths.
    pub fn slug(self) -> &'static str {
        match self {
            Architecture::X86_64 => "x86_64",
            Architecture::Aarch64 => "aarch64",
        }
    }

    pub fn is_arm(self) -> bool {
        matches!(self, Architecture::Aarch64)
    }
}

/// Per-interface DHCP lease parameters. Absent optional fields are
/// omitted from a DHCP reply rather than zero-filled (spec.md §4.C).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DhcpLease {
    pub address: Ipv4Addr,
    pub netmask: Ipv4Addr,
    pub gateway: Option<Ipv4Addr>,
    pub lease_seconds: u32,
    pub dns_servers: Vec<Ipv4Addr>,
    pub time_servers: Vec<Ipv4Addr>,
    pub domain_search: Vec<String>,
    pub hostname: Option<String>,
}

/// Operating-system install environment referenced by the per-host
/// iPXE script (kernel/initrd URLs and the base URL they're relative
/// to, per spec.md §4.D).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OsieConfig {
    pub kernel: String,
    pub initrd: String,
    pub base_url: String,
}

/// Per-interface netboot policy.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NetbootConfig {
    pub allow_pxe: bool,
    pub allow_workflow: bool,
    pub ipxe_script_url: Option<String>,
    pub ipxe_script: Option<String>,
    pub osie: Option<OsieConfig>,
}

/// Fields the `install` action's kernel-arg block needs beyond the
/// common set (spec.md §4.D "`install` action additionally emits
/// `plan`, `manufacturer`, `slug`..."). Grounded on
/// `smee/installers/osie/main.go`'s `install` kernel-arg block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallMetadata {
    pub plan_slug: String,
    pub manufacturer: String,
    pub os_slug: String,
    pub os_tag: Option<String>,
    pub password_hash: Option<String>,
}

/// The resolved hardware record for one interface: the combined
/// `(DHCP, Netboot)` pair spec.md §4.A's `GetByMAC`/`GetByIP` return,
/// plus the facility/arch/install context the iPXE script and the
/// ISO-patch proxy need.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HardwareRecord {
    pub mac: MacAddress,
    pub dhcp: DhcpLease,
    pub netboot: NetbootConfig,
    pub facility: Option<String>,
    pub arch: Architecture,
    #[serde(default)]
    pub install: Option<InstallMetadata>,
    /// Present when the workflow's agent calls back with this ID; used
    /// to populate `instance_id` in workflow-mode kernel args.
    #[serde(default)]
    pub instance_id: Option<String>,
}
