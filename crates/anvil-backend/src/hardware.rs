use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::{Arc, RwLock};

use anvil_model::HardwareRecord;
use async_trait::async_trait;
use mac_address::MacAddress;

use crate::error::HardwareBackendError;

/// Read-only lookup of a hardware record by MAC or IP (spec.md §4.A).
///
/// Implementations are expected to distinguish not-found from transport
/// failure via [`HardwareBackendError::is_not_found`]; the DHCP handler
/// uses that distinction to silently drop packets for unknown MACs.
#[async_trait]
pub trait HardwareBackend: Send + Sync {
    async fn get_by_mac(&self, mac: MacAddress) -> Result<HardwareRecord, HardwareBackendError>;

    async fn get_by_ip(&self, ip: Ipv4Addr) -> Result<HardwareRecord, HardwareBackendError>;
}

/// In-memory reference implementation, used by `--backend=none` and by
/// every test in this workspace that needs a `HardwareBackend`. Reads
/// never suspend; the lock is a plain `std::sync::RwLock` rather than
/// an async one since no call ever holds it across an await point.
#[derive(Default)]
pub struct InMemoryHardwareBackend {
    by_mac: RwLock<HashMap<MacAddress, HardwareRecord>>,
}

impl InMemoryHardwareBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_records(records: impl IntoIterator<Item = HardwareRecord>) -> Arc<Self> {
        let backend = Self::new();
        {
            let mut map = backend.by_mac.write().expect("lock not poisoned");
            for record in records {
                map.insert(record.mac, record);
            }
        }
        Arc::new(backend)
    }

    pub fn insert(&self, record: HardwareRecord) {
        self.by_mac.write().expect("lock not poisoned").insert(record.mac, record);
    }
}

#[async_trait]
impl HardwareBackend for InMemoryHardwareBackend {
    async fn get_by_mac(&self, mac: MacAddress) -> Result<HardwareRecord, HardwareBackendError> {
        self.by_mac
            .read()
            .expect("lock not poisoned")
            .get(&mac)
            .cloned()
            .ok_or(HardwareBackendError::NotFound)
    }

    async fn get_by_ip(&self, ip: Ipv4Addr) -> Result<HardwareRecord, HardwareBackendError> {
        self.by_mac
            .read()
            .expect("lock not poisoned")
            .values()
            .find(|r| r.dhcp.address == ip)
            .cloned()
            .ok_or(HardwareBackendError::NotFound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anvil_model::{Architecture, DhcpLease, NetbootConfig};

    fn record(mac: &str, ip: Ipv4Addr) -> HardwareRecord {
        HardwareRecord {
            mac: mac.parse().unwrap(),
            dhcp: DhcpLease {
                address: ip,
                netmask: Ipv4Addr::new(255, 255, 255, 0),
                gateway: Some(Ipv4Addr::new(192, 0, 2, 1)),
                lease_seconds: 3600,
                dns_servers: vec![],
                time_servers: vec![],
                domain_search: vec![],
                hostname: None,
            },
            netboot: NetbootConfig { allow_pxe: true, ..Default::default() },
            facility: None,
            arch: Architecture::X86_64,
            install: None,
            instance_id: None,
        }
    }

    #[tokio::test]
    async fn lookup_by_mac_and_ip() {
        let ip = Ipv4Addr::new(192, 0, 2, 10);
        let backend = InMemoryHardwareBackend::from_records([record("00:11:22:33:44:55", ip)]);

        let by_mac = backend.get_by_mac("00:11:22:33:44:55".parse().unwrap()).await.unwrap();
        assert_eq!(by_mac.dhcp.address, ip);

        let by_ip = backend.get_by_ip(ip).await.unwrap();
        assert_eq!(by_ip.mac, by_mac.mac);
    }

    #[tokio::test]
    async fn unknown_mac_is_not_found() {
        let backend = InMemoryHardwareBackend::new();
        let err = backend.get_by_mac("aa:bb:cc:dd:ee:ff".parse().unwrap()).await.unwrap_err();
        assert!(err.is_not_found());
    }
}
