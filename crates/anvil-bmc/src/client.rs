use anvil_model::{BootDevice, PowerAction};
use async_trait::async_trait;

use crate::error::BmcError;

/// Out-of-band BMC transport (spec.md §4.E.2, §9). The engine depends
/// only on these four methods; IPMI/Redfish/vendor-specific transports
/// live outside this workspace.
#[async_trait]
pub trait BmcClient: Send + Sync {
    async fn close(&self) -> Result<(), BmcError>;

    /// The vendor's raw power-state string, normalized by
    /// [`crate::convert_raw_bmc_power_state`] before use.
    async fn get_power_state(&self) -> Result<String, BmcError>;

    async fn set_power_state(&self, action: PowerAction) -> Result<(), BmcError>;

    async fn set_boot_device(
        &self,
        device: BootDevice,
        persistent: bool,
        efi: bool,
    ) -> Result<(), BmcError>;
}

/// Opens a [`BmcClient`] connection. Implementations are expected to dial
/// fresh on every call; connections are never pooled (spec.md §5 "opened
/// per reconcile and closed on exit").
#[async_trait]
pub trait BmcClientFactory: Send + Sync {
    async fn open(
        &self,
        host: &str,
        port: u16,
        username: &str,
        password: &str,
    ) -> Result<Box<dyn BmcClient>, BmcError>;
}
