use std::sync::Mutex;

use anvil_model::{BootDevice, PowerAction};
use async_trait::async_trait;

use crate::client::{BmcClient, BmcClientFactory};
use crate::error::BmcError;

struct Inner {
    current: String,
    target: Option<String>,
    polls_remaining: u32,
    dispatched_power: Vec<PowerAction>,
    dispatched_boot_device: Vec<(BootDevice, bool, bool)>,
    closed: bool,
}

/// Recording, vendor-tolerant [`BmcClient`] double. Grounded on
/// `bmc-mock`'s `ChannelPowerControl` (a `PowerControl` implementation
/// that answers power queries/commands without a real service
/// processor) generalized to also simulate a BMC that takes a few polls
/// to settle into the commanded state, per spec.md §8 scenario 5/6.
pub struct MockBmcClient {
    inner: Mutex<Inner>,
}

impl MockBmcClient {
    /// `polls_until_settled`: how many [`BmcClient::get_power_state`]
    /// calls return the pre-command state before flipping to the
    /// commanded one. Use `u32::MAX` to simulate a BMC that never
    /// settles, for exercising the task controller's timeout path.
    pub fn new(initial_power_state: &str, polls_until_settled: u32) -> Self {
        Self {
            inner: Mutex::new(Inner {
                current: initial_power_state.to_string(),
                target: None,
                polls_remaining: polls_until_settled,
                dispatched_power: Vec::new(),
                dispatched_boot_device: Vec::new(),
                closed: false,
            }),
        }
    }

    pub fn dispatched_power_actions(&self) -> Vec<PowerAction> {
        self.inner.lock().expect("lock not poisoned").dispatched_power.clone()
    }

    pub fn dispatched_boot_devices(&self) -> Vec<(BootDevice, bool, bool)> {
        self.inner.lock().expect("lock not poisoned").dispatched_boot_device.clone()
    }

    pub fn was_closed(&self) -> bool {
        self.inner.lock().expect("lock not poisoned").closed
    }
}

#[async_trait]
impl BmcClient for MockBmcClient {
    async fn close(&self) -> Result<(), BmcError> {
        self.inner.lock().expect("lock not poisoned").closed = true;
        Ok(())
    }

    async fn get_power_state(&self) -> Result<String, BmcError> {
        let mut inner = self.inner.lock().expect("lock not poisoned");
        if inner.polls_remaining > 0 {
            inner.polls_remaining -= 1;
        } else if let Some(target) = inner.target.clone() {
            inner.current = target;
        }
        Ok(inner.current.clone())
    }

    async fn set_power_state(&self, action: PowerAction) -> Result<(), BmcError> {
        let mut inner = self.inner.lock().expect("lock not poisoned");
        inner.dispatched_power.push(action);
        inner.target = Some(
            match action {
                PowerAction::On => "on",
                PowerAction::Off | PowerAction::Soft | PowerAction::Cycle => "off",
                PowerAction::Reset | PowerAction::Status => return Ok(()),
            }
            .to_string(),
        );
        Ok(())
    }

    async fn set_boot_device(
        &self,
        device: BootDevice,
        persistent: bool,
        efi: bool,
    ) -> Result<(), BmcError> {
        self.inner
            .lock()
            .expect("lock not poisoned")
            .dispatched_boot_device
            .push((device, persistent, efi));
        Ok(())
    }
}

/// Factory that always hands out the same [`MockBmcClient`], or fails
/// to connect if configured to.
pub struct MockBmcClientFactory {
    client: Option<std::sync::Arc<MockBmcClient>>,
}

impl MockBmcClientFactory {
    pub fn new(client: std::sync::Arc<MockBmcClient>) -> Self {
        Self { client: Some(client) }
    }

    pub fn always_fails() -> Self {
        Self { client: None }
    }
}

#[async_trait]
impl BmcClientFactory for MockBmcClientFactory {
    async fn open(
        &self,
        host: &str,
        port: u16,
        _username: &str,
        _password: &str,
    ) -> Result<Box<dyn BmcClient>, BmcError> {
        match &self.client {
            Some(client) => Ok(Box::new(SharedMockClient(client.clone()))),
            None => Err(BmcError::Connect {
                host: host.to_string(),
                port,
                source: "connection refused".to_string(),
            }),
        }
    }
}

/// Adapts a shared `Arc<MockBmcClient>` to the owned `Box<dyn BmcClient>`
/// the factory contract returns, so tests can inspect the same instance
/// the task controller dispatched against.
struct SharedMockClient(std::sync::Arc<MockBmcClient>);

#[async_trait]
impl BmcClient for SharedMockClient {
    async fn close(&self) -> Result<(), BmcError> {
        self.0.close().await
    }

    async fn get_power_state(&self) -> Result<String, BmcError> {
        self.0.get_power_state().await
    }

    async fn set_power_state(&self, action: PowerAction) -> Result<(), BmcError> {
        self.0.set_power_state(action).await
    }

    async fn set_boot_device(
        &self,
        device: BootDevice,
        persistent: bool,
        efi: bool,
    ) -> Result<(), BmcError> {
        self.0.set_boot_device(device, persistent, efi).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn settles_after_configured_polls() {
        let client = MockBmcClient::new("off", 2);
        client.set_power_state(PowerAction::On).await.unwrap();

        assert_eq!(client.get_power_state().await.unwrap(), "off");
        assert_eq!(client.get_power_state().await.unwrap(), "off");
        assert_eq!(client.get_power_state().await.unwrap(), "on");
        assert_eq!(client.dispatched_power_actions(), vec![PowerAction::On]);
    }

    #[tokio::test]
    async fn never_settles_with_max_polls() {
        let client = MockBmcClient::new("off", u32::MAX);
        client.set_power_state(PowerAction::On).await.unwrap();
        for _ in 0..1000 {
            assert_eq!(client.get_power_state().await.unwrap(), "off");
        }
    }
}
