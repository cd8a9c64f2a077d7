//! Bluetooth headset and SCO link tracking.
//!
//! Pure state machine: every platform side effect goes through the
//! [`AudioPlatform`] passed in, and the SCO timeout is exposed as a
//! deadline for the owning task to sleep on. Methods that return `bool`
//! report whether audio routing has to be recomputed.

use std::time::Duration;

use tokio::time::Instant;

use super::platform::{AudioPlatform, BluetoothDevice, HeadsetProxy};

/// How long to wait for the SCO audio link before giving up.
pub const SCO_TIMEOUT: Duration = Duration::from_millis(4000);
/// SCO start attempts allowed per headset connection.
pub const MAX_SCO_CONNECTION_ATTEMPTS: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BluetoothState {
    Uninitialized,
    Error,
    HeadsetUnavailable,
    HeadsetAvailable,
    ScoDisconnecting,
    ScoConnecting,
    ScoConnected,
}

pub struct BluetoothManager {
    state: BluetoothState,
    sco_attempts: u32,
    proxy: Option<Box<dyn HeadsetProxy>>,
    device: Option<BluetoothDevice>,
    sco_deadline: Option<Instant>,
}

impl Default for BluetoothManager {
    fn default() -> Self {
        Self::new()
    }
}

impl BluetoothManager {
    pub fn new() -> Self {
        Self {
            state: BluetoothState::Uninitialized,
            sco_attempts: 0,
            proxy: None,
            device: None,
            sco_deadline: None,
        }
    }

    pub fn state(&self) -> BluetoothState {
        self.state
    }

    pub fn device(&self) -> Option<&BluetoothDevice> {
        self.device.as_ref()
    }

    /// When the pending SCO connection attempt times out, if one is armed.
    pub fn sco_deadline(&self) -> Option<Instant> {
        self.sco_deadline
    }

    pub fn start(&mut self, platform: &dyn AudioPlatform) {
        if self.state != BluetoothState::Uninitialized {
            tracing::warn!("bluetooth start() in state {:?}", self.state);
            return;
        }
        self.proxy = None;
        self.device = None;
        self.sco_attempts = 0;

        if !platform.has_bluetooth_adapter() {
            tracing::warn!("device does not support Bluetooth");
            return;
        }
        if !platform.is_bluetooth_sco_available_off_call() {
            tracing::error!("Bluetooth SCO audio is not available off call");
            return;
        }
        if !platform.request_headset_proxy() {
            tracing::error!("failed to request headset profile proxy");
            self.state = BluetoothState::Error;
            return;
        }
        self.state = BluetoothState::HeadsetUnavailable;
        tracing::info!("bluetooth manager started");
    }

    pub fn stop(&mut self, platform: &dyn AudioPlatform) {
        tracing::debug!("bluetooth stop() in state {:?}", self.state);
        self.stop_sco_audio(platform);
        if self.state == BluetoothState::Uninitialized {
            return;
        }
        self.sco_deadline = None;
        if self.proxy.take().is_some() {
            platform.close_headset_proxy();
        }
        self.device = None;
        self.state = BluetoothState::Uninitialized;
    }

    /// Start the SCO audio link. Returns `false` when not possible.
    pub fn start_sco_audio(&mut self, platform: &dyn AudioPlatform) -> bool {
        if self.sco_attempts >= MAX_SCO_CONNECTION_ATTEMPTS {
            tracing::error!("bluetooth SCO connection fails, no more attempts");
            return false;
        }
        if self.state != BluetoothState::HeadsetAvailable {
            tracing::error!("bluetooth SCO connection fails, no headset available");
            return false;
        }
        tracing::debug!("starting Bluetooth SCO and waiting for the audio link");
        self.state = BluetoothState::ScoConnecting;
        platform.start_bluetooth_sco();
        platform.set_bluetooth_sco_on(true);
        self.sco_attempts += 1;
        self.sco_deadline = Some(Instant::now() + SCO_TIMEOUT);
        true
    }

    pub fn stop_sco_audio(&mut self, platform: &dyn AudioPlatform) {
        if !matches!(
            self.state,
            BluetoothState::ScoConnecting | BluetoothState::ScoConnected
        ) {
            return;
        }
        self.sco_deadline = None;
        platform.stop_bluetooth_sco();
        platform.set_bluetooth_sco_on(false);
        self.state = BluetoothState::ScoDisconnecting;
    }

    /// Refresh the headset from the profile proxy.
    pub fn update_device(&mut self) {
        if self.state == BluetoothState::Uninitialized {
            return;
        }
        let Some(proxy) = &self.proxy else {
            return;
        };
        match proxy.connected_devices().into_iter().next() {
            Some(device) => {
                tracing::debug!("connected bluetooth headset: {}", device.name);
                self.device = Some(device);
                self.state = BluetoothState::HeadsetAvailable;
            }
            None => {
                self.device = None;
                self.state = BluetoothState::HeadsetUnavailable;
            }
        }
    }

    pub fn on_service_connected(&mut self, proxy: Box<dyn HeadsetProxy>) -> bool {
        if self.state == BluetoothState::Uninitialized {
            return false;
        }
        tracing::debug!("headset profile connected");
        self.proxy = Some(proxy);
        true
    }

    pub fn on_service_disconnected(&mut self, platform: &dyn AudioPlatform) -> bool {
        if self.state == BluetoothState::Uninitialized {
            return false;
        }
        tracing::debug!("headset profile disconnected");
        self.stop_sco_audio(platform);
        self.proxy = None;
        self.device = None;
        self.state = BluetoothState::HeadsetUnavailable;
        true
    }

    pub fn on_headset_connection_changed(
        &mut self,
        platform: &dyn AudioPlatform,
        connected: bool,
    ) -> bool {
        if self.state == BluetoothState::Uninitialized {
            return false;
        }
        if connected {
            self.sco_attempts = 0;
        } else {
            self.stop_sco_audio(platform);
        }
        true
    }

    /// `initial_sticky` marks the replayed broadcast delivered on registration.
    pub fn on_headset_audio_changed(&mut self, connected: bool, initial_sticky: bool) -> bool {
        if self.state == BluetoothState::Uninitialized {
            return false;
        }
        if connected {
            self.sco_deadline = None;
            if self.state == BluetoothState::ScoConnecting {
                tracing::debug!("bluetooth audio SCO is now connected");
                self.state = BluetoothState::ScoConnected;
                self.sco_attempts = 0;
            } else {
                tracing::warn!("unexpected SCO connection in state {:?}", self.state);
            }
            true
        } else {
            tracing::debug!("bluetooth audio SCO is now disconnected");
            !initial_sticky
        }
    }

    pub fn on_sco_timeout(&mut self, platform: &dyn AudioPlatform) -> bool {
        self.sco_deadline = None;
        if self.state != BluetoothState::ScoConnecting {
            return false;
        }
        let connected = match (&self.proxy, &self.device) {
            (Some(proxy), Some(device)) => proxy.is_audio_connected(device),
            _ => return false,
        };
        if connected {
            self.state = BluetoothState::ScoConnected;
            self.sco_attempts = 0;
        } else {
            tracing::warn!("bluetooth SCO connection attempt timed out");
            self.stop_sco_audio(platform);
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::platform::fake::{FakeHeadset, FakePlatform};

    fn started() -> (BluetoothManager, FakePlatform, FakeHeadset) {
        let platform = FakePlatform::default();
        let headset = FakeHeadset::with_device();
        let mut bt = BluetoothManager::new();
        bt.start(&platform);
        assert!(bt.on_service_connected(Box::new(headset.clone())));
        bt.update_device();
        (bt, platform, headset)
    }

    #[test]
    fn start_requires_adapter_and_sco() {
        let platform = FakePlatform::default();
        platform.update(|s| s.adapter = false);
        let mut bt = BluetoothManager::new();
        bt.start(&platform);
        assert_eq!(bt.state(), BluetoothState::Uninitialized);

        platform.update(|s| {
            s.adapter = true;
            s.sco_available = false;
        });
        bt.start(&platform);
        assert_eq!(bt.state(), BluetoothState::Uninitialized);

        platform.update(|s| s.sco_available = true);
        bt.start(&platform);
        assert_eq!(bt.state(), BluetoothState::HeadsetUnavailable);
        assert!(platform.get().proxy_requested);
    }

    #[test]
    fn proxy_without_devices_stays_unavailable() {
        let platform = FakePlatform::default();
        let mut bt = BluetoothManager::new();
        bt.start(&platform);
        bt.on_service_connected(Box::new(FakeHeadset::default()));
        bt.update_device();
        assert_eq!(bt.state(), BluetoothState::HeadsetUnavailable);
        assert!(bt.device().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn sco_connects_and_clears_deadline() {
        let (mut bt, platform, _headset) = started();
        assert_eq!(bt.state(), BluetoothState::HeadsetAvailable);

        assert!(bt.start_sco_audio(&platform));
        assert_eq!(bt.state(), BluetoothState::ScoConnecting);
        assert_eq!(bt.sco_deadline(), Some(Instant::now() + SCO_TIMEOUT));
        assert_eq!(platform.get().sco_started, 1);
        assert!(platform.get().sco_on);

        assert!(bt.on_headset_audio_changed(true, false));
        assert_eq!(bt.state(), BluetoothState::ScoConnected);
        assert!(bt.sco_deadline().is_none());

        bt.stop_sco_audio(&platform);
        assert_eq!(bt.state(), BluetoothState::ScoDisconnecting);
        assert!(!platform.get().sco_on);
    }

    #[tokio::test(start_paused = true)]
    async fn attempts_are_capped() {
        let (mut bt, platform, headset) = started();
        for _ in 0..MAX_SCO_CONNECTION_ATTEMPTS {
            assert!(bt.start_sco_audio(&platform));
            assert!(bt.on_sco_timeout(&platform));
            assert_eq!(bt.state(), BluetoothState::ScoDisconnecting);
            bt.update_device();
        }
        assert!(!bt.start_sco_audio(&platform));
        assert_eq!(platform.get().sco_started, MAX_SCO_CONNECTION_ATTEMPTS);

        // A fresh headset connection resets the budget.
        bt.on_headset_connection_changed(&platform, true);
        assert!(bt.start_sco_audio(&platform));
        headset.set_audio_connected(true);
        assert!(bt.on_sco_timeout(&platform));
        assert_eq!(bt.state(), BluetoothState::ScoConnected);
    }

    #[test]
    fn sticky_disconnect_is_ignored() {
        let (mut bt, _platform, _headset) = started();
        assert!(!bt.on_headset_audio_changed(false, true));
        assert!(bt.on_headset_audio_changed(false, false));
    }

    #[tokio::test(start_paused = true)]
    async fn headset_loss_stops_sco() {
        let (mut bt, platform, headset) = started();
        bt.start_sco_audio(&platform);
        headset.clear_devices();
        assert!(bt.on_headset_connection_changed(&platform, false));
        assert_eq!(bt.state(), BluetoothState::ScoDisconnecting);
        bt.update_device();
        assert_eq!(bt.state(), BluetoothState::HeadsetUnavailable);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_resets_everything() {
        let (mut bt, platform, _headset) = started();
        bt.start_sco_audio(&platform);
        bt.stop(&platform);
        assert_eq!(bt.state(), BluetoothState::Uninitialized);
        assert!(bt.sco_deadline().is_none());
        assert!(!platform.get().proxy_requested);
        assert!(!bt.on_service_disconnected(&platform));
    }
}
