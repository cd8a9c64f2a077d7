//! Picks the audio route for a call: Bluetooth over wired headset over the
//! user's choice over the default device.

use std::collections::BTreeSet;

use crate::errors::CallError;
use crate::events::{CallEvent, EventEmitter};

use super::bluetooth::{BluetoothManager, BluetoothState};
use super::device::{AudioDevice, AudioManagerState, SpeakerphoneMode};
use super::platform::{AudioMode, AudioPlatform, HeadsetProxy};

#[derive(Debug, Clone, Copy)]
struct SavedAudioState {
    mode: AudioMode,
    speakerphone: bool,
    microphone_mute: bool,
}

/// Snapshot of the routing for the UI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioRouting {
    pub selected: AudioDevice,
    pub available: Vec<AudioDevice>,
    pub user_selected: AudioDevice,
    pub bluetooth: BluetoothState,
}

pub struct AudioDeviceManager {
    platform: Box<dyn AudioPlatform>,
    emitter: EventEmitter,
    bluetooth: BluetoothManager,
    state: AudioManagerState,
    speakerphone_mode: SpeakerphoneMode,
    default_device: AudioDevice,
    selected: AudioDevice,
    user_selected: AudioDevice,
    available: BTreeSet<AudioDevice>,
    has_wired_headset: bool,
    saved: Option<SavedAudioState>,
}

impl AudioDeviceManager {
    pub fn new(
        platform: Box<dyn AudioPlatform>,
        speakerphone_mode: SpeakerphoneMode,
        emitter: EventEmitter,
    ) -> Self {
        let mut default_device = speakerphone_mode.default_device();
        if default_device == AudioDevice::Earpiece && !platform.has_earpiece() {
            default_device = AudioDevice::SpeakerPhone;
        }
        tracing::debug!("default audio device: {default_device:?}");
        Self {
            platform,
            emitter,
            bluetooth: BluetoothManager::new(),
            state: AudioManagerState::Uninitialized,
            speakerphone_mode,
            default_device,
            selected: AudioDevice::None,
            user_selected: AudioDevice::None,
            available: BTreeSet::new(),
            has_wired_headset: false,
            saved: None,
        }
    }

    pub fn state(&self) -> AudioManagerState {
        self.state
    }

    pub fn selected_audio_device(&self) -> AudioDevice {
        self.selected
    }

    pub fn audio_devices(&self) -> Vec<AudioDevice> {
        self.available.iter().copied().collect()
    }

    pub fn bluetooth(&self) -> &BluetoothManager {
        &self.bluetooth
    }

    pub fn routing(&self) -> AudioRouting {
        AudioRouting {
            selected: self.selected,
            available: self.audio_devices(),
            user_selected: self.user_selected,
            bluetooth: self.bluetooth.state(),
        }
    }

    pub fn start(&mut self) {
        if self.state == AudioManagerState::Running {
            tracing::error!("audio manager is already running");
            return;
        }
        tracing::info!("starting audio manager");

        self.saved = Some(SavedAudioState {
            mode: self.platform.mode(),
            speakerphone: self.platform.is_speakerphone_on(),
            microphone_mute: self.platform.is_microphone_mute(),
        });
        self.has_wired_headset = self.platform.has_wired_headset();

        if self.platform.request_audio_focus() {
            tracing::debug!("audio focus request granted for voice call");
        } else {
            tracing::error!("audio focus request failed");
        }
        self.platform.set_mode(AudioMode::InCommunication);
        self.platform.set_microphone_mute(false);

        self.user_selected = AudioDevice::None;
        self.selected = AudioDevice::None;
        self.available.clear();

        self.bluetooth.start(self.platform.as_ref());
        self.platform.set_proximity_monitoring(true);
        self.state = AudioManagerState::Running;
        self.update_audio_device_state();
    }

    pub fn stop(&mut self) {
        if self.state != AudioManagerState::Running {
            tracing::error!("trying to stop audio manager in state {:?}", self.state);
            return;
        }
        tracing::info!("stopping audio manager");
        self.state = AudioManagerState::Uninitialized;

        self.bluetooth.stop(self.platform.as_ref());
        if let Some(saved) = self.saved.take() {
            self.platform.set_speakerphone_on(saved.speakerphone);
            self.platform.set_microphone_mute(saved.microphone_mute);
            self.platform.set_mode(saved.mode);
        }
        self.platform.abandon_audio_focus();
        self.platform.set_proximity_monitoring(false);

        self.selected = AudioDevice::None;
        self.user_selected = AudioDevice::None;
        self.available.clear();
    }

    fn is_running(&self) -> bool {
        self.state == AudioManagerState::Running
    }

    /// Speaker or earpiece; the earpiece falls back to the speaker on
    /// devices without one. Recorded while stopped, applied on the next start.
    pub fn set_default_audio_device(&mut self, device: AudioDevice) -> Result<(), CallError> {
        self.default_device = match device {
            AudioDevice::SpeakerPhone => AudioDevice::SpeakerPhone,
            AudioDevice::Earpiece if self.platform.has_earpiece() => AudioDevice::Earpiece,
            AudioDevice::Earpiece => AudioDevice::SpeakerPhone,
            other => {
                return Err(CallError::Audio(format!(
                    "invalid default audio device selection: {other:?}"
                )));
            }
        };
        tracing::debug!("default audio device: {:?}", self.default_device);
        self.update_audio_device_state();
        Ok(())
    }

    pub fn select_audio_device(&mut self, device: AudioDevice) -> Result<(), CallError> {
        if !self.available.contains(&device) {
            return Err(CallError::Audio(format!(
                "cannot select {device:?} from available {:?}",
                self.available
            )));
        }
        self.user_selected = device;
        self.update_audio_device_state();
        Ok(())
    }

    pub fn set_speakerphone_mode(&mut self, mode: SpeakerphoneMode) {
        self.speakerphone_mode = mode;
        let device = mode.default_device();
        if let Err(e) = self.set_default_audio_device(device) {
            tracing::warn!("{e}");
        }
    }

    pub fn on_wired_headset_changed(&mut self, plugged: bool, has_microphone: bool) {
        tracing::debug!("wired headset plugged: {plugged}, microphone: {has_microphone}");
        self.has_wired_headset = plugged;
        self.update_audio_device_state();
    }

    /// Only acts in auto speakerphone mode with just speaker and earpiece.
    pub fn on_proximity_changed(&mut self, near: bool) {
        if !self.is_running() || self.speakerphone_mode != SpeakerphoneMode::Auto {
            return;
        }
        let only_builtin = self.available.len() == 2
            && self.available.contains(&AudioDevice::Earpiece)
            && self.available.contains(&AudioDevice::SpeakerPhone);
        if !only_builtin {
            return;
        }
        let device = if near {
            AudioDevice::Earpiece
        } else {
            AudioDevice::SpeakerPhone
        };
        if device != self.selected {
            self.set_audio_device_internal(device);
            self.notify();
        }
    }

    pub fn on_bluetooth_service_connected(&mut self, proxy: Box<dyn HeadsetProxy>) {
        if self.bluetooth.on_service_connected(proxy) {
            self.update_audio_device_state();
        }
    }

    pub fn on_bluetooth_service_disconnected(&mut self) {
        if self.bluetooth.on_service_disconnected(self.platform.as_ref()) {
            self.update_audio_device_state();
        }
    }

    pub fn on_headset_connection_changed(&mut self, connected: bool) {
        if self
            .bluetooth
            .on_headset_connection_changed(self.platform.as_ref(), connected)
        {
            self.update_audio_device_state();
        }
    }

    pub fn on_headset_audio_changed(&mut self, connected: bool, initial_sticky: bool) {
        if self.bluetooth.on_headset_audio_changed(connected, initial_sticky) {
            self.update_audio_device_state();
        }
    }

    pub fn on_sco_timeout(&mut self) {
        if self.bluetooth.on_sco_timeout(self.platform.as_ref()) {
            self.update_audio_device_state();
        }
    }

    /// Recompute the available set and the selected route. No-op unless running.
    pub fn update_audio_device_state(&mut self) {
        if !self.is_running() {
            return;
        }
        if matches!(
            self.bluetooth.state(),
            BluetoothState::HeadsetAvailable
                | BluetoothState::HeadsetUnavailable
                | BluetoothState::ScoDisconnecting
        ) {
            self.bluetooth.update_device();
        }
        let bt = self.bluetooth.state();

        let mut devices = BTreeSet::new();
        if matches!(
            bt,
            BluetoothState::ScoConnected
                | BluetoothState::ScoConnecting
                | BluetoothState::HeadsetAvailable
        ) {
            devices.insert(AudioDevice::Bluetooth);
        }
        if self.has_wired_headset {
            devices.insert(AudioDevice::WiredHeadset);
        } else {
            devices.insert(AudioDevice::SpeakerPhone);
            if self.platform.has_earpiece() {
                devices.insert(AudioDevice::Earpiece);
            }
        }
        let mut set_changed = devices != self.available;
        self.available = devices;

        if bt == BluetoothState::HeadsetUnavailable && self.user_selected == AudioDevice::Bluetooth {
            self.user_selected = AudioDevice::None;
        }
        if self.has_wired_headset && self.user_selected == AudioDevice::SpeakerPhone {
            self.user_selected = AudioDevice::WiredHeadset;
        }
        if !self.has_wired_headset && self.user_selected == AudioDevice::WiredHeadset {
            self.user_selected = AudioDevice::SpeakerPhone;
        }

        let user_wants_bluetooth = matches!(
            self.user_selected,
            AudioDevice::None | AudioDevice::Bluetooth
        );
        let need_start = bt == BluetoothState::HeadsetAvailable && user_wants_bluetooth;
        let need_stop = matches!(
            bt,
            BluetoothState::ScoConnected | BluetoothState::ScoConnecting
        ) && !user_wants_bluetooth;

        if need_stop {
            self.bluetooth.stop_sco_audio(self.platform.as_ref());
            self.bluetooth.update_device();
        }
        if need_start
            && !need_stop
            && !self.bluetooth.start_sco_audio(self.platform.as_ref())
        {
            self.available.remove(&AudioDevice::Bluetooth);
            set_changed = true;
        }

        let device = if self.bluetooth.state() == BluetoothState::ScoConnected {
            AudioDevice::Bluetooth
        } else if self.has_wired_headset {
            AudioDevice::WiredHeadset
        } else if self.user_selected != AudioDevice::None
            && self.user_selected != AudioDevice::Bluetooth
            && self.available.contains(&self.user_selected)
        {
            self.user_selected
        } else {
            self.default_device
        };

        if device != self.selected || set_changed {
            self.set_audio_device_internal(device);
            tracing::info!(
                "audio device changed: selected {:?}, available {:?}",
                self.selected,
                self.available
            );
            self.notify();
        }
    }

    fn set_audio_device_internal(&mut self, device: AudioDevice) {
        tracing::debug!("set audio device: {device:?}");
        match device {
            AudioDevice::SpeakerPhone => self.platform.set_speakerphone_on(true),
            AudioDevice::Earpiece | AudioDevice::WiredHeadset | AudioDevice::Bluetooth => {
                self.platform.set_speakerphone_on(false)
            }
            AudioDevice::None => tracing::error!("invalid audio device selection"),
        }
        self.selected = device;
    }

    fn notify(&self) {
        self.emitter.emit(CallEvent::AudioDeviceChanged {
            selected: self.selected,
            available: self.audio_devices(),
        });
    }
}
