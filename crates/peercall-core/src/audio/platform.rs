//! What the audio routing needs from the host OS. The Android shell
//! implements these over `AudioManager` and the Bluetooth headset profile.

/// Audio mode of the device-wide audio manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioMode {
    Normal,
    InCommunication,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BluetoothDevice {
    pub name: String,
    pub address: String,
}

pub trait AudioPlatform: Send + Sync {
    fn has_earpiece(&self) -> bool;
    fn has_wired_headset(&self) -> bool;

    fn mode(&self) -> AudioMode;
    fn set_mode(&self, mode: AudioMode);
    fn is_speakerphone_on(&self) -> bool;
    fn set_speakerphone_on(&self, on: bool);
    fn is_microphone_mute(&self) -> bool;
    fn set_microphone_mute(&self, mute: bool);

    /// Returns `true` when focus was granted.
    fn request_audio_focus(&self) -> bool;
    fn abandon_audio_focus(&self);

    fn set_proximity_monitoring(&self, enabled: bool);

    fn has_bluetooth_adapter(&self) -> bool;
    fn is_bluetooth_sco_available_off_call(&self) -> bool;
    fn start_bluetooth_sco(&self);
    fn stop_bluetooth_sco(&self);
    fn set_bluetooth_sco_on(&self, on: bool);
    /// Ask for the headset profile proxy; it arrives later through
    /// `on_bluetooth_service_connected`.
    fn request_headset_proxy(&self) -> bool;
    fn close_headset_proxy(&self);
}

/// The connected headset profile.
pub trait HeadsetProxy: Send + Sync {
    fn connected_devices(&self) -> Vec<BluetoothDevice>;
    fn is_audio_connected(&self, device: &BluetoothDevice) -> bool;
}
