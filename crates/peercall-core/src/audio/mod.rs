//! Audio routing for calls: speakerphone, earpiece, wired and Bluetooth
//! headsets.

pub mod bluetooth;
pub mod device;
pub mod driver;
pub mod manager;
pub mod platform;

pub use bluetooth::{BluetoothManager, BluetoothState};
pub use device::{AudioDevice, AudioManagerState, SpeakerphoneMode};
pub use driver::{AudioCommand, AudioController};
pub use manager::{AudioDeviceManager, AudioRouting};
pub use platform::{AudioMode, AudioPlatform, BluetoothDevice, HeadsetProxy};
