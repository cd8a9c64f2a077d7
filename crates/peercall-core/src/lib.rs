//! Peer-to-peer call client core.
//!
//! Signaling over a room server (HTTP + WebSocket relay) or a direct TCP
//! link, audio routing across speaker, earpiece, wired and Bluetooth
//! headsets, and capture source selection. Pure Rust with no platform
//! dependencies; the host OS plugs in through the traits in [`audio::platform`].
//! Consumed by native UI shells via UniFFI bindings.

pub mod audio;
pub mod capture;
pub mod errors;
pub mod events;
pub mod messages;
pub mod params;
pub mod settings;
pub mod signaling;

pub use audio::{AudioController, AudioDevice, AudioDeviceManager, SpeakerphoneMode};
pub use capture::{CameraInfo, CaptureSource, select_capture};
pub use errors::CallError;
pub use events::{CallEvent, CallEventListener, ConnectionState, EventEmitter};
pub use messages::{IceCandidate, SdpType, SessionDescription, SignalingMessage};
pub use params::{IceServer, RoomConnectionParameters, SignalingParameters};
pub use settings::{CallSettings, SettingsStore};
pub use signaling::{SignalingClient, create_client};
