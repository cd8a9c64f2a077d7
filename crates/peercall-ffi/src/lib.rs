//! UniFFI bindings for peercall-core.
//!
//! Provides a PeerCallClient object that owns the tokio runtime, the
//! signaling client of the current call and the audio routing task, behind
//! a single FFI-safe interface for the Android shell.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use peercall_core::{
    self,
    audio::{
        AudioCommand, AudioController, AudioDevice as CoreAudioDevice,
        AudioDeviceManager, AudioMode as CoreAudioMode, AudioRouting as CoreAudioRouting,
        BluetoothDevice as CoreBluetoothDevice, BluetoothState as CoreBluetoothState,
        SpeakerphoneMode as CoreSpeakerphoneMode,
    },
    capture::{CameraInfo as CoreCameraInfo, CaptureSource as CoreCaptureSource},
    events::{CallEvent as CoreCallEvent, ConnectionState as CoreConnectionState, EventEmitter},
    messages::{
        IceCandidate as CoreIceCandidate, SdpType as CoreSdpType,
        SessionDescription as CoreSessionDescription,
    },
    params::{IceServer as CoreIceServer, SignalingParameters as CoreSignalingParameters},
    signaling::SignalingClient,
};

uniffi::include_scaffolding!("peercall");

// ── Namespace functions ──────────────────────────────────────────────

/// Initialize tracing/logging. Call once from the host before using PeerCallClient.
/// On Android, stderr goes to logcat for debuggable builds.
fn init_logging() {
    use std::sync::Once;
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| {
                        tracing_subscriber::EnvFilter::new("peercall_core=debug,peercall_ffi=debug")
                    }),
            )
            .with_ansi(false)
            .init();
    });
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

// ── FFI-safe type conversions ──────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SdpType {
    Offer,
    Answer,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionDescription {
    pub sdp_type: SdpType,
    pub description: String,
}

impl From<CoreSessionDescription> for SessionDescription {
    fn from(s: CoreSessionDescription) -> Self {
        let sdp_type = match s.sdp_type {
            CoreSdpType::Offer => SdpType::Offer,
            CoreSdpType::Answer => SdpType::Answer,
        };
        Self {
            sdp_type,
            description: s.description,
        }
    }
}

impl From<SessionDescription> for CoreSessionDescription {
    fn from(s: SessionDescription) -> Self {
        match s.sdp_type {
            SdpType::Offer => CoreSessionDescription::offer(s.description),
            SdpType::Answer => CoreSessionDescription::answer(s.description),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IceCandidate {
    pub sdp_mid: String,
    pub sdp_m_line_index: i32,
    pub sdp: String,
}

impl From<CoreIceCandidate> for IceCandidate {
    fn from(c: CoreIceCandidate) -> Self {
        Self {
            sdp_mid: c.sdp_mid,
            sdp_m_line_index: c.sdp_m_line_index,
            sdp: c.sdp,
        }
    }
}

impl From<IceCandidate> for CoreIceCandidate {
    fn from(c: IceCandidate) -> Self {
        Self {
            sdp_mid: c.sdp_mid,
            sdp_m_line_index: c.sdp_m_line_index,
            sdp: c.sdp,
        }
    }
}

#[derive(Debug, Clone)]
pub struct IceServer {
    pub urls: Vec<String>,
    pub username: String,
    pub credential: String,
}

impl From<CoreIceServer> for IceServer {
    fn from(s: CoreIceServer) -> Self {
        Self {
            urls: s.urls,
            username: s.username,
            credential: s.credential,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SignalingParameters {
    pub ice_servers: Vec<IceServer>,
    pub initiator: bool,
    pub client_id: Option<String>,
    pub wss_url: Option<String>,
    pub wss_post_url: Option<String>,
    pub offer_sdp: Option<SessionDescription>,
    pub ice_candidates: Vec<IceCandidate>,
}

impl From<CoreSignalingParameters> for SignalingParameters {
    fn from(p: CoreSignalingParameters) -> Self {
        Self {
            ice_servers: p.ice_servers.into_iter().map(IceServer::from).collect(),
            initiator: p.initiator,
            client_id: p.client_id,
            wss_url: p.wss_url,
            wss_post_url: p.wss_post_url,
            offer_sdp: p.offer_sdp.map(SessionDescription::from),
            ice_candidates: p.ice_candidates.into_iter().map(IceCandidate::from).collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    New,
    Connected,
    Closed,
    Error,
}

impl From<CoreConnectionState> for ConnectionState {
    fn from(s: CoreConnectionState) -> Self {
        match s {
            CoreConnectionState::New => Self::New,
            CoreConnectionState::Connected => Self::Connected,
            CoreConnectionState::Closed => Self::Closed,
            CoreConnectionState::Error => Self::Error,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioDevice {
    SpeakerPhone,
    WiredHeadset,
    Earpiece,
    Bluetooth,
    None,
}

impl From<CoreAudioDevice> for AudioDevice {
    fn from(d: CoreAudioDevice) -> Self {
        match d {
            CoreAudioDevice::SpeakerPhone => Self::SpeakerPhone,
            CoreAudioDevice::WiredHeadset => Self::WiredHeadset,
            CoreAudioDevice::Earpiece => Self::Earpiece,
            CoreAudioDevice::Bluetooth => Self::Bluetooth,
            CoreAudioDevice::None => Self::None,
        }
    }
}

impl From<AudioDevice> for CoreAudioDevice {
    fn from(d: AudioDevice) -> Self {
        match d {
            AudioDevice::SpeakerPhone => Self::SpeakerPhone,
            AudioDevice::WiredHeadset => Self::WiredHeadset,
            AudioDevice::Earpiece => Self::Earpiece,
            AudioDevice::Bluetooth => Self::Bluetooth,
            AudioDevice::None => Self::None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeakerphoneMode {
    Auto,
    Enabled,
    Disabled,
}

impl From<CoreSpeakerphoneMode> for SpeakerphoneMode {
    fn from(m: CoreSpeakerphoneMode) -> Self {
        match m {
            CoreSpeakerphoneMode::Auto => Self::Auto,
            CoreSpeakerphoneMode::Enabled => Self::Enabled,
            CoreSpeakerphoneMode::Disabled => Self::Disabled,
        }
    }
}

impl From<SpeakerphoneMode> for CoreSpeakerphoneMode {
    fn from(m: SpeakerphoneMode) -> Self {
        match m {
            SpeakerphoneMode::Auto => Self::Auto,
            SpeakerphoneMode::Enabled => Self::Enabled,
            SpeakerphoneMode::Disabled => Self::Disabled,
        }
    }
}

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

impl From<CoreBluetoothState> for BluetoothState {
    fn from(s: CoreBluetoothState) -> Self {
        match s {
            CoreBluetoothState::Uninitialized => Self::Uninitialized,
            CoreBluetoothState::Error => Self::Error,
            CoreBluetoothState::HeadsetUnavailable => Self::HeadsetUnavailable,
            CoreBluetoothState::HeadsetAvailable => Self::HeadsetAvailable,
            CoreBluetoothState::ScoDisconnecting => Self::ScoDisconnecting,
            CoreBluetoothState::ScoConnecting => Self::ScoConnecting,
            CoreBluetoothState::ScoConnected => Self::ScoConnected,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioMode {
    Normal,
    InCommunication,
}

impl From<AudioMode> for CoreAudioMode {
    fn from(m: AudioMode) -> Self {
        match m {
            AudioMode::Normal => Self::Normal,
            AudioMode::InCommunication => Self::InCommunication,
        }
    }
}

impl From<CoreAudioMode> for AudioMode {
    fn from(m: CoreAudioMode) -> Self {
        match m {
            CoreAudioMode::Normal => Self::Normal,
            CoreAudioMode::InCommunication => Self::InCommunication,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AudioRouting {
    pub selected: AudioDevice,
    pub available: Vec<AudioDevice>,
    pub user_selected: AudioDevice,
    pub bluetooth: BluetoothState,
}

impl From<CoreAudioRouting> for AudioRouting {
    fn from(r: CoreAudioRouting) -> Self {
        Self {
            selected: r.selected.into(),
            available: r.available.into_iter().map(AudioDevice::from).collect(),
            user_selected: r.user_selected.into(),
            bluetooth: r.bluetooth.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BluetoothDevice {
    pub name: String,
    pub address: String,
}

#[derive(Debug, Clone)]
pub struct CameraInfo {
    pub device_name: String,
    pub front_facing: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureSource {
    Camera { device_name: String },
    Screen,
}

impl From<CoreCaptureSource> for CaptureSource {
    fn from(s: CoreCaptureSource) -> Self {
        match s {
            CoreCaptureSource::Camera { device_name } => Self::Camera { device_name },
            CoreCaptureSource::Screen => Self::Screen,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CallSettings {
    pub room_server_url: String,
    pub speakerphone: SpeakerphoneMode,
    pub video_call: bool,
    pub loopback: bool,
    pub recent_rooms: Vec<String>,
    pub video_codec: String,
    pub audio_codec: String,
    pub hardware_codec: bool,
    pub display_hud: bool,
}

impl From<peercall_core::CallSettings> for CallSettings {
    fn from(s: peercall_core::CallSettings) -> Self {
        Self {
            room_server_url: s.room_server_url,
            speakerphone: s.speakerphone.into(),
            video_call: s.video_call,
            loopback: s.loopback,
            recent_rooms: s.recent_rooms,
            video_codec: s.video_codec,
            audio_codec: s.audio_codec,
            hardware_codec: s.hardware_codec,
            display_hud: s.display_hud,
        }
    }
}

#[derive(Debug, Clone)]
pub enum CallEvent {
    ConnectedToRoom { params: SignalingParameters },
    RemoteDescription { sdp: SessionDescription },
    RemoteIceCandidate { candidate: IceCandidate },
    RemoteIceCandidatesRemoved { candidates: Vec<IceCandidate> },
    ChannelClose,
    ChannelError { description: String },
    ConnectionStateChanged { state: ConnectionState },
    AudioDeviceChanged { selected: AudioDevice, available: Vec<AudioDevice> },
}

impl From<CoreCallEvent> for CallEvent {
    fn from(e: CoreCallEvent) -> Self {
        match e {
            CoreCallEvent::ConnectedToRoom(p) => Self::ConnectedToRoom { params: p.into() },
            CoreCallEvent::RemoteDescription(s) => Self::RemoteDescription { sdp: s.into() },
            CoreCallEvent::RemoteIceCandidate(c) => {
                Self::RemoteIceCandidate { candidate: c.into() }
            }
            CoreCallEvent::RemoteIceCandidatesRemoved(cs) => Self::RemoteIceCandidatesRemoved {
                candidates: cs.into_iter().map(IceCandidate::from).collect(),
            },
            CoreCallEvent::ChannelClose => Self::ChannelClose,
            CoreCallEvent::ChannelError(description) => Self::ChannelError { description },
            CoreCallEvent::ConnectionStateChanged(s) => {
                Self::ConnectionStateChanged { state: s.into() }
            }
            CoreCallEvent::AudioDeviceChanged { selected, available } => {
                Self::AudioDeviceChanged {
                    selected: selected.into(),
                    available: available.into_iter().map(AudioDevice::from).collect(),
                }
            }
        }
    }
}

// ── Error conversion ──────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum CallError {
    #[error("Connection error: {msg}")]
    Connection { msg: String },
    #[error("Room error: {msg}")]
    Room { msg: String },
    #[error("HTTP error: {msg}")]
    Http { msg: String },
    #[error("Protocol error: {msg}")]
    Protocol { msg: String },
    #[error("Invalid state: {msg}")]
    InvalidState { msg: String },
    #[error("Invalid URL: {msg}")]
    InvalidUrl { msg: String },
    #[error("Audio error: {msg}")]
    Audio { msg: String },
    #[error("Capture error: {msg}")]
    Capture { msg: String },
}

impl From<peercall_core::CallError> for CallError {
    fn from(e: peercall_core::CallError) -> Self {
        tracing::error!("CallError: {e}");
        match e {
            peercall_core::CallError::Connection(msg) => Self::Connection { msg },
            peercall_core::CallError::Room(msg) => Self::Room { msg },
            peercall_core::CallError::Http(msg) => Self::Http { msg },
            peercall_core::CallError::Protocol(msg) => Self::Protocol { msg },
            peercall_core::CallError::InvalidState(msg) => Self::InvalidState { msg },
            peercall_core::CallError::InvalidUrl(msg) => Self::InvalidUrl { msg },
            peercall_core::CallError::Audio(msg) => Self::Audio { msg },
            peercall_core::CallError::Capture(msg) => Self::Capture { msg },
        }
    }
}

// ── Callback interfaces ───────────────────────────────────────────────

pub trait CallEventListener: Send + Sync {
    fn on_event(&self, event: CallEvent);
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
    fn request_audio_focus(&self) -> bool;
    fn abandon_audio_focus(&self);
    fn set_proximity_monitoring(&self, enabled: bool);
    fn has_bluetooth_adapter(&self) -> bool;
    fn is_bluetooth_sco_available_off_call(&self) -> bool;
    fn start_bluetooth_sco(&self);
    fn stop_bluetooth_sco(&self);
    fn set_bluetooth_sco_on(&self, on: bool);
    fn request_headset_proxy(&self) -> bool;
    fn close_headset_proxy(&self);
}

pub trait HeadsetProxy: Send + Sync {
    fn connected_devices(&self) -> Vec<BluetoothDevice>;
    fn is_audio_connected(&self, device: BluetoothDevice) -> bool;
}

// ── Bridges: FFI callbacks → core traits ──────────────────────────────

struct BridgeListener {
    ffi_listener: Arc<dyn CallEventListener>,
}

impl peercall_core::CallEventListener for BridgeListener {
    fn on_event(&self, event: CoreCallEvent) {
        self.ffi_listener.on_event(event.into());
    }
}

struct PlatformBridge(Box<dyn AudioPlatform>);

impl peercall_core::audio::AudioPlatform for PlatformBridge {
    fn has_earpiece(&self) -> bool {
        self.0.has_earpiece()
    }
    fn has_wired_headset(&self) -> bool {
        self.0.has_wired_headset()
    }
    fn mode(&self) -> CoreAudioMode {
        self.0.mode().into()
    }
    fn set_mode(&self, mode: CoreAudioMode) {
        self.0.set_mode(mode.into())
    }
    fn is_speakerphone_on(&self) -> bool {
        self.0.is_speakerphone_on()
    }
    fn set_speakerphone_on(&self, on: bool) {
        self.0.set_speakerphone_on(on)
    }
    fn is_microphone_mute(&self) -> bool {
        self.0.is_microphone_mute()
    }
    fn set_microphone_mute(&self, mute: bool) {
        self.0.set_microphone_mute(mute)
    }
    fn request_audio_focus(&self) -> bool {
        self.0.request_audio_focus()
    }
    fn abandon_audio_focus(&self) {
        self.0.abandon_audio_focus()
    }
    fn set_proximity_monitoring(&self, enabled: bool) {
        self.0.set_proximity_monitoring(enabled)
    }
    fn has_bluetooth_adapter(&self) -> bool {
        self.0.has_bluetooth_adapter()
    }
    fn is_bluetooth_sco_available_off_call(&self) -> bool {
        self.0.is_bluetooth_sco_available_off_call()
    }
    fn start_bluetooth_sco(&self) {
        self.0.start_bluetooth_sco()
    }
    fn stop_bluetooth_sco(&self) {
        self.0.stop_bluetooth_sco()
    }
    fn set_bluetooth_sco_on(&self, on: bool) {
        self.0.set_bluetooth_sco_on(on)
    }
    fn request_headset_proxy(&self) -> bool {
        self.0.request_headset_proxy()
    }
    fn close_headset_proxy(&self) {
        self.0.close_headset_proxy()
    }
}

struct HeadsetBridge(Box<dyn HeadsetProxy>);

impl peercall_core::audio::HeadsetProxy for HeadsetBridge {
    fn connected_devices(&self) -> Vec<CoreBluetoothDevice> {
        self.0
            .connected_devices()
            .into_iter()
            .map(|d| CoreBluetoothDevice {
                name: d.name,
                address: d.address,
            })
            .collect()
    }

    fn is_audio_connected(&self, device: &CoreBluetoothDevice) -> bool {
        self.0.is_audio_connected(BluetoothDevice {
            name: device.name.clone(),
            address: device.address.clone(),
        })
    }
}

// ── PeerCallClient: main FFI object ──────────────────────────────────

pub struct PeerCallClient {
    emitter: EventEmitter,
    settings: peercall_core::SettingsStore,
    signaling: Mutex<Option<Box<dyn SignalingClient>>>,
    // Id of the signaling session whose events reach the listeners.
    session: Arc<AtomicU64>,
    audio: Mutex<Option<AudioController>>,
    rt: tokio::runtime::Runtime,
}

impl PeerCallClient {
    pub fn new(data_dir: String) -> Result<Self, CallError> {
        let rt = tokio::runtime::Runtime::new().map_err(|e| CallError::Connection {
            msg: format!("failed to create tokio runtime: {e}"),
        })?;
        let settings = peercall_core::SettingsStore::new(&data_dir);
        tracing::debug!("PeerCallClient created, data dir {data_dir}");
        Ok(Self {
            emitter: EventEmitter::new(),
            settings,
            signaling: Mutex::new(None),
            session: Arc::new(AtomicU64::new(0)),
            audio: Mutex::new(None),
            rt,
        })
    }

    pub fn add_listener(&self, listener: Box<dyn CallEventListener>) {
        let bridge = Arc::new(BridgeListener {
            ffi_listener: Arc::from(listener),
        });
        self.emitter.add_listener(bridge);
    }

    /// Start a call session. Returns the room id used, which is generated
    /// for loopback calls without one.
    pub fn connect_to_room(
        &self,
        room_id: String,
        loopback: bool,
        url_parameters: Option<String>,
    ) -> Result<String, CallError> {
        let room_id = match room_id.trim() {
            "" if loopback => peercall_core::params::random_room_id(),
            "" => {
                return Err(CallError::InvalidState {
                    msg: "room id is empty".to_string(),
                });
            }
            id => id.to_string(),
        };

        let settings = self.settings.get();
        let mut params = peercall_core::RoomConnectionParameters::new(
            settings.room_server_url,
            room_id.clone(),
            loopback,
        );
        params.url_parameters = url_parameters.filter(|q| !q.is_empty());
        if !loopback {
            self.settings.add_recent_room(&room_id);
        }

        let _guard = self.rt.enter();
        let mut current = lock(&self.signaling);
        let id = self.session.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(previous) = current.take() {
            tracing::info!("replacing the active signaling session");
            previous.disconnect_from_room();
        }
        let emitter = self.emitter.scoped(id, self.session.clone());
        let client = peercall_core::create_client(&params, emitter);
        client.connect_to_room(params);
        *current = Some(client);
        Ok(room_id)
    }

    fn with_signaling(&self, f: impl FnOnce(&dyn SignalingClient)) {
        match lock(&self.signaling).as_deref() {
            Some(client) => f(client),
            None => tracing::warn!("no active signaling session"),
        }
    }

    pub fn send_offer_sdp(&self, sdp: SessionDescription) {
        self.with_signaling(|c| c.send_offer_sdp(sdp.into()));
    }

    pub fn send_answer_sdp(&self, sdp: SessionDescription) {
        self.with_signaling(|c| c.send_answer_sdp(sdp.into()));
    }

    pub fn send_local_ice_candidate(&self, candidate: IceCandidate) {
        self.with_signaling(|c| c.send_local_ice_candidate(candidate.into()));
    }

    pub fn send_local_ice_candidate_removals(&self, candidates: Vec<IceCandidate>) {
        let candidates = candidates.into_iter().map(CoreIceCandidate::from).collect();
        self.with_signaling(|c| c.send_local_ice_candidate_removals(candidates));
    }

    /// Leave the room. The session stays around until the next connect so
    /// its worker can finish the teardown.
    pub fn disconnect_from_room(&self) {
        self.with_signaling(|c| c.disconnect_from_room());
    }

    pub fn connection_state(&self) -> ConnectionState {
        lock(&self.signaling)
            .as_ref()
            .map(|c| c.state())
            .unwrap_or(CoreConnectionState::New)
            .into()
    }

    /// Start audio routing. A running session is shut down first so the
    /// new one saves the platform state from before the call.
    pub fn start_audio(&self, platform: Box<dyn AudioPlatform>) {
        let mut audio = lock(&self.audio);
        if let Some(previous) = audio.take() {
            tracing::info!("replacing the active audio session");
            self.rt.block_on(previous.shutdown());
        }
        let mode = self.settings.get().speakerphone;
        let manager =
            AudioDeviceManager::new(Box::new(PlatformBridge(platform)), mode, self.emitter.clone());
        let _guard = self.rt.enter();
        let controller = AudioController::spawn(manager);
        controller.start();
        *audio = Some(controller);
    }

    pub fn stop_audio(&self) {
        let previous = lock(&self.audio).take();
        if let Some(controller) = previous {
            self.rt.block_on(controller.shutdown());
        }
    }

    fn audio_command(&self, command: AudioCommand) {
        match lock(&self.audio).as_ref() {
            Some(controller) => controller.send(command),
            None => tracing::warn!("audio routing is not running"),
        }
    }

    pub fn select_audio_device(&self, device: AudioDevice) {
        self.audio_command(AudioCommand::SelectDevice(device.into()));
    }

    pub fn set_default_audio_device(&self, device: AudioDevice) {
        self.audio_command(AudioCommand::SetDefaultDevice(device.into()));
    }

    pub fn audio_routing(&self) -> Option<AudioRouting> {
        let controller = lock(&self.audio).clone()?;
        self.rt
            .block_on(controller.routing())
            .map(AudioRouting::from)
    }

    pub fn on_wired_headset_changed(&self, plugged: bool, has_microphone: bool) {
        self.audio_command(AudioCommand::WiredHeadset {
            plugged,
            has_microphone,
        });
    }

    pub fn on_proximity_changed(&self, near: bool) {
        self.audio_command(AudioCommand::Proximity { near });
    }

    pub fn on_bluetooth_service_connected(&self, proxy: Box<dyn HeadsetProxy>) {
        self.audio_command(AudioCommand::BluetoothServiceConnected(Box::new(
            HeadsetBridge(proxy),
        )));
    }

    pub fn on_bluetooth_service_disconnected(&self) {
        self.audio_command(AudioCommand::BluetoothServiceDisconnected);
    }

    pub fn on_headset_connection_changed(&self, connected: bool) {
        self.audio_command(AudioCommand::HeadsetConnection { connected });
    }

    pub fn on_headset_audio_changed(&self, connected: bool, initial_sticky: bool) {
        self.audio_command(AudioCommand::HeadsetAudio {
            connected,
            initial_sticky,
        });
    }

    pub fn select_capture(
        &self,
        cameras: Vec<CameraInfo>,
        screen: bool,
    ) -> Result<CaptureSource, CallError> {
        let cameras: Vec<CoreCameraInfo> = cameras
            .into_iter()
            .map(|c| CoreCameraInfo {
                device_name: c.device_name,
                front_facing: c.front_facing,
            })
            .collect();
        peercall_core::select_capture(&cameras, screen)
            .map(CaptureSource::from)
            .map_err(CallError::from)
    }

    pub fn get_settings(&self) -> CallSettings {
        self.settings.get().into()
    }

    pub fn set_room_server_url(&self, url: String) -> Result<(), CallError> {
        self.settings
            .set_room_server_url(&url)
            .map_err(CallError::from)
    }

    pub fn set_speakerphone(&self, mode: SpeakerphoneMode) {
        self.settings.set_speakerphone(mode.into());
        if lock(&self.audio).is_some() {
            self.audio_command(AudioCommand::SetSpeakerphoneMode(mode.into()));
        }
    }

    pub fn set_video_call(&self, enabled: bool) {
        self.settings.set_video_call(enabled);
    }

    pub fn set_loopback(&self, enabled: bool) {
        self.settings.set_loopback(enabled);
    }

    pub fn set_video_codec(&self, codec: String) {
        self.settings.set_video_codec(&codec);
    }

    pub fn set_audio_codec(&self, codec: String) {
        self.settings.set_audio_codec(&codec);
    }

    pub fn set_hardware_codec(&self, enabled: bool) {
        self.settings.set_hardware_codec(enabled);
    }

    pub fn set_display_hud(&self, enabled: bool) {
        self.settings.set_display_hud(enabled);
    }

    pub fn remove_recent_room(&self, room_id: String) {
        self.settings.remove_recent_room(&room_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::time::Duration;

    struct Collector(Mutex<mpsc::Sender<CallEvent>>);

    impl CallEventListener for Collector {
        fn on_event(&self, event: CallEvent) {
            let _ = lock(&self.0).send(event);
        }
    }

    fn client() -> (PeerCallClient, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let client = PeerCallClient::new(dir.path().to_str().unwrap().to_string()).unwrap();
        (client, dir)
    }

    #[test]
    fn test_empty_room_id_is_rejected() {
        let (client, _dir) = client();
        assert!(matches!(
            client.connect_to_room("  ".into(), false, None),
            Err(CallError::InvalidState { .. })
        ));
        assert_eq!(client.connection_state(), ConnectionState::New);
    }

    #[test]
    fn test_unreachable_room_server_reports_channel_error() {
        let (client, _dir) = client();
        client.set_room_server_url("http://127.0.0.1:1".into()).unwrap();
        let (tx, rx) = mpsc::channel();
        client.add_listener(Box::new(Collector(Mutex::new(tx))));

        let room = client.connect_to_room("room-x".into(), false, None).unwrap();
        assert_eq!(room, "room-x");
        assert_eq!(client.get_settings().recent_rooms, vec!["room-x".to_string()]);

        let error = loop {
            match rx.recv_timeout(Duration::from_secs(10)).unwrap() {
                CallEvent::ChannelError { description } => break description,
                _ => continue,
            }
        };
        assert!(error.starts_with("Room join error"), "{error}");
        assert_eq!(client.connection_state(), ConnectionState::Error);
    }

    #[test]
    fn test_loopback_generates_room_id() {
        let (client, _dir) = client();
        client.set_room_server_url("http://127.0.0.1:1".into()).unwrap();
        let room = client.connect_to_room(String::new(), true, None).unwrap();
        assert!(room.parse::<u32>().is_ok());
        assert!(client.get_settings().recent_rooms.is_empty());
    }

    #[test]
    fn test_event_conversion() {
        let event: CallEvent = CoreCallEvent::RemoteDescription(CoreSessionDescription::answer(
            "v=0",
        ))
        .into();
        match event {
            CallEvent::RemoteDescription { sdp } => {
                assert_eq!(sdp.sdp_type, SdpType::Answer);
                assert_eq!(sdp.description, "v=0");
            }
            other => panic!("unexpected event {other:?}"),
        }

        let candidate = CoreIceCandidate::from(IceCandidate {
            sdp_mid: "0".into(),
            sdp_m_line_index: 0,
            sdp: "candidate:1".into(),
        });
        assert_eq!(candidate.sdp, "candidate:1");
    }

    #[test]
    fn test_capture_and_settings_round_trip() {
        let (client, _dir) = client();
        let source = client
            .select_capture(
                vec![CameraInfo {
                    device_name: "back".into(),
                    front_facing: false,
                }],
                false,
            )
            .unwrap();
        assert_eq!(source, CaptureSource::Camera { device_name: "back".into() });
        assert!(matches!(
            client.select_capture(vec![], false),
            Err(CallError::Capture { .. })
        ));

        client.set_speakerphone(SpeakerphoneMode::Disabled);
        assert_eq!(client.get_settings().speakerphone, SpeakerphoneMode::Disabled);
        assert!(client.audio_routing().is_none());
    }

    #[derive(Clone)]
    struct PhoneAudio(Arc<Mutex<(AudioMode, bool, bool)>>);

    impl PhoneAudio {
        /// Idle phone: normal mode, mic muted, no audio focus.
        fn idle() -> Self {
            Self(Arc::new(Mutex::new((AudioMode::Normal, true, false))))
        }

        fn snapshot(&self) -> (AudioMode, bool, bool) {
            *lock(&self.0)
        }
    }

    impl AudioPlatform for PhoneAudio {
        fn has_earpiece(&self) -> bool {
            true
        }
        fn has_wired_headset(&self) -> bool {
            false
        }
        fn mode(&self) -> AudioMode {
            lock(&self.0).0
        }
        fn set_mode(&self, mode: AudioMode) {
            lock(&self.0).0 = mode;
        }
        fn is_speakerphone_on(&self) -> bool {
            false
        }
        fn set_speakerphone_on(&self, _on: bool) {}
        fn is_microphone_mute(&self) -> bool {
            lock(&self.0).1
        }
        fn set_microphone_mute(&self, mute: bool) {
            lock(&self.0).1 = mute;
        }
        fn request_audio_focus(&self) -> bool {
            lock(&self.0).2 = true;
            true
        }
        fn abandon_audio_focus(&self) {
            lock(&self.0).2 = false;
        }
        fn set_proximity_monitoring(&self, _enabled: bool) {}
        fn has_bluetooth_adapter(&self) -> bool {
            false
        }
        fn is_bluetooth_sco_available_off_call(&self) -> bool {
            false
        }
        fn start_bluetooth_sco(&self) {}
        fn stop_bluetooth_sco(&self) {}
        fn set_bluetooth_sco_on(&self, _on: bool) {}
        fn request_headset_proxy(&self) -> bool {
            false
        }
        fn close_headset_proxy(&self) {}
    }

    #[test]
    fn test_restarting_audio_restores_idle_phone_on_stop() {
        let (client, _dir) = client();
        let phone = PhoneAudio::idle();

        client.start_audio(Box::new(phone.clone()));
        assert!(client.audio_routing().is_some());
        assert_eq!(phone.snapshot(), (AudioMode::InCommunication, false, true));

        client.start_audio(Box::new(phone.clone()));
        assert!(client.audio_routing().is_some());
        client.stop_audio();

        assert_eq!(phone.snapshot(), (AudioMode::Normal, true, false));
        assert!(client.audio_routing().is_none());
    }

    #[test]
    fn test_replaced_session_events_are_not_delivered() {
        let (client, _dir) = client();
        client.set_room_server_url("http://127.0.0.1:1".into()).unwrap();
        let (tx, rx) = mpsc::channel();
        client.add_listener(Box::new(Collector(Mutex::new(tx))));

        let wait_for_error = || loop {
            match rx.recv_timeout(Duration::from_secs(10)).unwrap() {
                CallEvent::ChannelError { .. } => break,
                _ => continue,
            }
        };

        client.connect_to_room("room-a".into(), false, None).unwrap();
        wait_for_error();
        client.connect_to_room("room-b".into(), false, None).unwrap();
        wait_for_error();
        std::thread::sleep(Duration::from_millis(300));

        let closed = rx.try_iter().any(|e| {
            matches!(
                e,
                CallEvent::ConnectionStateChanged {
                    state: ConnectionState::Closed
                }
            )
        });
        assert!(!closed);
    }
}
