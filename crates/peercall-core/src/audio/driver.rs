//! Runs an [`AudioDeviceManager`] on its own task. Platform callbacks are
//! posted as [`AudioCommand`]s so the manager is only touched from one
//! place, and the task sleeps on the Bluetooth SCO deadline.

use std::ops::ControlFlow;

use tokio::sync::{mpsc, oneshot};
use tokio::time::sleep_until;

use super::device::{AudioDevice, AudioManagerState, SpeakerphoneMode};
use super::manager::{AudioDeviceManager, AudioRouting};
use super::platform::HeadsetProxy;

pub enum AudioCommand {
    Start,
    Stop,
    SetDefaultDevice(AudioDevice),
    SelectDevice(AudioDevice),
    SetSpeakerphoneMode(SpeakerphoneMode),
    WiredHeadset { plugged: bool, has_microphone: bool },
    Proximity { near: bool },
    BluetoothServiceConnected(Box<dyn HeadsetProxy>),
    BluetoothServiceDisconnected,
    HeadsetConnection { connected: bool },
    HeadsetAudio { connected: bool, initial_sticky: bool },
    Routing(oneshot::Sender<AudioRouting>),
    /// Stop the manager and end the task; the sender fires once the
    /// platform state is restored.
    Shutdown(oneshot::Sender<()>),
}

/// Cheap handle to the audio task. Dropping every handle stops the manager.
#[derive(Clone)]
pub struct AudioController {
    commands: mpsc::UnboundedSender<AudioCommand>,
}

impl AudioController {
    /// Spawn the audio task. Must be called within a tokio runtime.
    pub fn spawn(manager: AudioDeviceManager) -> Self {
        let (commands, rx) = mpsc::unbounded_channel();
        tokio::spawn(run(manager, rx));
        Self { commands }
    }

    pub fn send(&self, command: AudioCommand) {
        if self.commands.send(command).is_err() {
            tracing::warn!("audio task has stopped");
        }
    }

    pub fn start(&self) {
        self.send(AudioCommand::Start);
    }

    pub fn stop(&self) {
        self.send(AudioCommand::Stop);
    }

    pub fn select_audio_device(&self, device: AudioDevice) {
        self.send(AudioCommand::SelectDevice(device));
    }

    pub fn set_default_audio_device(&self, device: AudioDevice) {
        self.send(AudioCommand::SetDefaultDevice(device));
    }

    /// Stop routing and wait until the task has restored the platform.
    pub async fn shutdown(&self) {
        let (tx, rx) = oneshot::channel();
        self.send(AudioCommand::Shutdown(tx));
        let _ = rx.await;
    }

    /// Current routing, or `None` once the task is gone.
    pub async fn routing(&self) -> Option<AudioRouting> {
        let (tx, rx) = oneshot::channel();
        self.send(AudioCommand::Routing(tx));
        rx.await.ok()
    }
}

async fn run(mut manager: AudioDeviceManager, mut commands: mpsc::UnboundedReceiver<AudioCommand>) {
    loop {
        let deadline = manager.bluetooth().sco_deadline();
        let timeout = async {
            match deadline {
                Some(deadline) => sleep_until(deadline).await,
                None => std::future::pending().await,
            }
        };
        tokio::select! {
            command = commands.recv() => match command {
                Some(command) => {
                    if handle(&mut manager, command).is_break() {
                        break;
                    }
                }
                None => {
                    stop_if_running(&mut manager);
                    break;
                }
            },
            _ = timeout => manager.on_sco_timeout(),
        }
    }
    tracing::debug!("audio task ended");
}

fn stop_if_running(manager: &mut AudioDeviceManager) {
    if manager.state() == AudioManagerState::Running {
        manager.stop();
    }
}

fn handle(manager: &mut AudioDeviceManager, command: AudioCommand) -> ControlFlow<()> {
    let result = match command {
        AudioCommand::Start => {
            manager.start();
            Ok(())
        }
        AudioCommand::Stop => {
            manager.stop();
            Ok(())
        }
        AudioCommand::SetDefaultDevice(device) => manager.set_default_audio_device(device),
        AudioCommand::SelectDevice(device) => manager.select_audio_device(device),
        AudioCommand::SetSpeakerphoneMode(mode) => {
            manager.set_speakerphone_mode(mode);
            Ok(())
        }
        AudioCommand::WiredHeadset {
            plugged,
            has_microphone,
        } => {
            manager.on_wired_headset_changed(plugged, has_microphone);
            Ok(())
        }
        AudioCommand::Proximity { near } => {
            manager.on_proximity_changed(near);
            Ok(())
        }
        AudioCommand::BluetoothServiceConnected(proxy) => {
            manager.on_bluetooth_service_connected(proxy);
            Ok(())
        }
        AudioCommand::BluetoothServiceDisconnected => {
            manager.on_bluetooth_service_disconnected();
            Ok(())
        }
        AudioCommand::HeadsetConnection { connected } => {
            manager.on_headset_connection_changed(connected);
            Ok(())
        }
        AudioCommand::HeadsetAudio {
            connected,
            initial_sticky,
        } => {
            manager.on_headset_audio_changed(connected, initial_sticky);
            Ok(())
        }
        AudioCommand::Routing(reply) => {
            let _ = reply.send(manager.routing());
            Ok(())
        }
        AudioCommand::Shutdown(done) => {
            stop_if_running(manager);
            let _ = done.send(());
            return ControlFlow::Break(());
        }
    };
    if let Err(e) = result {
        tracing::error!("{e}");
    }
    ControlFlow::Continue(())
}
