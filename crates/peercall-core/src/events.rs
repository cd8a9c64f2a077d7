use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::audio::AudioDevice;
use crate::messages::{IceCandidate, SessionDescription};
use crate::params::SignalingParameters;

/// Events emitted by the core to native UI listeners.
#[derive(Debug, Clone)]
pub enum CallEvent {
    /// The room (or TCP peer) was joined and session parameters are known.
    ConnectedToRoom(SignalingParameters),
    RemoteDescription(SessionDescription),
    RemoteIceCandidate(IceCandidate),
    RemoteIceCandidatesRemoved(Vec<IceCandidate>),
    /// The remote side left or the signaling channel was closed.
    ChannelClose,
    /// Fired at most once per session; the UI tears the call down.
    ChannelError(String),
    ConnectionStateChanged(ConnectionState),
    AudioDeviceChanged {
        selected: AudioDevice,
        available: Vec<AudioDevice>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    New,
    Connected,
    Closed,
    Error,
}

/// Trait for receiving events from the core.
/// Implementations must be Send + Sync (called from tokio tasks).
pub trait CallEventListener: Send + Sync {
    fn on_event(&self, event: CallEvent);
}

/// Internal event emitter that dispatches to registered listeners.
#[derive(Clone, Default)]
pub struct EventEmitter {
    listeners: Arc<std::sync::RwLock<Vec<Arc<dyn CallEventListener>>>>,
}

impl EventEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_listener(&self, listener: Arc<dyn CallEventListener>) {
        match self.listeners.write() {
            Ok(mut listeners) => listeners.push(listener),
            Err(poisoned) => poisoned.into_inner().push(listener),
        }
    }

    pub fn emit(&self, event: CallEvent) {
        let listeners = match self.listeners.read() {
            Ok(listeners) => listeners,
            Err(poisoned) => poisoned.into_inner(),
        };
        for listener in listeners.iter() {
            listener.on_event(event.clone());
        }
    }

    /// Emitter for call session `id`: its events reach this emitter only
    /// while `current` still holds `id`.
    pub fn scoped(&self, id: u64, current: Arc<AtomicU64>) -> EventEmitter {
        let scoped = EventEmitter::new();
        scoped.add_listener(Arc::new(SessionListener {
            id,
            current,
            target: self.clone(),
        }));
        scoped
    }
}

struct SessionListener {
    id: u64,
    current: Arc<AtomicU64>,
    target: EventEmitter,
}

impl CallEventListener for SessionListener {
    fn on_event(&self, event: CallEvent) {
        if self.current.load(Ordering::SeqCst) == self.id {
            self.target.emit(event);
        } else {
            tracing::debug!("dropping event of replaced session {}: {event:?}", self.id);
        }
    }
}

/// Listener forwarding every event into a tokio channel.
///
/// Lets async code (and tests) await signaling callbacks in order.
pub struct ChannelListener {
    tx: tokio::sync::mpsc::UnboundedSender<CallEvent>,
}

impl ChannelListener {
    pub fn new() -> (Arc<Self>, tokio::sync::mpsc::UnboundedReceiver<CallEvent>) {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        (Arc::new(Self { tx }), rx)
    }
}

impl CallEventListener for ChannelListener {
    fn on_event(&self, event: CallEvent) {
        let _ = self.tx.send(event);
    }
}
