//! Signaling clients: exchange SDP and ICE candidates with the remote peer,
//! either through a room server or over a direct TCP link.

pub mod direct_client;
pub mod room_client;
pub mod room_server;
pub mod tcp_channel;
pub mod websocket;

#[cfg(test)]
mod test_support;

use tokio::sync::{mpsc, watch};

use crate::events::{CallEvent, ConnectionState, EventEmitter};
use crate::messages::{IceCandidate, SessionDescription};
use crate::params::RoomConnectionParameters;

pub use direct_client::DirectClient;
pub use room_client::RoomClient;

/// Operations the call screen drives. Every method returns immediately;
/// results arrive as [`CallEvent`]s on the emitter the client was built with.
pub trait SignalingClient: Send + Sync {
    fn connect_to_room(&self, params: RoomConnectionParameters);
    fn send_offer_sdp(&self, sdp: SessionDescription);
    fn send_answer_sdp(&self, sdp: SessionDescription);
    fn send_local_ice_candidate(&self, candidate: IceCandidate);
    fn send_local_ice_candidate_removals(&self, candidates: Vec<IceCandidate>);
    fn disconnect_from_room(&self);
    fn state(&self) -> ConnectionState;
}

/// Pick the client for a connection: an IP endpoint talks TCP directly,
/// anything else (including loopback) goes through the room server.
///
/// Must be called within a tokio runtime.
pub fn create_client(
    params: &RoomConnectionParameters,
    emitter: EventEmitter,
) -> Box<dyn SignalingClient> {
    if params.is_direct() {
        tracing::info!("using direct TCP signaling for {}", params.room_id);
        Box::new(DirectClient::new(emitter))
    } else {
        tracing::info!("using room server signaling at {}", params.room_url);
        Box::new(RoomClient::new(emitter))
    }
}

/// Commands posted from a client handle to its worker task.
#[derive(Debug)]
pub(crate) enum SignalingCommand {
    Connect(RoomConnectionParameters),
    SendOffer(SessionDescription),
    SendAnswer(SessionDescription),
    SendCandidate(IceCandidate),
    RemoveCandidates(Vec<IceCandidate>),
    Disconnect,
}

/// Receive from an optional channel; pends forever when there is none so it
/// can sit in a `select!` next to the command receiver.
pub(crate) async fn next_event<T>(rx: &mut Option<mpsc::UnboundedReceiver<T>>) -> Option<T> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

/// Publish a state change, emitting only when the state actually moves.
pub(crate) fn set_state(
    state: &watch::Sender<ConnectionState>,
    emitter: &EventEmitter,
    next: ConnectionState,
) {
    let changed = state.send_if_modified(|current| {
        if *current == next {
            false
        } else {
            *current = next;
            true
        }
    });
    if changed {
        tracing::debug!("signaling state -> {next:?}");
        emitter.emit(CallEvent::ConnectionStateChanged(next));
    }
}
