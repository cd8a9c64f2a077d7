//! Direct TCP signaling: no room server, the room id is the peer's address.
//!
//! The side that listens (unspecified address) is always the call initiator.
//! The connecting side reports [`CallEvent::ConnectedToRoom`] once the offer
//! arrives, carrying that offer in the parameters.

use tokio::sync::{mpsc, watch};

use crate::events::{CallEvent, ConnectionState, EventEmitter};
use crate::messages::{IceCandidate, MessageError, SdpType, SessionDescription, SignalingMessage};
use crate::params::{DirectEndpoint, RoomConnectionParameters, SignalingParameters};

use super::tcp_channel::{TcpChannel, TcpEvent};
use super::{SignalingClient, SignalingCommand, next_event, set_state};

pub struct DirectClient {
    commands: mpsc::UnboundedSender<SignalingCommand>,
    state: watch::Receiver<ConnectionState>,
}

impl DirectClient {
    /// Spawn the worker. Must be called within a tokio runtime.
    pub fn new(emitter: EventEmitter) -> Self {
        let (commands, rx) = mpsc::unbounded_channel();
        let (state_tx, state) = watch::channel(ConnectionState::New);
        let worker = DirectWorker {
            emitter,
            state_tx,
            channel: None,
            channel_events: None,
        };
        tokio::spawn(worker.run(rx));
        Self { commands, state }
    }

    fn post(&self, command: SignalingCommand) {
        if self.commands.send(command).is_err() {
            tracing::warn!("direct signaling worker has stopped");
        }
    }
}

impl SignalingClient for DirectClient {
    fn connect_to_room(&self, params: RoomConnectionParameters) {
        self.post(SignalingCommand::Connect(params));
    }

    fn send_offer_sdp(&self, sdp: SessionDescription) {
        self.post(SignalingCommand::SendOffer(sdp));
    }

    fn send_answer_sdp(&self, sdp: SessionDescription) {
        self.post(SignalingCommand::SendAnswer(sdp));
    }

    fn send_local_ice_candidate(&self, candidate: IceCandidate) {
        self.post(SignalingCommand::SendCandidate(candidate));
    }

    fn send_local_ice_candidate_removals(&self, candidates: Vec<IceCandidate>) {
        self.post(SignalingCommand::RemoveCandidates(candidates));
    }

    fn disconnect_from_room(&self) {
        self.post(SignalingCommand::Disconnect);
    }

    fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }
}

struct DirectWorker {
    emitter: EventEmitter,
    state_tx: watch::Sender<ConnectionState>,
    channel: Option<TcpChannel>,
    channel_events: Option<mpsc::UnboundedReceiver<TcpEvent>>,
}

impl DirectWorker {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<SignalingCommand>) {
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => break,
                },
                Some(event) = next_event(&mut self.channel_events) => {
                    self.handle_tcp_event(event);
                }
            }
        }
        tracing::debug!("direct signaling worker ended");
    }

    fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    fn handle_command(&mut self, command: SignalingCommand) {
        match command {
            SignalingCommand::Connect(params) => self.connect(params),
            SignalingCommand::SendOffer(sdp) => {
                if self.state() != ConnectionState::Connected {
                    self.report_error("Sending offer SDP in non connected state.");
                    return;
                }
                self.send_message(SignalingMessage::Description(sdp));
            }
            SignalingCommand::SendAnswer(sdp) => {
                self.send_message(SignalingMessage::Description(sdp));
            }
            SignalingCommand::SendCandidate(candidate) => {
                if self.state() != ConnectionState::Connected {
                    self.report_error("Sending ICE candidate in non connected state.");
                    return;
                }
                self.send_message(SignalingMessage::Candidate(candidate));
            }
            SignalingCommand::RemoveCandidates(candidates) => {
                if self.state() != ConnectionState::Connected {
                    self.report_error("Sending ICE candidate removals in non connected state.");
                    return;
                }
                self.send_message(SignalingMessage::RemoveCandidates(candidates));
            }
            SignalingCommand::Disconnect => self.disconnect(),
        }
    }

    fn connect(&mut self, params: RoomConnectionParameters) {
        set_state(&self.state_tx, &self.emitter, ConnectionState::New);
        let endpoint = match DirectEndpoint::parse(&params.room_id) {
            Ok(endpoint) => endpoint,
            Err(e) => {
                tracing::debug!("{e}");
                self.report_error("roomId must match IP_PATTERN for DirectRTCClient.");
                return;
            }
        };
        tracing::info!("opening direct TCP signaling to {}:{}", endpoint.ip, endpoint.port);
        let (channel, events) = TcpChannel::open(endpoint);
        self.channel = Some(channel);
        self.channel_events = Some(events);
    }

    fn disconnect(&mut self) {
        tracing::info!("disconnecting direct signaling");
        set_state(&self.state_tx, &self.emitter, ConnectionState::Closed);
        self.channel = None;
        self.channel_events = None;
    }

    fn send_message(&mut self, message: SignalingMessage) {
        match &self.channel {
            Some(channel) => channel.send(&message.to_json()),
            None => tracing::error!("direct send without a TCP channel: {}", message.to_json()),
        }
    }

    fn handle_tcp_event(&mut self, event: TcpEvent) {
        match event {
            TcpEvent::Connected { is_server } => {
                if is_server {
                    set_state(&self.state_tx, &self.emitter, ConnectionState::Connected);
                    let params = SignalingParameters {
                        initiator: true,
                        ..SignalingParameters::default()
                    };
                    self.emitter.emit(CallEvent::ConnectedToRoom(params));
                } else {
                    tracing::info!("TCP connected, waiting for offer");
                }
            }
            TcpEvent::Message(line) => self.on_tcp_message(&line),
            TcpEvent::Error(description) => {
                self.report_error(format!("TCP connection error: {description}"));
            }
            TcpEvent::Closed => {
                self.emitter.emit(CallEvent::ChannelClose);
            }
        }
    }

    fn on_tcp_message(&mut self, line: &str) {
        match SignalingMessage::from_json(line) {
            Ok(SignalingMessage::Candidate(candidate)) => {
                self.emitter.emit(CallEvent::RemoteIceCandidate(candidate));
            }
            Ok(SignalingMessage::RemoveCandidates(candidates)) => {
                self.emitter
                    .emit(CallEvent::RemoteIceCandidatesRemoved(candidates));
            }
            Ok(SignalingMessage::Description(sdp)) if sdp.sdp_type == SdpType::Answer => {
                self.emitter.emit(CallEvent::RemoteDescription(sdp));
            }
            Ok(SignalingMessage::Description(sdp)) => {
                set_state(&self.state_tx, &self.emitter, ConnectionState::Connected);
                let params = SignalingParameters {
                    initiator: false,
                    offer_sdp: Some(sdp),
                    ..SignalingParameters::default()
                };
                self.emitter.emit(CallEvent::ConnectedToRoom(params));
            }
            Ok(SignalingMessage::Bye) | Err(MessageError::UnexpectedType(_)) => {
                self.report_error(format!("Unexpected TCP message: {line}"));
            }
            Err(MessageError::Json(e)) => {
                self.report_error(format!("TCP message JSON parsing error: {e}"));
            }
        }
    }

    fn report_error(&mut self, description: impl Into<String>) {
        let description = description.into();
        tracing::error!("direct signaling error: {description}");
        if self.state() != ConnectionState::Error {
            set_state(&self.state_tx, &self.emitter, ConnectionState::Error);
            self.emitter.emit(CallEvent::ChannelError(description));
        }
    }
}
