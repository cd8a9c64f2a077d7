//! Signaling through a room server: HTTP for join/offer/leave, a WebSocket
//! relay for everything the non-initiator sends.
//!
//! All work happens on one worker task; [`RoomClient`] only posts commands.

use tokio::sync::{mpsc, watch};

use crate::events::{CallEvent, ConnectionState, EventEmitter};
use crate::messages::{
    ChannelFrame, IceCandidate, MessageError, SdpType, SessionDescription, SignalingMessage,
};
use crate::params::{RoomConnectionParameters, SignalingParameters};

use super::room_server::RoomServer;
use super::websocket::{ChannelEvent, WebSocketChannel, WebSocketState};
use super::{SignalingClient, SignalingCommand, next_event, set_state};

pub struct RoomClient {
    commands: mpsc::UnboundedSender<SignalingCommand>,
    state: watch::Receiver<ConnectionState>,
}

impl RoomClient {
    /// Spawn the worker. Must be called within a tokio runtime.
    pub fn new(emitter: EventEmitter) -> Self {
        Self::with_server(RoomServer::new(), emitter)
    }

    pub fn with_server(server: RoomServer, emitter: EventEmitter) -> Self {
        let (commands, rx) = mpsc::unbounded_channel();
        let (state_tx, state) = watch::channel(ConnectionState::New);
        let worker = RoomWorker {
            server,
            emitter,
            state_tx,
            params: None,
            initiator: false,
            message_url: None,
            leave_url: None,
            channel: None,
            channel_events: None,
        };
        tokio::spawn(worker.run(rx));
        Self { commands, state }
    }

    fn post(&self, command: SignalingCommand) {
        if self.commands.send(command).is_err() {
            tracing::warn!("room signaling worker has stopped");
        }
    }
}

impl SignalingClient for RoomClient {
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

struct RoomWorker {
    server: RoomServer,
    emitter: EventEmitter,
    state_tx: watch::Sender<ConnectionState>,
    params: Option<RoomConnectionParameters>,
    initiator: bool,
    message_url: Option<String>,
    leave_url: Option<String>,
    channel: Option<WebSocketChannel>,
    channel_events: Option<mpsc::UnboundedReceiver<ChannelEvent>>,
}

impl RoomWorker {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<SignalingCommand>) {
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => break,
                },
                Some(event) = next_event(&mut self.channel_events) => {
                    self.handle_channel_event(event);
                }
            }
        }

        if self.state() == ConnectionState::Connected {
            tracing::info!("room client dropped while connected, leaving room");
            self.disconnect().await;
        }
        tracing::debug!("room signaling worker ended");
    }

    fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    fn loopback(&self) -> bool {
        self.params.as_ref().is_some_and(|p| p.loopback)
    }

    async fn handle_command(&mut self, command: SignalingCommand) {
        match command {
            SignalingCommand::Connect(params) => self.connect(params).await,
            SignalingCommand::SendOffer(sdp) => self.send_offer(sdp).await,
            SignalingCommand::SendAnswer(sdp) => self.send_answer(sdp).await,
            SignalingCommand::SendCandidate(c) => self.send_candidate(c).await,
            SignalingCommand::RemoveCandidates(cs) => self.remove_candidates(cs).await,
            SignalingCommand::Disconnect => self.disconnect().await,
        }
    }

    async fn connect(&mut self, params: RoomConnectionParameters) {
        tracing::info!("connecting to room {} at {}", params.room_id, params.room_url);
        set_state(&self.state_tx, &self.emitter, ConnectionState::New);
        self.params = Some(params.clone());

        match self.server.join(&params).await {
            Ok(signaling) => self.signaling_parameters_ready(params, signaling).await,
            Err(e) => self.report_error(e.message()),
        }
    }

    async fn signaling_parameters_ready(
        &mut self,
        params: RoomConnectionParameters,
        signaling: SignalingParameters,
    ) {
        tracing::info!("room connection completed");
        if params.loopback && (!signaling.initiator || signaling.offer_sdp.is_some()) {
            self.report_error("Loopback room is busy.");
            return;
        }
        if !params.loopback && !signaling.initiator && signaling.offer_sdp.is_none() {
            tracing::warn!("no offer SDP in room response");
        }

        self.initiator = params.loopback || signaling.initiator;
        let client_id = signaling.client_id.clone().unwrap_or_default();
        self.message_url = Some(params.message_url(&client_id));
        self.leave_url = Some(params.leave_url(&client_id));
        tracing::debug!("message URL: {:?}", self.message_url);

        set_state(&self.state_tx, &self.emitter, ConnectionState::Connected);
        self.emitter.emit(CallEvent::ConnectedToRoom(signaling.clone()));

        let (mut channel, events) = WebSocketChannel::new(self.server.clone());
        let wss_url = signaling.wss_url.unwrap_or_default();
        let wss_post_url = signaling.wss_post_url.unwrap_or_default();
        let result = match channel.connect(&wss_url, &wss_post_url).await {
            Ok(()) => channel.register(&params.room_id, &client_id).await,
            Err(e) => Err(e),
        };
        self.channel = Some(channel);
        self.channel_events = Some(events);

        if let Err(e) = result {
            self.report_error(format!("WebSocket error: {}", e.message()));
        }
    }

    async fn send_offer(&mut self, sdp: SessionDescription) {
        if self.state() != ConnectionState::Connected {
            self.report_error("Sending offer SDP in non connected state.");
            return;
        }
        let message = SignalingMessage::Description(sdp.clone()).to_json();
        self.send_post_message(message).await;

        if self.loopback() {
            // Route the offer back as the remote answer.
            let answer = SessionDescription::answer(sdp.description);
            self.emitter.emit(CallEvent::RemoteDescription(answer));
        }
    }

    async fn send_answer(&mut self, sdp: SessionDescription) {
        if self.loopback() {
            tracing::error!("sending answer in loopback mode");
            return;
        }
        let message = SignalingMessage::Description(sdp).to_json();
        self.send_relay_message(message).await;
    }

    async fn send_candidate(&mut self, candidate: IceCandidate) {
        let message = SignalingMessage::Candidate(candidate.clone()).to_json();
        if self.initiator {
            // The initiator posts to the room server, the other peer fetches it on join.
            if self.state() != ConnectionState::Connected {
                self.report_error("Sending ICE candidate in non connected state.");
                return;
            }
            self.send_post_message(message).await;
            if self.loopback() {
                self.emitter.emit(CallEvent::RemoteIceCandidate(candidate));
            }
        } else {
            self.send_relay_message(message).await;
        }
    }

    async fn remove_candidates(&mut self, candidates: Vec<IceCandidate>) {
        let message = SignalingMessage::RemoveCandidates(candidates.clone()).to_json();
        if self.initiator {
            if self.state() != ConnectionState::Connected {
                self.report_error("Sending ICE candidate removals in non connected state.");
                return;
            }
            self.send_post_message(message).await;
            if self.loopback() {
                self.emitter
                    .emit(CallEvent::RemoteIceCandidatesRemoved(candidates));
            }
        } else {
            self.send_relay_message(message).await;
        }
    }

    async fn disconnect(&mut self) {
        tracing::info!("disconnecting from room");
        if self.state() == ConnectionState::Connected {
            if let Some(url) = self.leave_url.clone() {
                self.server.leave(&url).await;
            }
        }
        set_state(&self.state_tx, &self.emitter, ConnectionState::Closed);
        if let Some(mut channel) = self.channel.take() {
            channel.disconnect(true).await;
        }
        self.channel_events = None;
    }

    async fn send_post_message(&mut self, message: String) {
        let Some(url) = self.message_url.clone() else {
            self.report_error("Room message URL is not known.");
            return;
        };
        if let Err(e) = self.server.post_message(&url, &message).await {
            self.report_error(e.message());
        }
    }

    async fn send_relay_message(&mut self, message: String) {
        let result = match self.channel.as_mut() {
            Some(channel) => channel.send(&message).await,
            None => {
                tracing::error!("WebSocket send() before room connection: {message}");
                Ok(())
            }
        };
        if let Err(e) = result {
            self.report_error(format!("WebSocket error: {}", e.message()));
        }
    }

    fn handle_channel_event(&mut self, event: ChannelEvent) {
        let Some(channel) = self.channel.as_mut() else {
            return;
        };
        match event {
            ChannelEvent::Message(text) => {
                if !channel.accepts_messages() {
                    return;
                }
                if channel.state() != WebSocketState::Registered {
                    tracing::error!("got WebSocket message in non registered state");
                    return;
                }
                self.on_websocket_message(&text);
            }
            ChannelEvent::Closed => {
                if channel.handle_closed() {
                    tracing::info!("WebSocket closed by remote");
                    self.emitter.emit(CallEvent::ChannelClose);
                }
            }
            ChannelEvent::Error(description) => {
                if channel.handle_error(&description) {
                    self.report_error(format!("WebSocket error: {description}"));
                }
            }
        }
    }

    fn on_websocket_message(&mut self, text: &str) {
        let frame: ChannelFrame = match serde_json::from_str(text) {
            Ok(frame) => frame,
            Err(e) => {
                self.report_error(format!("WebSocket message JSON parsing error: {e}"));
                return;
            }
        };

        if frame.msg.is_empty() {
            if frame.error.is_empty() {
                self.report_error(format!("Unexpected WebSocket message: {text}"));
            } else {
                self.report_error(format!("WebSocket error message: {}", frame.error));
            }
            return;
        }

        match SignalingMessage::from_json(&frame.msg) {
            Ok(SignalingMessage::Candidate(c)) => {
                self.emitter.emit(CallEvent::RemoteIceCandidate(c));
            }
            Ok(SignalingMessage::RemoveCandidates(cs)) => {
                self.emitter.emit(CallEvent::RemoteIceCandidatesRemoved(cs));
            }
            Ok(SignalingMessage::Description(sdp)) => match sdp.sdp_type {
                SdpType::Answer if self.initiator => {
                    self.emitter.emit(CallEvent::RemoteDescription(sdp));
                }
                SdpType::Answer => {
                    self.report_error(format!("Received answer for call initiator: {text}"));
                }
                SdpType::Offer if !self.initiator => {
                    self.emitter.emit(CallEvent::RemoteDescription(sdp));
                }
                SdpType::Offer => {
                    self.report_error(format!("Received offer for call receiver: {text}"));
                }
            },
            Ok(SignalingMessage::Bye) => {
                self.emitter.emit(CallEvent::ChannelClose);
            }
            Err(MessageError::UnexpectedType(_)) => {
                self.report_error(format!("Unexpected WebSocket message: {text}"));
            }
            Err(MessageError::Json(e)) => {
                self.report_error(format!("WebSocket message JSON parsing error: {e}"));
            }
        }
    }

    fn report_error(&mut self, description: impl Into<String>) {
        let description = description.into();
        tracing::error!("room signaling error: {description}");
        if self.state() != ConnectionState::Error {
            set_state(&self.state_tx, &self.emitter, ConnectionState::Error);
            self.emitter.emit(CallEvent::ChannelError(description));
        }
    }
}
