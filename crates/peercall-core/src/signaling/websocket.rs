//! WebSocket relay channel used by the room flow.
//!
//! The channel is owned by the room worker task. Frames read from the
//! socket are forwarded by a background reader task as [`ChannelEvent`]s;
//! the owner feeds close/error events back through [`WebSocketChannel::handle_closed`]
//! and [`WebSocketChannel::handle_error`] so state transitions stay on one task.

use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::ORIGIN;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::errors::CallError;
use crate::messages::{ChannelCommand, SignalingMessage};

use super::room_server::RoomServer;

const CLOSE_TIMEOUT: Duration = Duration::from_millis(1000);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebSocketState {
    New,
    Connected,
    Registered,
    Closed,
    Error,
}

/// Raw events produced by the socket reader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    Message(String),
    Closed,
    Error(String),
}

pub struct WebSocketChannel {
    state: WebSocketState,
    server: RoomServer,
    sink: Option<WsSink>,
    reader: Option<JoinHandle<()>>,
    events: mpsc::UnboundedSender<ChannelEvent>,
    post_url: Option<String>,
    room_id: Option<String>,
    client_id: Option<String>,
    // Outgoing messages held until registration completes.
    queue: Vec<String>,
}

impl WebSocketChannel {
    pub fn new(server: RoomServer) -> (Self, mpsc::UnboundedReceiver<ChannelEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let channel = Self {
            state: WebSocketState::New,
            server,
            sink: None,
            reader: None,
            events,
            post_url: None,
            room_id: None,
            client_id: None,
            queue: Vec::new(),
        };
        (channel, rx)
    }

    pub fn state(&self) -> WebSocketState {
        self.state
    }

    /// Whether frames read from the socket should reach the signaling client.
    pub fn accepts_messages(&self) -> bool {
        matches!(
            self.state,
            WebSocketState::Connected | WebSocketState::Registered
        )
    }

    pub async fn connect(&mut self, wss_url: &str, post_url: &str) -> Result<(), CallError> {
        if self.state != WebSocketState::New {
            tracing::error!("WebSocket is already connected");
            return Ok(());
        }
        self.post_url = Some(post_url.to_string());
        tracing::info!("connecting WebSocket to: {wss_url}, post url: {post_url}");

        let mut request = wss_url
            .into_client_request()
            .map_err(|e| self.fail(format!("WebSocket connection error: {e}")))?;
        let origin = HeaderValue::from_str(post_url)
            .map_err(|e| self.fail(format!("WebSocket connection error: {e}")))?;
        request.headers_mut().insert(ORIGIN, origin);

        let (ws, _response) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(|e| self.fail(format!("WebSocket connection error: {e}")))?;

        let (sink, stream) = ws.split();
        self.sink = Some(sink);
        self.reader = Some(tokio::spawn(read_loop(stream, self.events.clone())));
        self.state = WebSocketState::Connected;
        tracing::info!("WebSocket connection opened to: {wss_url}");
        Ok(())
    }

    pub async fn register(&mut self, room_id: &str, client_id: &str) -> Result<(), CallError> {
        self.room_id = Some(room_id.to_string());
        self.client_id = Some(client_id.to_string());
        if self.state != WebSocketState::Connected {
            tracing::warn!("WebSocket register() in state {:?}", self.state);
            return Ok(());
        }
        tracing::info!("registering WebSocket for room {room_id}, client {client_id}");

        let register = ChannelCommand::Register {
            roomid: room_id,
            clientid: client_id,
        };
        self.write(register.to_json()).await?;
        self.state = WebSocketState::Registered;

        for message in std::mem::take(&mut self.queue) {
            self.send(&message).await?;
        }
        Ok(())
    }

    pub async fn send(&mut self, message: &str) -> Result<(), CallError> {
        match self.state {
            WebSocketState::New | WebSocketState::Connected => {
                tracing::debug!("WS queue: {message}");
                self.queue.push(message.to_string());
                Ok(())
            }
            WebSocketState::Closed | WebSocketState::Error => {
                tracing::error!("WebSocket send() in error or closed state: {message}");
                Ok(())
            }
            WebSocketState::Registered => {
                let envelope = ChannelCommand::Send { msg: message }.to_json();
                tracing::debug!("C->WSS: {envelope}");
                self.write(envelope).await
            }
        }
    }

    pub async fn disconnect(&mut self, wait_for_complete: bool) {
        tracing::info!("disconnecting WebSocket, state: {:?}", self.state);
        if self.state == WebSocketState::Registered {
            let bye = SignalingMessage::Bye.to_json();
            if let Err(e) = self.send(&bye).await {
                tracing::warn!("failed to send bye: {e}");
            }
            self.state = WebSocketState::Connected;
            if let Some(url) = self.resource_url() {
                if let Err(e) = self.server.delete(&url).await {
                    tracing::warn!("WS DELETE failed: {e}");
                }
            }
        }

        if matches!(
            self.state,
            WebSocketState::Connected | WebSocketState::Error
        ) {
            self.state = WebSocketState::Closed;
            if let Some(mut sink) = self.sink.take() {
                let _ = sink.close().await;
            }
            if let Some(reader) = self.reader.take() {
                if wait_for_complete {
                    let abort = reader.abort_handle();
                    if tokio::time::timeout(CLOSE_TIMEOUT, reader).await.is_err() {
                        tracing::warn!("timed out waiting for WebSocket close");
                        abort.abort();
                    }
                } else {
                    reader.abort();
                }
            }
        }
        tracing::info!("disconnecting WebSocket done");
    }

    /// Record a remote close. Returns `true` if it should be reported.
    pub fn handle_closed(&mut self) -> bool {
        if self.state == WebSocketState::Closed {
            return false;
        }
        self.state = WebSocketState::Closed;
        self.sink = None;
        true
    }

    /// Record a socket failure. Returns `true` the first time only.
    pub fn handle_error(&mut self, description: &str) -> bool {
        if self.state == WebSocketState::Error {
            return false;
        }
        tracing::error!("{description}");
        self.state = WebSocketState::Error;
        true
    }

    fn fail(&mut self, description: String) -> CallError {
        self.state = WebSocketState::Error;
        CallError::Connection(description)
    }

    fn resource_url(&self) -> Option<String> {
        let post_url = self.post_url.as_deref()?.trim_end_matches('/');
        let room_id = self.room_id.as_deref()?;
        let client_id = self.client_id.as_deref()?;
        Some(format!(
            "{post_url}/{}/{}",
            urlencoding::encode(room_id),
            urlencoding::encode(client_id)
        ))
    }

    async fn write(&mut self, text: String) -> Result<(), CallError> {
        let sink = self
            .sink
            .as_mut()
            .ok_or_else(|| CallError::Connection("WebSocket is closed".into()))?;
        if let Err(e) = sink.send(Message::text(text)).await {
            return Err(self.fail(format!("WebSocket send error: {e}")));
        }
        Ok(())
    }
}

async fn read_loop(mut stream: SplitStream<WsStream>, events: mpsc::UnboundedSender<ChannelEvent>) {
    while let Some(frame) = stream.next().await {
        match frame {
            Ok(Message::Text(text)) => {
                tracing::debug!("WSS->C: {}", text.as_str());
                let _ = events.send(ChannelEvent::Message(text.as_str().to_string()));
            }
            Ok(Message::Close(frame)) => {
                tracing::info!("WebSocket closed by server: {frame:?}");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                let _ = events.send(ChannelEvent::Error(e.to_string()));
                return;
            }
        }
    }
    let _ = events.send(ChannelEvent::Closed);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signaling::test_support::{FakeRoomServer, RoomConfig};
    use tokio::net::TcpListener;

    /// Relay URL of a fresh room server, with its seen/push ends.
    async fn relay_server() -> (
        String,
        mpsc::UnboundedReceiver<String>,
        mpsc::UnboundedSender<String>,
    ) {
        let server = FakeRoomServer::with_config(RoomConfig::default()).await;
        let url = format!("{}/ws", server.url.replacen("http", "ws", 1));
        (url, server.relay_seen, server.relay_push)
    }

    #[tokio::test]
    async fn queues_until_registered_then_flushes() {
        let (url, mut seen, _push) = relay_server().await;
        let (mut channel, _events) = WebSocketChannel::new(RoomServer::new());

        channel.send(r#"{"type":"answer","sdp":"v=0"}"#).await.unwrap();
        assert_eq!(channel.state(), WebSocketState::New);

        channel.connect(&url, "http://127.0.0.1:1").await.unwrap();
        assert_eq!(channel.state(), WebSocketState::Connected);

        channel.register("room1", "42").await.unwrap();
        assert_eq!(channel.state(), WebSocketState::Registered);

        assert_eq!(
            seen.recv().await.unwrap(),
            r#"{"cmd":"register","roomid":"room1","clientid":"42"}"#
        );
        let relayed: serde_json::Value = serde_json::from_str(&seen.recv().await.unwrap()).unwrap();
        assert_eq!(relayed["cmd"], "send");
        assert_eq!(relayed["msg"], r#"{"type":"answer","sdp":"v=0"}"#);
    }

    #[tokio::test]
    async fn forwards_incoming_frames() {
        let (url, _seen, push) = relay_server().await;
        let (mut channel, mut events) = WebSocketChannel::new(RoomServer::new());
        channel.connect(&url, "http://127.0.0.1:1").await.unwrap();

        push.send(r#"{"msg":"{\"type\":\"bye\"}","error":""}"#.to_string()).unwrap();
        assert_eq!(
            events.recv().await.unwrap(),
            ChannelEvent::Message(r#"{"msg":"{\"type\":\"bye\"}","error":""}"#.to_string())
        );
        assert!(channel.accepts_messages());
    }

    #[tokio::test]
    async fn remote_close_is_reported_once() {
        let (url, _seen, push) = relay_server().await;
        let (mut channel, mut events) = WebSocketChannel::new(RoomServer::new());
        channel.connect(&url, "http://127.0.0.1:1").await.unwrap();

        drop(push);
        assert_eq!(events.recv().await.unwrap(), ChannelEvent::Closed);
        assert!(channel.handle_closed());
        assert!(!channel.handle_closed());
        assert_eq!(channel.state(), WebSocketState::Closed);
    }

    #[tokio::test]
    async fn connect_failure_enters_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let (mut channel, _events) = WebSocketChannel::new(RoomServer::new());
        let err = channel
            .connect(&format!("ws://{addr}"), "http://127.0.0.1:1")
            .await
            .unwrap_err();
        assert!(err.message().starts_with("WebSocket connection error"));
        assert_eq!(channel.state(), WebSocketState::Error);
        assert!(!channel.handle_error("again"));
    }

    #[tokio::test]
    async fn send_after_close_is_dropped() {
        let (url, _seen, _push) = relay_server().await;
        let (mut channel, _events) = WebSocketChannel::new(RoomServer::new());
        channel.connect(&url, "http://127.0.0.1:1").await.unwrap();
        channel.disconnect(true).await;
        assert_eq!(channel.state(), WebSocketState::Closed);
        assert!(channel.send("{}").await.is_ok());
        assert!(!channel.handle_closed());
    }
}
