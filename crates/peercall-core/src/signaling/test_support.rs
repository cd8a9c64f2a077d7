//! Loopback room server used by the signaling tests: an axum app answering
//! join/message/leave/TURN requests and hosting the WebSocket relay.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::Router;
use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::http::{HeaderMap, Method, Uri, header};
use axum::response::{IntoResponse, Response};
use axum::routing::any;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use crate::events::{CallEvent, ChannelListener, EventEmitter};

pub const TURN_URL: &str = "turn:turn.example.com:3478";

#[derive(Debug, Clone)]
pub struct Request {
    pub method: String,
    pub path: String,
    pub origin: Option<String>,
    pub body: String,
}

/// What the fake room answers.
#[derive(Debug, Clone)]
pub struct RoomConfig {
    pub join_result: String,
    pub initiator: bool,
    pub messages: Vec<String>,
    /// Advertise an `ice_server_url` serving one TURN server.
    pub turn: bool,
    /// `result` of every `/message/` reply.
    pub message_result: String,
    /// Replaces the relay URL handed out on join.
    pub wss_url: Option<String>,
}

impl Default for RoomConfig {
    fn default() -> Self {
        Self {
            join_result: "SUCCESS".to_string(),
            initiator: true,
            messages: Vec::new(),
            turn: false,
            message_result: "SUCCESS".to_string(),
            wss_url: None,
        }
    }
}

type Relay = (mpsc::UnboundedSender<String>, mpsc::UnboundedReceiver<String>);

#[derive(Clone)]
struct AppState {
    join_body: String,
    message_result: String,
    requests: Arc<Mutex<Vec<Request>>>,
    // Only the first relay connection is served.
    relay: Arc<Mutex<Option<Relay>>>,
}

pub struct FakeRoomServer {
    pub url: String,
    pub requests: Arc<Mutex<Vec<Request>>>,
    /// Text frames the client wrote to the relay.
    pub relay_seen: mpsc::UnboundedReceiver<String>,
    /// Frames to push to the client over the relay.
    pub relay_push: mpsc::UnboundedSender<String>,
}

impl FakeRoomServer {
    /// `join_result` is the `result` field; `initiator` and `messages` feed `params`.
    pub async fn start(join_result: &str, initiator: bool, messages: Vec<String>) -> Self {
        Self::with_config(RoomConfig {
            join_result: join_result.to_string(),
            initiator,
            messages,
            ..RoomConfig::default()
        })
        .await
    }

    pub async fn with_config(config: RoomConfig) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let url = format!("http://{addr}");
        let wss_url = config
            .wss_url
            .clone()
            .unwrap_or_else(|| format!("ws://{addr}/ws"));
        let ice_server_url = if config.turn {
            format!("{url}/turn")
        } else {
            String::new()
        };
        let is_initiator = if config.initiator { "true" } else { "false" };

        let join_body = serde_json::json!({
            "result": config.join_result,
            "params": {
                "room_id": "room1",
                "client_id": "client7",
                "wss_url": wss_url,
                "wss_post_url": url.clone(),
                "is_initiator": is_initiator,
                "messages": config.messages,
                "pc_config": r#"{"iceServers":[{"urls":"stun:stun.example.com:19302"}]}"#,
                "ice_server_url": ice_server_url
            }
        })
        .to_string();

        let requests = Arc::new(Mutex::new(Vec::new()));
        let (seen_tx, relay_seen) = mpsc::unbounded_channel();
        let (relay_push, push_rx) = mpsc::unbounded_channel();
        let state = AppState {
            join_body,
            message_result: config.message_result,
            requests: requests.clone(),
            relay: Arc::new(Mutex::new(Some((seen_tx, push_rx)))),
        };

        let app = Router::new()
            .route("/ws", any(relay_upgrade))
            .fallback(room_request)
            .with_state(state);
        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                tracing::error!("fake room server error: {e}");
            }
        });

        Self {
            url,
            requests,
            relay_seen,
            relay_push,
        }
    }

    pub fn requests(&self) -> Vec<Request> {
        self.requests.lock().unwrap().clone()
    }

    pub async fn next_relay_frame(&mut self) -> serde_json::Value {
        let text = tokio::time::timeout(Duration::from_secs(5), self.relay_seen.recv())
            .await
            .expect("timed out waiting for relay frame")
            .expect("relay closed");
        serde_json::from_str(&text).unwrap()
    }

    /// Wait until a request matching `method` and a path prefix was recorded.
    pub async fn wait_for_request(&self, method: &str, prefix: &str) -> Request {
        for _ in 0..100 {
            if let Some(req) = self
                .requests()
                .into_iter()
                .find(|r| r.method == method && r.path.starts_with(prefix))
            {
                return req;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        panic!("no {method} {prefix} request recorded");
    }
}

async fn room_request(
    State(state): State<AppState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: String,
) -> Response {
    let path = uri.path().to_string();
    let reply = if path.starts_with("/join/") {
        state.join_body.clone()
    } else if path.starts_with("/message/") {
        serde_json::json!({ "result": state.message_result }).to_string()
    } else if path.starts_with("/turn") {
        serde_json::json!({
            "iceServers": [{ "urls": [TURN_URL], "username": "user", "credential": "secret" }]
        })
        .to_string()
    } else {
        String::new()
    };

    let origin = headers
        .get(header::ORIGIN)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    state.requests.lock().unwrap().push(Request {
        method: method.to_string(),
        path,
        origin,
        body,
    });

    ([(header::CONTENT_TYPE, "application/json")], reply).into_response()
}

async fn relay_upgrade(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    let relay = state.relay.lock().unwrap().take();
    ws.on_upgrade(move |socket| async move {
        if let Some(relay) = relay {
            run_relay(socket, relay).await;
        }
    })
}

async fn run_relay(socket: WebSocket, (seen_tx, mut push_rx): Relay) {
    let (mut sink, mut source) = socket.split();
    loop {
        tokio::select! {
            frame = source.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    let _ = seen_tx.send(text.as_str().to_string());
                }
                Some(Ok(_)) => {}
                _ => break,
            },
            out = push_rx.recv() => match out {
                Some(text) => {
                    let _ = sink.send(Message::Text(text.into())).await;
                }
                None => {
                    let _ = sink.close().await;
                    break;
                }
            },
        }
    }
}

pub fn listening_emitter() -> (EventEmitter, mpsc::UnboundedReceiver<CallEvent>) {
    let emitter = EventEmitter::new();
    let (listener, rx) = ChannelListener::new();
    emitter.add_listener(listener);
    (emitter, rx)
}

/// Next event that is not a bare state change.
pub async fn next_signal(rx: &mut mpsc::UnboundedReceiver<CallEvent>) -> CallEvent {
    loop {
        let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for event")
            .expect("emitter dropped");
        if !matches!(event, CallEvent::ConnectionStateChanged(_)) {
            return event;
        }
    }
}

/// Asserts no further signaling event arrives within a short window.
pub async fn assert_quiet(rx: &mut mpsc::UnboundedReceiver<CallEvent>) {
    let deadline = tokio::time::Instant::now() + Duration::from_millis(300);
    loop {
        match tokio::time::timeout_at(deadline, rx.recv()).await {
            Err(_) | Ok(None) => return,
            Ok(Some(CallEvent::ConnectionStateChanged(_))) => continue,
            Ok(Some(other)) => panic!("unexpected event: {other:?}"),
        }
    }
}
