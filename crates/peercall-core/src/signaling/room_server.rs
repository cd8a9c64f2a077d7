//! HTTP side of the room flow: join, message posting, leave.

use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;

use crate::errors::CallError;
use crate::messages::{PostResponse, RESULT_SUCCESS, SignalingMessage};
use crate::params::{IceServer, RoomConnectionParameters, SignalingParameters};

#[derive(Debug, Deserialize)]
struct JoinResponse {
    result: String,
    #[serde(default)]
    params: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct IceServersResponse {
    #[serde(rename = "iceServers", default)]
    ice_servers: Vec<Value>,
}

const HTTP_TIMEOUT: Duration = Duration::from_secs(8);

/// Thin wrapper around a shared reqwest client talking to the room server.
#[derive(Clone)]
pub struct RoomServer {
    http: reqwest::Client,
}

impl Default for RoomServer {
    fn default() -> Self {
        Self::new()
    }
}

impl RoomServer {
    pub fn new() -> Self {
        let http = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!("falling back to default HTTP client: {e}");
                reqwest::Client::new()
            });
        Self { http }
    }

    /// Join the room and collect the parameters the media engine needs.
    pub async fn join(
        &self,
        params: &RoomConnectionParameters,
    ) -> Result<SignalingParameters, CallError> {
        let url = params.join_url();
        tracing::info!("joining room: {url}");

        let body = self
            .http
            .post(&url)
            .send()
            .await
            .map_err(|e| CallError::Room(format!("Room join error: {e}")))?
            .text()
            .await?;
        tracing::debug!("room response: {body}");

        let mut signaling = parse_join_response(&body)?;

        if !signaling.ice_servers.iter().any(IceServer::is_turn) {
            if let Some(ice_url) = ice_server_url(&body) {
                let turn = self.request_turn_servers(&ice_url, &params.room_url).await?;
                signaling.ice_servers.extend(turn);
            }
        }

        Ok(signaling)
    }

    async fn request_turn_servers(
        &self,
        url: &str,
        origin: &str,
    ) -> Result<Vec<IceServer>, CallError> {
        tracing::info!("requesting TURN servers from {url}");
        let resp = self
            .http
            .post(url)
            .header(reqwest::header::ORIGIN, origin)
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(CallError::Http(format!(
                "Non-200 response when requesting TURN server from {url}: {}",
                resp.status()
            )));
        }

        let data: IceServersResponse = resp.json().await?;
        Ok(data.ice_servers.iter().filter_map(ice_server_from_json).collect())
    }

    /// POST a session message and require a `SUCCESS` result.
    pub async fn post_message(&self, url: &str, message: &str) -> Result<(), CallError> {
        tracing::debug!("POST {url}: {message}");
        let text = self
            .http
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, "text/plain; charset=utf-8")
            .body(message.to_string())
            .send()
            .await
            .map_err(|e| CallError::Http(format!("GAE POST error: {e}")))?
            .text()
            .await
            .map_err(|e| CallError::Http(format!("GAE POST error: {e}")))?;

        let reply: PostResponse = serde_json::from_str(&text)
            .map_err(|e| CallError::Protocol(format!("GAE POST JSON error: {e}")))?;
        if reply.result != RESULT_SUCCESS {
            return Err(CallError::Room(format!("GAE POST error: {}", reply.result)));
        }
        Ok(())
    }

    /// Tell the room server we are gone. The reply carries nothing useful.
    pub async fn leave(&self, url: &str) {
        tracing::info!("leaving room: {url}");
        if let Err(e) = self.http.post(url).send().await {
            tracing::warn!("leave request failed: {e}");
        }
    }

    pub async fn delete(&self, url: &str) -> Result<(), CallError> {
        self.http.delete(url).send().await?.error_for_status()?;
        Ok(())
    }
}

fn ice_server_url(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    let url = value["params"]["ice_server_url"].as_str()?;
    if url.is_empty() {
        None
    } else {
        Some(url.to_string())
    }
}

fn string_field(params: &Value, key: &str) -> Result<String, CallError> {
    params[key]
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| CallError::Protocol(format!("Room JSON parsing error: missing '{key}'")))
}

fn bool_field(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::String(s) => s.eq_ignore_ascii_case("true"),
        _ => false,
    }
}

fn ice_server_from_json(server: &Value) -> Option<IceServer> {
    let urls = match &server["urls"] {
        Value::String(url) => vec![url.clone()],
        Value::Array(urls) => urls
            .iter()
            .filter_map(|u| u.as_str().map(str::to_string))
            .collect(),
        _ => return None,
    };
    if urls.is_empty() {
        return None;
    }
    Some(IceServer {
        urls,
        username: server["username"].as_str().unwrap_or_default().to_string(),
        credential: server["credential"].as_str().unwrap_or_default().to_string(),
    })
}

fn ice_servers_from_pc_config(pc_config: &str) -> Result<Vec<IceServer>, CallError> {
    let config: Value = serde_json::from_str(pc_config)
        .map_err(|e| CallError::Protocol(format!("Room JSON parsing error: {e}")))?;
    let servers = config["iceServers"].as_array().cloned().unwrap_or_default();
    Ok(servers.iter().filter_map(ice_server_from_json).collect())
}

/// Parse the body of `POST /join/{room}` into signaling parameters.
pub fn parse_join_response(body: &str) -> Result<SignalingParameters, CallError> {
    let resp: JoinResponse = serde_json::from_str(body)
        .map_err(|e| CallError::Protocol(format!("Room JSON parsing error: {e}")))?;
    if resp.result != RESULT_SUCCESS {
        return Err(CallError::Room(format!("Room response error: {}", resp.result)));
    }
    let params = resp
        .params
        .ok_or_else(|| CallError::Protocol("Room JSON parsing error: missing 'params'".into()))?;

    let room_id = string_field(&params, "room_id")?;
    let client_id = string_field(&params, "client_id")?;
    let wss_url = string_field(&params, "wss_url")?;
    let wss_post_url = string_field(&params, "wss_post_url")?;
    let initiator = bool_field(&params["is_initiator"]);
    tracing::info!("room {room_id}: client {client_id}, initiator {initiator}");

    let mut offer_sdp = None;
    let mut ice_candidates = Vec::new();
    if !initiator {
        let messages = params["messages"].as_array().cloned().unwrap_or_default();
        for raw in messages {
            let text = match raw {
                Value::String(s) => s,
                other => other.to_string(),
            };
            tracing::debug!("room message: {text}");
            match SignalingMessage::from_json(&text) {
                Ok(SignalingMessage::Description(sdp)) => offer_sdp = Some(sdp),
                Ok(SignalingMessage::Candidate(c)) => ice_candidates.push(c),
                Ok(_) | Err(_) => {
                    return Err(CallError::Protocol(format!("Unknown message: {text}")));
                }
            }
        }
    }

    let ice_servers = match params["pc_config"].as_str() {
        Some(pc_config) if !pc_config.is_empty() => ice_servers_from_pc_config(pc_config)?,
        _ => Vec::new(),
    };

    Ok(SignalingParameters {
        ice_servers,
        initiator,
        client_id: Some(client_id),
        wss_url: Some(wss_url),
        wss_post_url: Some(wss_post_url),
        offer_sdp,
        ice_candidates,
    })
}
