//! JSON wire contract shared by the room server, the WebSocket relay and
//! the direct TCP transport.
//!
//! Session content is always a JSON object with a `type` discriminator:
//! `offer`, `answer`, `candidate`, `remove-candidates` or `bye`. The
//! WebSocket relay wraps it in `{"cmd":"send","msg":"<json>"}` envelopes.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Answer,
}

impl SdpType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SdpType::Offer => "offer",
            SdpType::Answer => "answer",
        }
    }
}

/// An SDP blob produced or consumed by the media engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionDescription {
    pub sdp_type: SdpType,
    pub description: String,
}

impl SessionDescription {
    pub fn offer(description: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Offer,
            description: description.into(),
        }
    }

    pub fn answer(description: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Answer,
            description: description.into(),
        }
    }
}

/// A network path proposal. Serialized with the short field names used on
/// the wire (`id`, `label`, `candidate`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidate {
    #[serde(rename = "id")]
    pub sdp_mid: String,
    #[serde(rename = "label")]
    pub sdp_m_line_index: i32,
    #[serde(rename = "candidate")]
    pub sdp: String,
}

#[derive(Debug, Error)]
pub enum MessageError {
    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unexpected message type '{0}'")]
    UnexpectedType(String),
}

/// Session content exchanged between peers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignalingMessage {
    Description(SessionDescription),
    Candidate(IceCandidate),
    RemoveCandidates(Vec<IceCandidate>),
    Bye,
}

#[derive(Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
enum WireMessage {
    Offer { sdp: String },
    Answer { sdp: String },
    Candidate(IceCandidate),
    RemoveCandidates { candidates: Vec<TaggedCandidate> },
    Bye,
}

// Entries of `remove-candidates` carry their own `"type":"candidate"`.
#[derive(Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum TaggedCandidate {
    Candidate(IceCandidate),
}

const KNOWN_TYPES: [&str; 5] = ["offer", "answer", "candidate", "remove-candidates", "bye"];

impl SignalingMessage {
    pub fn to_json(&self) -> String {
        let wire = match self.clone() {
            SignalingMessage::Description(sdp) => match sdp.sdp_type {
                SdpType::Offer => WireMessage::Offer {
                    sdp: sdp.description,
                },
                SdpType::Answer => WireMessage::Answer {
                    sdp: sdp.description,
                },
            },
            SignalingMessage::Candidate(c) => WireMessage::Candidate(c),
            SignalingMessage::RemoveCandidates(cs) => WireMessage::RemoveCandidates {
                candidates: cs.into_iter().map(TaggedCandidate::Candidate).collect(),
            },
            SignalingMessage::Bye => WireMessage::Bye,
        };
        // Plain strings and integers only; serialization cannot fail.
        serde_json::to_string(&wire).unwrap_or_default()
    }

    pub fn from_json(text: &str) -> Result<Self, MessageError> {
        let value: serde_json::Value = serde_json::from_str(text)?;
        let kind = value
            .get("type")
            .and_then(serde_json::Value::as_str)
            .unwrap_or_default()
            .to_string();
        if !KNOWN_TYPES.contains(&kind.as_str()) {
            return Err(MessageError::UnexpectedType(kind));
        }

        let msg = match serde_json::from_value::<WireMessage>(value)? {
            WireMessage::Offer { sdp } => SignalingMessage::Description(SessionDescription::offer(sdp)),
            WireMessage::Answer { sdp } => {
                SignalingMessage::Description(SessionDescription::answer(sdp))
            }
            WireMessage::Candidate(c) => SignalingMessage::Candidate(c),
            WireMessage::RemoveCandidates { candidates } => SignalingMessage::RemoveCandidates(
                candidates
                    .into_iter()
                    .map(|TaggedCandidate::Candidate(c)| c)
                    .collect(),
            ),
            WireMessage::Bye => SignalingMessage::Bye,
        };
        Ok(msg)
    }
}

/// Commands written to the WebSocket relay.
#[derive(Debug, Serialize)]
#[serde(tag = "cmd", rename_all = "lowercase")]
pub enum ChannelCommand<'a> {
    Register { roomid: &'a str, clientid: &'a str },
    Send { msg: &'a str },
}

impl ChannelCommand<'_> {
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// A frame received from the WebSocket relay.
#[derive(Debug, Deserialize)]
pub struct ChannelFrame {
    pub msg: String,
    #[serde(default)]
    pub error: String,
}

/// Reply body of room server POSTs.
#[derive(Debug, Deserialize)]
pub struct PostResponse {
    pub result: String,
}

pub const RESULT_SUCCESS: &str = "SUCCESS";
