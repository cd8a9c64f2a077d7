use std::net::{IpAddr, Ipv4Addr};
use std::sync::LazyLock;

use rand::Rng;

use crate::errors::CallError;
use crate::messages::{IceCandidate, SessionDescription};

/// Port used by direct TCP calls when the room id carries none.
pub const DEFAULT_DIRECT_PORT: u16 = 8888;

/// IPv4, bracketed or bare IPv6, or `localhost`, with an optional port.
static IP_PATTERN: LazyLock<regex::Regex> = LazyLock::new(|| {
    let hex = "[0-9a-fA-F]{1,4}";
    let pattern = format!(
        r"^(?P<host>(?:\d+\.){{3}}\d+|\[(?:(?:{hex}:)*{hex})?::(?:(?:{hex}:)*{hex})?\]|\[(?:{hex}:)*{hex}\]|(?:(?:{hex}:)*{hex})?::(?:(?:{hex}:)*{hex})?|(?:{hex}:)*{hex}|localhost)(?::(?P<port>\d+))?$"
    );
    regex::Regex::new(&pattern).expect("IP endpoint pattern is valid")
});

/// A STUN/TURN server handed to the media engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IceServer {
    pub urls: Vec<String>,
    pub username: String,
    pub credential: String,
}

impl IceServer {
    pub fn is_turn(&self) -> bool {
        self.urls
            .iter()
            .any(|u| u.starts_with("turn:") || u.starts_with("turns:"))
    }
}

/// Everything the media engine needs once a room (or TCP peer) is joined.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SignalingParameters {
    pub ice_servers: Vec<IceServer>,
    pub initiator: bool,
    pub client_id: Option<String>,
    pub wss_url: Option<String>,
    pub wss_post_url: Option<String>,
    /// Offer already posted by the other peer (non-initiator only).
    pub offer_sdp: Option<SessionDescription>,
    pub ice_candidates: Vec<IceCandidate>,
}

/// What the user typed on the connect screen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomConnectionParameters {
    pub room_url: String,
    pub room_id: String,
    pub loopback: bool,
    pub url_parameters: Option<String>,
}

impl RoomConnectionParameters {
    pub fn new(room_url: impl Into<String>, room_id: impl Into<String>, loopback: bool) -> Self {
        Self {
            room_url: room_url.into(),
            room_id: room_id.into(),
            loopback,
            url_parameters: None,
        }
    }

    fn base(&self) -> &str {
        self.room_url.trim_end_matches('/')
    }

    fn query(&self) -> String {
        match self.url_parameters.as_deref() {
            Some(q) if !q.is_empty() => format!("?{q}"),
            _ => String::new(),
        }
    }

    pub fn join_url(&self) -> String {
        format!(
            "{}/join/{}{}",
            self.base(),
            urlencoding::encode(&self.room_id),
            self.query()
        )
    }

    pub fn message_url(&self, client_id: &str) -> String {
        format!(
            "{}/message/{}/{}{}",
            self.base(),
            urlencoding::encode(&self.room_id),
            urlencoding::encode(client_id),
            self.query()
        )
    }

    pub fn leave_url(&self, client_id: &str) -> String {
        format!(
            "{}/leave/{}/{}{}",
            self.base(),
            urlencoding::encode(&self.room_id),
            urlencoding::encode(client_id),
            self.query()
        )
    }

    /// `true` when the room id names a TCP peer instead of a server room.
    pub fn is_direct(&self) -> bool {
        !self.loopback && DirectEndpoint::parse(&self.room_id).is_ok()
    }
}

/// A TCP peer address parsed from a room id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirectEndpoint {
    pub ip: IpAddr,
    pub port: u16,
}

impl DirectEndpoint {
    pub fn parse(room_id: &str) -> Result<Self, CallError> {
        let invalid = || CallError::InvalidUrl(format!("'{room_id}' is not an IP endpoint"));
        let caps = IP_PATTERN.captures(room_id.trim()).ok_or_else(invalid)?;

        let host = caps.name("host").map(|m| m.as_str()).unwrap_or_default();
        let ip = if host == "localhost" {
            IpAddr::V4(Ipv4Addr::LOCALHOST)
        } else {
            host.trim_start_matches('[')
                .trim_end_matches(']')
                .parse::<IpAddr>()
                .map_err(|_| invalid())?
        };

        let port = match caps.name("port") {
            Some(p) => p.as_str().parse::<u16>().map_err(|_| invalid())?,
            None => DEFAULT_DIRECT_PORT,
        };

        Ok(Self { ip, port })
    }

    /// Unspecified addresses (`0.0.0.0`, `::`) listen for the peer.
    pub fn is_server(&self) -> bool {
        self.ip.is_unspecified()
    }
}

/// Random numeric room id used for loopback calls.
pub fn random_room_id() -> String {
    rand::thread_rng().gen_range(0..100_000_000u32).to_string()
}
