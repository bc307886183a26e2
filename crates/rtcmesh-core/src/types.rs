use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Unique name of a mesh participant, assigned by the application.
pub type PeerName = String;

/// Envelope type reserved for RPC responses.
pub const RESPONSE_TYPE: &str = "response";

// ── Correlation ────────────────────────────────────────────────

/// Random identifier tying a response envelope to its request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(String);

impl CorrelationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for CorrelationId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for CorrelationId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

// ── Envelope ───────────────────────────────────────────────────

/// Framed unit exchanged between peers once a channel is open.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub id: CorrelationId,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub payload: Value,
}

impl Envelope {
    pub fn request(kind: impl Into<String>, payload: Value) -> Self {
        Self {
            id: CorrelationId::new(),
            kind: kind.into(),
            payload,
        }
    }

    pub fn response(id: CorrelationId, payload: Value) -> Self {
        Self {
            id,
            kind: RESPONSE_TYPE.to_string(),
            payload,
        }
    }

    pub fn is_response(&self) -> bool {
        self.kind == RESPONSE_TYPE
    }

    pub fn to_text(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_text(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }
}

// ── Negotiation vocabulary ─────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Answer,
    Pranswer,
    Rollback,
}

/// Session description as carried in `{type, sdp}` signals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Answer,
            sdp: sdp.into(),
        }
    }
}

/// Connectivity candidate in the browser's `RTCIceCandidateInit` shape.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(default, rename = "sdpMLineIndex", skip_serializing_if = "Option::is_none")]
    pub sdp_mline_index: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username_fragment: Option<String>,
}

/// One negotiation message, relayed verbatim between two channels.
#[derive(Debug, Clone, PartialEq)]
pub enum SignalMessage {
    Candidate(IceCandidate),
    Description(SessionDescription),
    Renegotiate,
}

impl SignalMessage {
    /// Classify raw signal data. Strings are parsed as JSON first.
    ///
    /// Returns `None` for anything that is not one of the three shapes,
    /// including `{renegotiate: false}` and candidates that fail to parse.
    pub fn parse(data: &Value) -> Option<Self> {
        let owned;
        let data = match data {
            Value::String(raw) => {
                owned = serde_json::from_str::<Value>(raw).ok()?;
                &owned
            }
            other => other,
        };

        if let Some(candidate) = data.get("candidate").filter(|c| is_truthy(c)) {
            return match candidate {
                Value::String(line) => Some(SignalMessage::Candidate(IceCandidate {
                    candidate: line.clone(),
                    sdp_mid: data.get("sdpMid").and_then(Value::as_str).map(str::to_string),
                    sdp_mline_index: data
                        .get("sdpMLineIndex")
                        .and_then(Value::as_u64)
                        .and_then(|i| u16::try_from(i).ok()),
                    username_fragment: None,
                })),
                other => serde_json::from_value(other.clone())
                    .ok()
                    .map(SignalMessage::Candidate),
            };
        }
        if data.get("sdp").is_some_and(is_truthy) {
            return serde_json::from_value(data.clone())
                .ok()
                .map(SignalMessage::Description);
        }
        if data.get("renegotiate").is_some_and(is_truthy) {
            return Some(SignalMessage::Renegotiate);
        }
        None
    }

    pub fn to_value(&self) -> Value {
        match self {
            SignalMessage::Candidate(candidate) => serde_json::json!({ "candidate": candidate }),
            SignalMessage::Description(desc) => serde_json::json!({
                "type": desc.sdp_type,
                "sdp": desc.sdp,
            }),
            SignalMessage::Renegotiate => serde_json::json!({ "renegotiate": true }),
        }
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::String(s) => !s.is_empty(),
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::Array(_) | Value::Object(_) => true,
    }
}

// ── Transport configuration ────────────────────────────────────

/// STUN/TURN server entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceServer {
    pub urls: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

impl IceServer {
    pub fn stun(url: impl Into<String>) -> Self {
        Self {
            urls: vec![url.into()],
            username: None,
            credential: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PeerConnectionConfig {
    pub ice_servers: Vec<IceServer>,
}

impl Default for PeerConnectionConfig {
    fn default() -> Self {
        Self {
            ice_servers: vec![
                IceServer::stun("stun:stun.l.google.com:19302"),
                IceServer::stun("stun:global.stun.twilio.com:3478?transport=udp"),
            ],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataChannelConfig {
    pub label: String,
    pub ordered: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_retransmits: Option<u16>,
}

impl Default for DataChannelConfig {
    fn default() -> Self {
        Self {
            label: "data".into(),
            ordered: true,
            max_retransmits: None,
        }
    }
}

// ── Signaling protocol ─────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerRef {
    pub peer_name: PeerName,
}

/// Negotiation payload addressed to (outbound) or from (inbound) a peer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayedSignal {
    pub peer_name: PeerName,
    pub signal: Value,
}

/// Envelope relayed through the signaling server while a peer is in fallback mode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayedEnvelope {
    pub peer_name: PeerName,
    #[serde(flatten)]
    pub envelope: Envelope,
}

/// `{type, payload}` message exchanged with the signaling server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum SignalingMessage {
    Discover(PeerRef),
    Discovered(PeerRef),
    Signal(RelayedSignal),
    Data(RelayedEnvelope),
    Disconnected(PeerRef),
    Ping,
}

impl SignalingMessage {
    pub const TYPES: [&'static str; 6] = [
        "discover",
        "discovered",
        "signal",
        "data",
        "disconnected",
        "ping",
    ];

    pub fn type_name(&self) -> &'static str {
        match self {
            SignalingMessage::Discover(_) => "discover",
            SignalingMessage::Discovered(_) => "discovered",
            SignalingMessage::Signal(_) => "signal",
            SignalingMessage::Data(_) => "data",
            SignalingMessage::Disconnected(_) => "disconnected",
            SignalingMessage::Ping => "ping",
        }
    }

    /// Encode as a text frame. Every frame carries `payload`, `null` for `ping`.
    pub fn to_text(&self) -> serde_json::Result<String> {
        let mut value = serde_json::to_value(self)?;
        if let Value::Object(map) = &mut value {
            map.entry("payload").or_insert(Value::Null);
        }
        serde_json::to_string(&value)
    }
}
