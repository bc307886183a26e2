use std::fmt;

use thiserror::Error;

use crate::types::PeerName;

/// Failure tags shared by every layer of the mesh.
///
/// The first block mirrors the negotiation core; the second block is raised by
/// the surrounding plumbing (signaling socket, config, I/O).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    // ── Negotiation ────────────────────────────────────────────
    AddCandidateFailed,
    CreateAnswerFailed,
    CreateOfferFailed,
    SetLocalDescriptionFailed,
    SetRemoteDescriptionFailed,
    InvalidSignal,
    IceConnectionFailed,
    IceConnectionClosed,
    DataChannelError,
    OperationAfterDestroy,
    UnsupportedTransport,

    // ── RPC / mesh ─────────────────────────────────────────────
    RequestTimeout,
    NoEligiblePeers,
    AllPeersFailed,
    UnknownPeer,

    // ── Ambient ────────────────────────────────────────────────
    Signaling,
    Config,
    Io,
    Serialization,
}

impl ErrorKind {
    /// Stable string code, suitable for logs and for peers written in other languages.
    pub fn code(self) -> &'static str {
        match self {
            ErrorKind::AddCandidateFailed => "ERR_ADD_ICE_CANDIDATE",
            ErrorKind::CreateAnswerFailed => "ERR_CREATE_ANSWER",
            ErrorKind::CreateOfferFailed => "ERR_CREATE_OFFER",
            ErrorKind::SetLocalDescriptionFailed => "ERR_SET_LOCAL_DESCRIPTION",
            ErrorKind::SetRemoteDescriptionFailed => "ERR_SET_REMOTE_DESCRIPTION",
            ErrorKind::InvalidSignal => "ERR_SIGNALING",
            ErrorKind::IceConnectionFailed => "ERR_ICE_CONNECTION_FAILURE",
            ErrorKind::IceConnectionClosed => "ERR_ICE_CONNECTION_CLOSED",
            ErrorKind::DataChannelError => "ERR_DATA_CHANNEL",
            ErrorKind::OperationAfterDestroy => "ERR_PEER_IS_DESTROYED",
            ErrorKind::UnsupportedTransport => "ERR_WEBRTC_SUPPORT",
            ErrorKind::RequestTimeout => "ERR_REQUEST_TIMEOUT",
            ErrorKind::NoEligiblePeers => "ERR_NO_PEERS",
            ErrorKind::AllPeersFailed => "ERR_ALL_PEERS_FAILED",
            ErrorKind::UnknownPeer => "ERR_UNKNOWN_PEER",
            ErrorKind::Signaling => "ERR_SIGNALING_SOCKET",
            ErrorKind::Config => "ERR_CONFIG",
            ErrorKind::Io => "ERR_IO",
            ErrorKind::Serialization => "ERR_SERIALIZATION",
        }
    }

    /// True for failures raised while negotiating a channel.
    pub fn is_negotiation(self) -> bool {
        matches!(
            self,
            ErrorKind::AddCandidateFailed
                | ErrorKind::CreateAnswerFailed
                | ErrorKind::CreateOfferFailed
                | ErrorKind::SetLocalDescriptionFailed
                | ErrorKind::SetRemoteDescriptionFailed
                | ErrorKind::InvalidSignal
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Unified error type for the whole mesh.
///
/// Cloneable so one failure can be surfaced as a channel `error` event and
/// returned from the call that caused it.
#[derive(Error, Debug, Clone)]
#[error("{kind}: {message}")]
pub struct MeshError {
    kind: ErrorKind,
    message: String,
    failures: Vec<(PeerName, MeshError)>,
}

impl MeshError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            failures: Vec::new(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Per-peer errors behind an `AllPeersFailed` rejection, in send order.
    pub fn failures(&self) -> &[(PeerName, MeshError)] {
        &self.failures
    }

    // ── Shorthands ─────────────────────────────────────────────

    pub fn destroyed(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::OperationAfterDestroy, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::RequestTimeout, message)
    }

    pub fn signaling(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Signaling, message)
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Config, message)
    }

    pub fn unknown_peer(peer: &str) -> Self {
        Self::new(ErrorKind::UnknownPeer, format!("no peer named '{peer}'"))
    }

    pub fn no_peers() -> Self {
        Self::new(ErrorKind::NoEligiblePeers, "No peers")
    }

    /// Aggregate rejection carrying every per-peer failure.
    pub fn all_failed(failures: Vec<(PeerName, MeshError)>) -> Self {
        let message = format!("all {} peers failed", failures.len());
        Self {
            kind: ErrorKind::AllPeersFailed,
            message,
            failures,
        }
    }
}

impl From<std::io::Error> for MeshError {
    fn from(err: std::io::Error) -> Self {
        Self::new(ErrorKind::Io, err.to_string())
    }
}

impl From<serde_json::Error> for MeshError {
    fn from(err: serde_json::Error) -> Self {
        Self::new(ErrorKind::Serialization, err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, MeshError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_prefixes_code() {
        let err = MeshError::new(ErrorKind::InvalidSignal, "signal called with invalid signal data");
        assert_eq!(
            err.to_string(),
            "ERR_SIGNALING: signal called with invalid signal data"
        );
    }

    #[test]
    fn negotiation_kinds() {
        assert!(ErrorKind::CreateOfferFailed.is_negotiation());
        assert!(!ErrorKind::IceConnectionFailed.is_negotiation());
        assert!(!ErrorKind::RequestTimeout.is_negotiation());
    }
}
