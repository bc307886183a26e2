//! Seam between the negotiation state machine and the peer-to-peer primitive
//! that actually moves bytes (a WebRTC peer connection in production).

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use rtcmesh_core::{
    DataChannelConfig, IceCandidate, PeerConnectionConfig, Result, SdpType, SessionDescription,
};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::debug;

/// Failure reported by a transport primitive. The negotiation layer tags it
/// with the step that failed.
#[derive(Error, Debug, Clone)]
#[error("{0}")]
pub struct TransportError(pub String);

impl TransportError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

pub type TransportResult<T> = std::result::Result<T, TransportError>;

// ── States ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IceGatheringState {
    New,
    Gathering,
    Complete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IceConnectionState {
    New,
    Checking,
    Connected,
    Completed,
    Disconnected,
    Failed,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalingState {
    Stable,
    HaveLocalOffer,
    HaveRemoteOffer,
    HaveLocalPranswer,
    HaveRemotePranswer,
    Closed,
}

impl SignalingState {
    /// State after applying a description of `sdp_type`, locally or remotely.
    pub fn apply(self, local: bool, sdp_type: SdpType) -> SignalingState {
        match (sdp_type, local) {
            (SdpType::Offer, true) => SignalingState::HaveLocalOffer,
            (SdpType::Offer, false) => SignalingState::HaveRemoteOffer,
            (SdpType::Pranswer, true) => SignalingState::HaveLocalPranswer,
            (SdpType::Pranswer, false) => SignalingState::HaveRemotePranswer,
            (SdpType::Answer | SdpType::Rollback, _) => SignalingState::Stable,
        }
    }
}

/// Everything a primitive reports back to its channel.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// A gathered candidate; `None` marks the end of gathering.
    IceCandidate(Option<IceCandidate>),
    IceGatheringStateChange(IceGatheringState),
    IceConnectionStateChange(IceConnectionState),
    SignalingStateChange(SignalingState),
    NegotiationNeeded,
    DataChannelOpen,
    DataChannelMessage(String),
    DataChannelClose,
    DataChannelError(String),
}

// ── Primitive ──────────────────────────────────────────────────

/// What a factory needs to build one primitive.
#[derive(Debug, Clone, Default)]
pub struct ConnectionOptions {
    pub is_initiator: bool,
    pub trickle_ice: bool,
    pub peer_connection: PeerConnectionConfig,
    pub data_channel: DataChannelConfig,
    /// Ids of local streams to attach. Passed through untouched.
    pub streams: Vec<String>,
}

#[async_trait]
pub trait PeerConnection: Send + Sync {
    async fn create_offer(&self) -> TransportResult<SessionDescription>;
    async fn create_answer(&self) -> TransportResult<SessionDescription>;
    async fn set_local_description(&self, desc: SessionDescription) -> TransportResult<()>;
    async fn set_remote_description(&self, desc: SessionDescription) -> TransportResult<()>;
    async fn add_ice_candidate(&self, candidate: IceCandidate) -> TransportResult<()>;
    async fn local_description(&self) -> Option<SessionDescription>;
    async fn send(&self, text: String) -> TransportResult<()>;
    async fn close(&self);
}

/// A freshly built primitive and the stream of events it raises.
pub struct TransportParts {
    pub connection: Arc<dyn PeerConnection>,
    pub events: mpsc::UnboundedReceiver<TransportEvent>,
}

/// Builds primitives. Fails with `UnsupportedTransport` when the platform has none.
#[async_trait]
pub trait PeerConnectionFactory: Send + Sync {
    async fn create(&self, options: &ConnectionOptions) -> Result<TransportParts>;
}

// ── Relay-only primitive ───────────────────────────────────────

const RELAY_SDP: &str = "v=0\r\no=- 0 0 IN IP4 0.0.0.0\r\ns=rtcmesh-relay\r\nt=0 0\r\n";

/// Factory for builds without a native peer-to-peer stack.
///
/// Its connections walk through offer/answer like a real primitive but never
/// open a data channel, so every peer reaches the relay fallback.
#[derive(Debug, Clone, Copy, Default)]
pub struct RelayOnlyFactory;

#[async_trait]
impl PeerConnectionFactory for RelayOnlyFactory {
    async fn create(&self, options: &ConnectionOptions) -> Result<TransportParts> {
        let (tx, rx) = mpsc::unbounded_channel();
        if options.is_initiator {
            let _ = tx.send(TransportEvent::NegotiationNeeded);
        }
        let connection = RelayOnlyConnection {
            events: tx,
            state: Mutex::new(RelayOnlyState {
                local: None,
                signaling: SignalingState::Stable,
            }),
        };
        Ok(TransportParts {
            connection: Arc::new(connection),
            events: rx,
        })
    }
}

struct RelayOnlyState {
    local: Option<SessionDescription>,
    signaling: SignalingState,
}

struct RelayOnlyConnection {
    events: mpsc::UnboundedSender<TransportEvent>,
    state: Mutex<RelayOnlyState>,
}

impl RelayOnlyConnection {
    fn transition(&self, local: bool, sdp_type: SdpType) {
        let next = {
            let mut state = self.state.lock();
            let next = state.signaling.apply(local, sdp_type);
            if next == state.signaling {
                return;
            }
            state.signaling = next;
            next
        };
        let _ = self.events.send(TransportEvent::SignalingStateChange(next));
    }
}

#[async_trait]
impl PeerConnection for RelayOnlyConnection {
    async fn create_offer(&self) -> TransportResult<SessionDescription> {
        Ok(SessionDescription::offer(RELAY_SDP))
    }

    async fn create_answer(&self) -> TransportResult<SessionDescription> {
        Ok(SessionDescription::answer(RELAY_SDP))
    }

    async fn set_local_description(&self, desc: SessionDescription) -> TransportResult<()> {
        let sdp_type = desc.sdp_type;
        self.state.lock().local = Some(desc);
        self.transition(true, sdp_type);
        let _ = self.events.send(TransportEvent::IceGatheringStateChange(
            IceGatheringState::Complete,
        ));
        Ok(())
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> TransportResult<()> {
        self.transition(false, desc.sdp_type);
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> TransportResult<()> {
        debug!(candidate = %candidate.candidate, "relay-only transport ignoring candidate");
        Ok(())
    }

    async fn local_description(&self) -> Option<SessionDescription> {
        self.state.lock().local.clone()
    }

    async fn send(&self, _text: String) -> TransportResult<()> {
        Err(TransportError::new("relay-only transport has no data channel"))
    }

    async fn close(&self) {
        self.state.lock().signaling = SignalingState::Closed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signaling_state_transitions() {
        let s = SignalingState::Stable;
        let s = s.apply(true, SdpType::Offer);
        assert_eq!(s, SignalingState::HaveLocalOffer);
        assert_eq!(s.apply(false, SdpType::Answer), SignalingState::Stable);
        assert_eq!(
            SignalingState::Stable.apply(false, SdpType::Offer),
            SignalingState::HaveRemoteOffer
        );
    }

    #[tokio::test]
    async fn relay_only_initiator_asks_for_negotiation() {
        let options = ConnectionOptions {
            is_initiator: true,
            ..Default::default()
        };
        let mut parts = RelayOnlyFactory.create(&options).await.unwrap();
        assert_eq!(parts.events.recv().await, Some(TransportEvent::NegotiationNeeded));

        let offer = parts.connection.create_offer().await.unwrap();
        parts.connection.set_local_description(offer).await.unwrap();
        assert_eq!(
            parts.events.recv().await,
            Some(TransportEvent::SignalingStateChange(SignalingState::HaveLocalOffer))
        );
        assert!(parts.connection.send("x".into()).await.is_err());
    }
}
