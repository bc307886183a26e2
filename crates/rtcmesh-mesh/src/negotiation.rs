//! Offer/answer/candidate state machine around one transport primitive.

use std::fmt;
use std::sync::Arc;

use rtcmesh_core::{ErrorKind, IceCandidate, MeshError, Result, SessionDescription, SignalMessage};
use serde_json::Value;
use tracing::{debug, info, trace, warn};

use crate::transport::{
    IceConnectionState, IceGatheringState, PeerConnection, SignalingState, TransportError,
    TransportEvent,
};

/// Hook applied to every locally created session description before it is set.
#[derive(Clone)]
pub struct SdpTransformer(Arc<dyn Fn(String) -> String + Send + Sync>);

impl SdpTransformer {
    pub fn new(f: impl Fn(String) -> String + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    pub fn identity() -> Self {
        Self::new(|sdp| sdp)
    }

    pub fn apply(&self, sdp: String) -> String {
        (self.0)(sdp)
    }
}

impl Default for SdpTransformer {
    fn default() -> Self {
        Self::identity()
    }
}

impl fmt::Debug for SdpTransformer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SdpTransformer(..)")
    }
}

/// Events a channel raises towards its owner.
#[derive(Debug, Clone)]
pub enum ChannelEvent {
    /// Negotiation payload to relay to the remote side.
    Signal(Value),
    Connect,
    Data(String),
    Error(MeshError),
    Close,
    /// Outbound payload to forward through the signaling relay (fallback mode).
    RelaySend(String),
}

#[derive(Debug, Clone, Default)]
pub struct ChannelOptions {
    pub is_initiator: bool,
    pub trickle_ice: bool,
    pub sdp_transformer: SdpTransformer,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NegotiationState {
    pub is_initiator: bool,
    pub is_connected: bool,
    pub is_destroyed: bool,
    pub is_ice_complete: bool,
    pub is_negotiating: bool,
    pub should_renegotiate: bool,
}

/// Drives one session-description/candidate exchange to an open data channel.
///
/// All methods run to completion on the owning task; events produced along the
/// way are queued and collected with [`NegotiationChannel::take_events`]. Once
/// destroyed, the only events ever queued are the terminal `Error`/`Close` pair.
pub struct NegotiationChannel {
    options: ChannelOptions,
    state: NegotiationState,
    connection: Option<Arc<dyn PeerConnection>>,
    /// Local description is waiting for ICE gathering to complete.
    awaiting_ice_complete: bool,
    outbox: Vec<ChannelEvent>,
}

impl NegotiationChannel {
    pub fn new(connection: Arc<dyn PeerConnection>, options: ChannelOptions) -> Self {
        let state = NegotiationState {
            is_initiator: options.is_initiator,
            ..Default::default()
        };
        Self {
            options,
            state,
            connection: Some(connection),
            awaiting_ice_complete: false,
            outbox: Vec::new(),
        }
    }

    pub fn state(&self) -> NegotiationState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state.is_connected
    }

    pub fn is_destroyed(&self) -> bool {
        self.state.is_destroyed
    }

    /// Whether the transport primitive is still attached.
    pub fn has_transport(&self) -> bool {
        self.connection.is_some()
    }

    pub fn take_events(&mut self) -> Vec<ChannelEvent> {
        std::mem::take(&mut self.outbox)
    }

    pub(crate) fn push_event(&mut self, event: ChannelEvent) {
        if !self.state.is_destroyed {
            self.outbox.push(event);
        }
    }

    // ── Inbound signals ────────────────────────────────────────

    /// Apply one negotiation message from the remote side.
    pub async fn signal(&mut self, data: Value) -> Result<()> {
        if self.state.is_destroyed {
            return Err(MeshError::destroyed("cannot signal after peer is destroyed"));
        }
        let Some(connection) = self.connection.clone() else {
            debug!("transport released, ignoring signal");
            return Ok(());
        };

        match SignalMessage::parse(&data) {
            Some(SignalMessage::Candidate(candidate)) => {
                self.add_ice_candidate(&connection, candidate).await;
            }
            Some(SignalMessage::Description(desc)) => {
                self.set_remote_description(&connection, desc).await;
            }
            Some(SignalMessage::Renegotiate) => {
                self.on_negotiation_needed().await;
            }
            None => {
                warn!(signal = %data, "invalid signal data");
                self.destroy(Some(MeshError::new(
                    ErrorKind::InvalidSignal,
                    "signal called with invalid signal data",
                )))
                .await;
            }
        }
        Ok(())
    }

    async fn add_ice_candidate(&mut self, connection: &Arc<dyn PeerConnection>, candidate: IceCandidate) {
        trace!(candidate = %candidate.candidate, "adding remote candidate");
        if let Err(e) = connection.add_ice_candidate(candidate).await {
            self.fail(ErrorKind::AddCandidateFailed, e).await;
        }
    }

    async fn set_remote_description(
        &mut self,
        connection: &Arc<dyn PeerConnection>,
        desc: SessionDescription,
    ) {
        let sdp_type = desc.sdp_type;
        debug!(?sdp_type, "setting remote description");
        if let Err(e) = connection.set_remote_description(desc).await {
            self.fail(ErrorKind::SetRemoteDescriptionFailed, e).await;
            return;
        }
        if self.state.is_destroyed {
            return;
        }
        if sdp_type == rtcmesh_core::SdpType::Offer {
            self.create_answer(connection).await;
        }
    }

    // ── Offer / answer ─────────────────────────────────────────

    async fn on_negotiation_needed(&mut self) {
        if self.state.is_destroyed {
            return;
        }
        if self.options.is_initiator {
            if self.state.is_negotiating {
                debug!("negotiation already in progress, deferring renegotiation");
                self.state.should_renegotiate = true;
            } else {
                self.state.is_negotiating = true;
                if let Some(connection) = self.connection.clone() {
                    self.create_offer(&connection).await;
                }
            }
        } else {
            debug!("asking initiator to renegotiate");
            self.outbox.push(ChannelEvent::Signal(SignalMessage::Renegotiate.to_value()));
        }
        if !self.state.is_destroyed {
            self.state.is_negotiating = true;
        }
    }

    async fn create_offer(&mut self, connection: &Arc<dyn PeerConnection>) {
        if self.state.is_destroyed {
            return;
        }
        let offer = match connection.create_offer().await {
            Ok(offer) => offer,
            Err(e) => return self.fail(ErrorKind::CreateOfferFailed, e).await,
        };
        self.apply_local_description(connection, offer).await;
    }

    async fn create_answer(&mut self, connection: &Arc<dyn PeerConnection>) {
        if self.state.is_destroyed {
            return;
        }
        let answer = match connection.create_answer().await {
            Ok(answer) => answer,
            Err(e) => return self.fail(ErrorKind::CreateAnswerFailed, e).await,
        };
        self.apply_local_description(connection, answer).await;
    }

    async fn apply_local_description(
        &mut self,
        connection: &Arc<dyn PeerConnection>,
        mut desc: SessionDescription,
    ) {
        if self.state.is_destroyed {
            return;
        }
        desc.sdp = self.options.sdp_transformer.apply(desc.sdp);
        if let Err(e) = connection.set_local_description(desc).await {
            return self.fail(ErrorKind::SetLocalDescriptionFailed, e).await;
        }
        if self.state.is_destroyed {
            return;
        }
        if self.options.trickle_ice || self.state.is_ice_complete {
            self.emit_local_description().await;
        } else {
            debug!("holding local description until ICE gathering completes");
            self.awaiting_ice_complete = true;
        }
    }

    async fn emit_local_description(&mut self) {
        let Some(connection) = self.connection.clone() else {
            return;
        };
        match connection.local_description().await {
            Some(desc) => {
                debug!(sdp_type = ?desc.sdp_type, "emitting local description");
                self.outbox
                    .push(ChannelEvent::Signal(SignalMessage::Description(desc).to_value()));
            }
            None => warn!("local description missing after it was set"),
        }
    }

    // ── Transport events ───────────────────────────────────────

    pub async fn handle_transport_event(&mut self, event: TransportEvent) {
        if self.state.is_destroyed || self.connection.is_none() {
            return;
        }
        trace!(?event, "transport event");
        match event {
            TransportEvent::IceCandidate(Some(candidate)) => {
                if self.options.trickle_ice {
                    self.outbox
                        .push(ChannelEvent::Signal(SignalMessage::Candidate(candidate).to_value()));
                }
            }
            TransportEvent::IceCandidate(None) => {}
            TransportEvent::IceGatheringStateChange(IceGatheringState::Complete) => {
                self.state.is_ice_complete = true;
                if std::mem::take(&mut self.awaiting_ice_complete) {
                    self.emit_local_description().await;
                }
            }
            TransportEvent::IceGatheringStateChange(_) => {
                self.state.is_ice_complete = false;
            }
            TransportEvent::IceConnectionStateChange(IceConnectionState::Failed) => {
                self.destroy(Some(MeshError::new(
                    ErrorKind::IceConnectionFailed,
                    "Ice connection failed.",
                )))
                .await;
            }
            TransportEvent::IceConnectionStateChange(IceConnectionState::Closed) => {
                self.destroy(Some(MeshError::new(
                    ErrorKind::IceConnectionClosed,
                    "ice connection closed",
                )))
                .await;
            }
            TransportEvent::IceConnectionStateChange(_) => {}
            TransportEvent::SignalingStateChange(SignalingState::Stable) => {
                self.state.is_negotiating = false;
                if self.state.should_renegotiate {
                    self.state.should_renegotiate = false;
                    self.on_negotiation_needed().await;
                }
            }
            TransportEvent::SignalingStateChange(_) => {}
            TransportEvent::NegotiationNeeded => self.on_negotiation_needed().await,
            TransportEvent::DataChannelOpen => self.open(),
            TransportEvent::DataChannelMessage(text) => {
                self.outbox.push(ChannelEvent::Data(text));
            }
            TransportEvent::DataChannelClose => self.destroy(None).await,
            TransportEvent::DataChannelError(message) => {
                self.destroy(Some(MeshError::new(ErrorKind::DataChannelError, message)))
                    .await;
            }
        }
    }

    /// Mark the channel open. `Connect` is queued only the first time.
    pub fn open(&mut self) {
        if self.state.is_connected || self.state.is_destroyed {
            return;
        }
        info!("channel connected");
        self.state.is_connected = true;
        self.outbox.push(ChannelEvent::Connect);
    }

    // ── Outbound ───────────────────────────────────────────────

    pub async fn send(&mut self, text: String) -> Result<()> {
        if self.state.is_destroyed {
            return Err(MeshError::destroyed("cannot call send after peer is destroyed"));
        }
        let Some(connection) = self.connection.as_ref() else {
            return Err(MeshError::new(
                ErrorKind::DataChannelError,
                "data channel is not available",
            ));
        };
        connection
            .send(text)
            .await
            .map_err(|e| MeshError::new(ErrorKind::DataChannelError, e.0))
    }

    // ── Teardown ───────────────────────────────────────────────

    /// Detach the primitive without destroying the channel. Used when the
    /// channel switches to the signaling relay.
    pub fn release_transport(&mut self) -> Option<Arc<dyn PeerConnection>> {
        self.awaiting_ice_complete = false;
        self.connection.take()
    }

    /// Tear down. Idempotent; queues `Error` (if given) then `Close` exactly once.
    pub async fn destroy(&mut self, err: Option<MeshError>) {
        if self.state.is_destroyed {
            return;
        }
        self.state.is_connected = false;
        self.state.is_destroyed = true;
        self.awaiting_ice_complete = false;

        if let Some(connection) = self.connection.take() {
            connection.close().await;
        }

        match &err {
            Some(e) => warn!(kind = ?e.kind(), error = %e, "channel destroyed"),
            None => info!("channel closed"),
        }
        if let Some(e) = err {
            self.outbox.push(ChannelEvent::Error(e));
        }
        self.outbox.push(ChannelEvent::Close);
    }

    async fn fail(&mut self, kind: ErrorKind, err: TransportError) {
        self.destroy(Some(MeshError::new(kind, err.0))).await;
    }
}
