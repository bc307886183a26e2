//! Scripted in-memory transport primitive.
//!
//! Records every call, can be told to fail individual steps, and lets the
//! caller inject transport events. Two controllers can be linked so text sent
//! on one arrives as a data-channel message on the other.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use rtcmesh_core::{ErrorKind, IceCandidate, MeshError, Result, SessionDescription, SdpType};
use tokio::sync::mpsc;

use crate::transport::{
    ConnectionOptions, IceGatheringState, PeerConnection, PeerConnectionFactory, SignalingState,
    TransportError, TransportEvent, TransportParts, TransportResult,
};

/// Steps that can be scripted to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MockStep {
    CreateOffer,
    CreateAnswer,
    SetLocalDescription,
    SetRemoteDescription,
    AddIceCandidate,
    Send,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockCall {
    CreateOffer,
    CreateAnswer,
    SetLocalDescription(SdpType),
    SetRemoteDescription(SdpType),
    AddIceCandidate(String),
    Send(String),
    Close,
}

struct MockState {
    options: ConnectionOptions,
    calls: Vec<MockCall>,
    failures: HashSet<MockStep>,
    local: Option<SessionDescription>,
    remote: Option<SessionDescription>,
    signaling: SignalingState,
    linked: Option<mpsc::UnboundedSender<TransportEvent>>,
    offers: usize,
    closed: bool,
}

impl MockState {
    fn check(&self, step: MockStep) -> TransportResult<()> {
        if self.failures.contains(&step) {
            return Err(TransportError::new(format!("scripted {step:?} failure")));
        }
        Ok(())
    }
}

/// Build one mock primitive outside any factory.
pub fn mock_connection(options: &ConnectionOptions) -> (TransportParts, MockController) {
    mock_connection_with(options, HashSet::new())
}

fn mock_connection_with(
    options: &ConnectionOptions,
    failures: HashSet<MockStep>,
) -> (TransportParts, MockController) {
    let (tx, rx) = mpsc::unbounded_channel();
    let state = Arc::new(Mutex::new(MockState {
        options: options.clone(),
        calls: Vec::new(),
        failures,
        local: None,
        remote: None,
        signaling: SignalingState::Stable,
        linked: None,
        offers: 0,
        closed: false,
    }));
    let controller = MockController {
        state: Arc::clone(&state),
        events: tx.clone(),
    };
    let connection = MockConnection { state, events: tx };
    (
        TransportParts {
            connection: Arc::new(connection),
            events: rx,
        },
        controller,
    )
}

// ── Connection ─────────────────────────────────────────────────

struct MockConnection {
    state: Arc<Mutex<MockState>>,
    events: mpsc::UnboundedSender<TransportEvent>,
}

impl MockConnection {
    fn set_description(&self, local: bool, desc: SessionDescription) -> TransportResult<()> {
        let changed = {
            let mut state = self.state.lock();
            let sdp_type = desc.sdp_type;
            if local {
                state.calls.push(MockCall::SetLocalDescription(sdp_type));
                state.check(MockStep::SetLocalDescription)?;
                state.local = Some(desc);
            } else {
                state.calls.push(MockCall::SetRemoteDescription(sdp_type));
                state.check(MockStep::SetRemoteDescription)?;
                state.remote = Some(desc);
            }
            let next = state.signaling.apply(local, sdp_type);
            let changed = next != state.signaling;
            state.signaling = next;
            changed.then_some(next)
        };
        if let Some(next) = changed {
            let _ = self.events.send(TransportEvent::SignalingStateChange(next));
        }
        Ok(())
    }
}

#[async_trait]
impl PeerConnection for MockConnection {
    async fn create_offer(&self) -> TransportResult<SessionDescription> {
        let mut state = self.state.lock();
        state.calls.push(MockCall::CreateOffer);
        state.check(MockStep::CreateOffer)?;
        state.offers += 1;
        Ok(SessionDescription::offer(format!(
            "v=0\r\no=mock {} 1 IN IP4 127.0.0.1\r\ns=-\r\n",
            state.offers
        )))
    }

    async fn create_answer(&self) -> TransportResult<SessionDescription> {
        let mut state = self.state.lock();
        state.calls.push(MockCall::CreateAnswer);
        state.check(MockStep::CreateAnswer)?;
        Ok(SessionDescription::answer(
            "v=0\r\no=mock 0 1 IN IP4 127.0.0.1\r\ns=-\r\n",
        ))
    }

    async fn set_local_description(&self, desc: SessionDescription) -> TransportResult<()> {
        self.set_description(true, desc)
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> TransportResult<()> {
        self.set_description(false, desc)
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> TransportResult<()> {
        let mut state = self.state.lock();
        state.calls.push(MockCall::AddIceCandidate(candidate.candidate));
        state.check(MockStep::AddIceCandidate)
    }

    async fn local_description(&self) -> Option<SessionDescription> {
        self.state.lock().local.clone()
    }

    async fn send(&self, text: String) -> TransportResult<()> {
        let mut state = self.state.lock();
        state.calls.push(MockCall::Send(text.clone()));
        state.check(MockStep::Send)?;
        if let Some(linked) = &state.linked {
            let _ = linked.send(TransportEvent::DataChannelMessage(text));
        }
        Ok(())
    }

    async fn close(&self) {
        let mut state = self.state.lock();
        state.calls.push(MockCall::Close);
        state.closed = true;
        state.linked = None;
    }
}

// ── Controller ─────────────────────────────────────────────────

/// Test-side handle to one mock primitive.
#[derive(Clone)]
pub struct MockController {
    state: Arc<Mutex<MockState>>,
    events: mpsc::UnboundedSender<TransportEvent>,
}

impl MockController {
    pub fn emit(&self, event: TransportEvent) {
        let _ = self.events.send(event);
    }

    /// Report the data channel as open.
    pub fn open(&self) {
        self.emit(TransportEvent::DataChannelOpen);
    }

    /// Deliver `text` as an inbound data-channel message.
    pub fn deliver(&self, text: impl Into<String>) {
        self.emit(TransportEvent::DataChannelMessage(text.into()));
    }

    pub fn candidate(&self, line: impl Into<String>) {
        self.emit(TransportEvent::IceCandidate(Some(IceCandidate {
            candidate: line.into(),
            sdp_mid: Some("0".into()),
            sdp_mline_index: Some(0),
            username_fragment: None,
        })));
    }

    pub fn gathering_complete(&self) {
        self.emit(TransportEvent::IceGatheringStateChange(IceGatheringState::Complete));
    }

    /// Make `step` fail from now on.
    pub fn fail(&self, step: MockStep) {
        self.state.lock().failures.insert(step);
    }

    pub fn recover(&self, step: MockStep) {
        self.state.lock().failures.remove(&step);
    }

    /// Cross-wire two primitives and open both data channels.
    pub fn link(&self, other: &MockController) {
        self.state.lock().linked = Some(other.events.clone());
        other.state.lock().linked = Some(self.events.clone());
        self.open();
        other.open();
    }

    pub fn options(&self) -> ConnectionOptions {
        self.state.lock().options.clone()
    }

    pub fn calls(&self) -> Vec<MockCall> {
        self.state.lock().calls.clone()
    }

    pub fn sent(&self) -> Vec<String> {
        self.state
            .lock()
            .calls
            .iter()
            .filter_map(|c| match c {
                MockCall::Send(text) => Some(text.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn offers_created(&self) -> usize {
        self.state.lock().offers
    }

    pub fn local_description(&self) -> Option<SessionDescription> {
        self.state.lock().local.clone()
    }

    pub fn remote_description(&self) -> Option<SessionDescription> {
        self.state.lock().remote.clone()
    }

    pub fn signaling_state(&self) -> SignalingState {
        self.state.lock().signaling
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }
}

// ── Factory ────────────────────────────────────────────────────

#[derive(Default)]
struct FactoryState {
    controllers: Vec<MockController>,
    failures: HashSet<MockStep>,
    unsupported: bool,
}

/// Factory handing out mock primitives. Initiator primitives raise
/// `NegotiationNeeded` immediately, as a real one does when its default data
/// channel is created.
#[derive(Clone, Default)]
pub struct MockConnectionFactory {
    state: Arc<Mutex<FactoryState>>,
}

impl MockConnectionFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// A factory whose `create` always fails with `UnsupportedTransport`.
    pub fn unsupported() -> Self {
        let factory = Self::default();
        factory.state.lock().unsupported = true;
        factory
    }

    /// Every primitive created from now on fails at `step`.
    pub fn fail_all(&self, step: MockStep) {
        self.state.lock().failures.insert(step);
    }

    pub fn controllers(&self) -> Vec<MockController> {
        self.state.lock().controllers.clone()
    }

    pub fn created(&self) -> usize {
        self.state.lock().controllers.len()
    }
}

#[async_trait]
impl PeerConnectionFactory for MockConnectionFactory {
    async fn create(&self, options: &ConnectionOptions) -> Result<TransportParts> {
        let failures = {
            let state = self.state.lock();
            if state.unsupported {
                return Err(MeshError::new(
                    ErrorKind::UnsupportedTransport,
                    "mock factory has no transport",
                ));
            }
            state.failures.clone()
        };
        let (parts, controller) = mock_connection_with(options, failures);
        if options.is_initiator {
            controller.emit(TransportEvent::NegotiationNeeded);
        }
        self.state.lock().controllers.push(controller);
        Ok(parts)
    }
}
