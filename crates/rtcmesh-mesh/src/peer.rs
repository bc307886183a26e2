use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::RwLock;
use rtcmesh_core::{
    CorrelationId, DataChannelConfig, Envelope, MeshError, PeerConnectionConfig, PeerName, Result,
};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::channel::{self, Channel, ChannelHandle};
use crate::correlation::CorrelationRegistry;
use crate::fallback::FallbackChannel;
use crate::negotiation::{ChannelEvent, ChannelOptions, NegotiationChannel, SdpTransformer};
use crate::transport::{ConnectionOptions, PeerConnectionFactory, TransportEvent};

/// What a peer reports to its owner.
#[derive(Debug, Clone)]
pub enum PeerEvent {
    Signal(Value),
    Connect,
    Error(MeshError),
    Close,
    /// Non-response envelope from the remote side.
    Request(InboundRequest),
    /// Envelope to forward through the signaling relay.
    Relay(Envelope),
}

pub type PeerEventSink = mpsc::UnboundedSender<(PeerName, PeerEvent)>;

#[derive(Debug, Clone)]
pub struct PeerOptions {
    pub is_initiator: bool,
    pub trickle_ice: bool,
    pub fallback_delay: Duration,
    pub request_timeout: Duration,
    pub peer_connection: PeerConnectionConfig,
    pub data_channel: DataChannelConfig,
    pub streams: Vec<String>,
    pub sdp_transformer: SdpTransformer,
}

impl Default for PeerOptions {
    fn default() -> Self {
        Self {
            is_initiator: false,
            trickle_ice: true,
            fallback_delay: Duration::from_millis(5000),
            request_timeout: Duration::from_millis(10_000),
            peer_connection: PeerConnectionConfig::default(),
            data_channel: DataChannelConfig::default(),
            streams: Vec::new(),
            sdp_transformer: SdpTransformer::identity(),
        }
    }
}

/// One remote participant: a fallback-capable channel plus envelope framing,
/// request/response correlation and the remote's known subscriptions.
#[derive(Clone)]
pub struct Peer {
    inner: Arc<PeerInner>,
}

struct PeerInner {
    name: PeerName,
    channel: ChannelHandle,
    registry: CorrelationRegistry,
    subscriptions: RwLock<HashSet<String>>,
    request_timeout: Duration,
}

impl Peer {
    /// Build the transport primitive through `factory` and start negotiating.
    pub async fn connect(
        name: PeerName,
        factory: &dyn PeerConnectionFactory,
        options: &PeerOptions,
        sink: PeerEventSink,
    ) -> Result<Peer> {
        let parts = factory
            .create(&ConnectionOptions {
                is_initiator: options.is_initiator,
                trickle_ice: options.trickle_ice,
                peer_connection: options.peer_connection.clone(),
                data_channel: options.data_channel.clone(),
                streams: options.streams.clone(),
            })
            .await?;
        let negotiation = NegotiationChannel::new(
            parts.connection,
            ChannelOptions {
                is_initiator: options.is_initiator,
                trickle_ice: options.trickle_ice,
                sdp_transformer: options.sdp_transformer.clone(),
            },
        );
        let channel = Channel::Fallback(FallbackChannel::new(negotiation, options.fallback_delay));
        info!(peer = %name, initiator = options.is_initiator, "peer created");
        Ok(Self::with_channel(name, channel, parts.events, options.request_timeout, sink))
    }

    /// Drive an already built channel.
    pub fn with_channel(
        name: PeerName,
        channel: Channel,
        transport: mpsc::UnboundedReceiver<TransportEvent>,
        request_timeout: Duration,
        sink: PeerEventSink,
    ) -> Peer {
        let (handle, events) = channel::spawn(channel, transport);
        let peer = Peer {
            inner: Arc::new(PeerInner {
                name,
                channel: handle,
                registry: CorrelationRegistry::new(),
                subscriptions: RwLock::new(HashSet::new()),
                request_timeout,
            }),
        };
        tokio::spawn(pump(peer.clone(), events, sink));
        peer
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn channel(&self) -> &ChannelHandle {
        &self.inner.channel
    }

    pub fn is_connected(&self) -> bool {
        self.inner.channel.is_connected()
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.channel.is_destroyed()
    }

    pub fn is_relayed(&self) -> bool {
        self.inner.channel.is_relayed()
    }

    pub fn pending_requests(&self) -> usize {
        self.inner.registry.len()
    }

    pub fn signal(&self, data: Value) -> Result<()> {
        self.inner.channel.signal(data)
    }

    pub fn destroy(&self, err: Option<MeshError>) {
        self.inner.channel.destroy(err);
    }

    // ── Subscriptions ──────────────────────────────────────────

    /// Topics the remote side is known to be subscribed to, sorted.
    pub fn subscriptions(&self) -> Vec<String> {
        let mut topics: Vec<String> = self.inner.subscriptions.read().iter().cloned().collect();
        topics.sort();
        topics
    }

    pub fn is_subscribed(&self, topic: &str) -> bool {
        self.inner.subscriptions.read().contains(topic)
    }

    pub fn set_subscribed(&self, topic: &str, subscribed: bool) {
        let mut subscriptions = self.inner.subscriptions.write();
        if subscribed {
            subscriptions.insert(topic.to_string());
        } else {
            subscriptions.remove(topic);
        }
    }

    // ── RPC ────────────────────────────────────────────────────

    /// Send a request and wait for the matching `response` envelope.
    /// `timeout` defaults to the peer's request timeout.
    pub async fn send(
        &self,
        kind: impl Into<String>,
        payload: Value,
        timeout: Option<Duration>,
    ) -> Result<Value> {
        if self.is_destroyed() {
            return Err(MeshError::destroyed("cannot call send after peer is destroyed"));
        }
        let envelope = Envelope::request(kind, payload);
        let text = envelope.to_text()?;
        let pending = self.inner.registry.register(
            envelope.id.clone(),
            timeout.unwrap_or(self.inner.request_timeout),
        );
        debug!(peer = %self.inner.name, id = %envelope.id, kind = %envelope.kind, "sending request");

        if let Err(e) = self.inner.channel.send(text).await {
            self.inner.registry.cancel(&envelope.id);
            return Err(e);
        }
        pending.wait().await
    }

    fn dispatch(&self, text: &str, sink: &PeerEventSink) {
        let envelope = match Envelope::from_text(text) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(peer = %self.inner.name, error = %e, "dropping unparseable envelope");
                return;
            }
        };

        if envelope.is_response() {
            if !self.inner.registry.resolve(&envelope.id, envelope.payload) {
                debug!(peer = %self.inner.name, id = %envelope.id, "no pending request for response");
            }
            return;
        }

        debug!(peer = %self.inner.name, id = %envelope.id, kind = %envelope.kind, "inbound request");
        let request = InboundRequest {
            peer: self.inner.name.clone(),
            responder: Responder {
                peer: self.inner.name.clone(),
                id: envelope.id.clone(),
                channel: self.inner.channel.clone(),
                sent: Arc::new(AtomicBool::new(false)),
            },
            id: envelope.id,
            kind: envelope.kind,
            payload: envelope.payload,
        };
        let _ = sink.send((self.inner.name.clone(), PeerEvent::Request(request)));
    }
}

impl std::fmt::Debug for Peer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Peer")
            .field("name", &self.inner.name)
            .field("connected", &self.is_connected())
            .field("relayed", &self.is_relayed())
            .finish()
    }
}

/// Translate channel events into peer events until the channel closes.
async fn pump(peer: Peer, mut events: mpsc::UnboundedReceiver<ChannelEvent>, sink: PeerEventSink) {
    let name = peer.inner.name.clone();
    while let Some(event) = events.recv().await {
        let out = match event {
            ChannelEvent::Data(text) => {
                peer.dispatch(&text, &sink);
                continue;
            }
            ChannelEvent::RelaySend(text) => match Envelope::from_text(&text) {
                Ok(envelope) => PeerEvent::Relay(envelope),
                Err(e) => {
                    warn!(peer = %name, error = %e, "cannot relay malformed envelope");
                    continue;
                }
            },
            ChannelEvent::Signal(signal) => PeerEvent::Signal(signal),
            ChannelEvent::Connect => PeerEvent::Connect,
            ChannelEvent::Error(e) => PeerEvent::Error(e),
            ChannelEvent::Close => {
                let rejected = peer
                    .inner
                    .registry
                    .reject_all(&MeshError::destroyed(format!("peer '{name}' closed")));
                if rejected > 0 {
                    debug!(peer = %name, rejected, "rejected pending requests on close");
                }
                PeerEvent::Close
            }
        };
        let _ = sink.send((name.clone(), out));
    }
}

// ── Inbound requests ───────────────────────────────────────────

/// Sends the single `response` envelope for one inbound request.
#[derive(Debug, Clone)]
pub struct Responder {
    peer: PeerName,
    id: CorrelationId,
    channel: ChannelHandle,
    sent: Arc<AtomicBool>,
}

impl Responder {
    /// Reply to the request. Only the first call sends; later calls warn and return `Ok`.
    pub async fn send(&self, payload: Value) -> Result<()> {
        if self.sent.swap(true, Ordering::SeqCst) {
            warn!(peer = %self.peer, id = %self.id, "Already sent response");
            return Ok(());
        }
        let text = Envelope::response(self.id.clone(), payload).to_text()?;
        self.channel.send(text).await
    }

    pub fn is_sent(&self) -> bool {
        self.sent.load(Ordering::SeqCst)
    }
}

/// A request envelope received from a peer.
#[derive(Debug, Clone)]
pub struct InboundRequest {
    pub peer: PeerName,
    pub id: CorrelationId,
    pub kind: String,
    pub payload: Value,
    pub responder: Responder,
}

impl InboundRequest {
    pub async fn respond(&self, payload: Value) -> Result<()> {
        self.responder.send(payload).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockConnectionFactory, MockController};
    use rtcmesh_core::ErrorKind;
    use serde_json::json;

    async fn connected_peer(
        factory: &MockConnectionFactory,
    ) -> (Peer, MockController, mpsc::UnboundedReceiver<(PeerName, PeerEvent)>) {
        let (sink, mut rx) = mpsc::unbounded_channel();
        let options = PeerOptions {
            is_initiator: true,
            ..Default::default()
        };
        let peer = Peer::connect("remote".into(), factory, &options, sink).await.unwrap();
        let controller = factory.controllers().pop().unwrap();
        controller.open();
        loop {
            match rx.recv().await {
                Some((_, PeerEvent::Connect)) => break,
                Some(_) => continue,
                None => panic!("peer events ended"),
            }
        }
        (peer, controller, rx)
    }

    async fn next_sent(controller: &MockController, count: usize) -> String {
        loop {
            let sent = controller.sent();
            if sent.len() >= count {
                return sent[count - 1].clone();
            }
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn request_resolves_with_response() {
        let factory = MockConnectionFactory::new();
        let (peer, controller, _rx) = connected_peer(&factory).await;

        let call = tokio::spawn({
            let peer = peer.clone();
            async move { peer.send("ping", json!({"n": 1}), None).await }
        });

        let request = Envelope::from_text(&next_sent(&controller, 1).await).unwrap();
        assert_eq!(request.kind, "ping");
        let response = Envelope::response(request.id.clone(), json!("pong"));
        controller.deliver(response.to_text().unwrap());
        // Duplicate response is ignored.
        controller.deliver(response.to_text().unwrap());

        assert_eq!(call.await.unwrap().unwrap(), json!("pong"));
        assert_eq!(peer.pending_requests(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn request_times_out() {
        let factory = MockConnectionFactory::new();
        let (peer, _controller, _rx) = connected_peer(&factory).await;

        let started = tokio::time::Instant::now();
        let err = peer
            .send("ping", json!(null), Some(Duration::from_millis(300)))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::RequestTimeout);
        assert!(started.elapsed() >= Duration::from_millis(300));
        assert!(!peer.is_destroyed());
    }

    #[tokio::test]
    async fn inbound_request_responds_once() {
        let factory = MockConnectionFactory::new();
        let (_peer, controller, mut rx) = connected_peer(&factory).await;

        let request = Envelope::request("hello", json!({"who": "me"}));
        controller.deliver(request.to_text().unwrap());

        let inbound = loop {
            match rx.recv().await {
                Some((_, PeerEvent::Request(req))) => break req,
                Some(_) => continue,
                None => panic!("peer events ended"),
            }
        };
        assert_eq!(inbound.kind, "hello");
        assert_eq!(inbound.peer, "remote");
        assert_eq!(inbound.payload["who"], "me");

        inbound.respond(json!("hi")).await.unwrap();
        inbound.respond(json!("again")).await.unwrap();
        assert!(inbound.responder.is_sent());

        let sent = controller.sent();
        assert_eq!(sent.len(), 1);
        let response = Envelope::from_text(&sent[0]).unwrap();
        assert!(response.is_response());
        assert_eq!(response.id, request.id);
        assert_eq!(response.payload, json!("hi"));
    }

    #[tokio::test]
    async fn close_rejects_pending_requests() {
        let factory = MockConnectionFactory::new();
        let (peer, controller, _rx) = connected_peer(&factory).await;

        let call = tokio::spawn({
            let peer = peer.clone();
            async move { peer.send("ping", json!(null), None).await }
        });
        next_sent(&controller, 1).await;
        peer.destroy(None);

        let err = call.await.unwrap().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::OperationAfterDestroy);
        assert!(peer.is_destroyed());
        let err = peer.send("ping", json!(null), None).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::OperationAfterDestroy);
    }

    #[tokio::test]
    async fn unsupported_transport_fails_connect() {
        let factory = MockConnectionFactory::unsupported();
        let (sink, _rx) = mpsc::unbounded_channel();
        let err = Peer::connect("x".into(), &factory, &PeerOptions::default(), sink)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnsupportedTransport);
    }

    #[tokio::test]
    async fn subscriptions_track_remote_topics() {
        let factory = MockConnectionFactory::new();
        let (peer, _controller, _rx) = connected_peer(&factory).await;
        peer.set_subscribed("news", true);
        peer.set_subscribed("sports", true);
        peer.set_subscribed("sports", false);
        assert!(peer.is_subscribed("news"));
        assert_eq!(peer.subscriptions(), vec!["news".to_string()]);
    }
}
