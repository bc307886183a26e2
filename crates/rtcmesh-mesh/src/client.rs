//! Mesh coordination: discovery, signaling relay, addressed and broadcast
//! RPC, and topic pub/sub over the set of connected peers.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use rtcmesh_core::{
    DataChannelConfig, Emitter, MeshError, PeerConnectionConfig, PeerName, PeerRef,
    RelayedEnvelope, RelayedSignal, Result, SignalingMessage,
};
use serde_json::{Map, Value, json};
use tokio::sync::{Notify, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::negotiation::SdpTransformer;
use crate::peer::{InboundRequest, Peer, PeerEvent, PeerEventSink, PeerOptions};
use crate::race::{all_successes, race_to_success};
use crate::signaling::{SignalingEvent, SignalingHandle};
use crate::transport::PeerConnectionFactory;

const SUBSCRIBE: &str = "subscribe";
const UNSUBSCRIBE: &str = "unsubscribe";

/// Settings for one mesh participant.
#[derive(Debug, Clone)]
pub struct MeshOptions {
    pub signal_server: String,
    pub peer_connection: PeerConnectionConfig,
    pub data_channel: DataChannelConfig,
    pub fallback_delay: Duration,
    pub request_timeout: Duration,
    pub trickle_ice: bool,
    pub keepalive_interval: Duration,
    pub sdp_transformer: SdpTransformer,
    /// Local stream ids attached to every new peer.
    pub streams: Vec<String>,
}

impl Default for MeshOptions {
    fn default() -> Self {
        Self::from(&rtcmesh_config::MeshConfig::default())
    }
}

impl From<&rtcmesh_config::MeshConfig> for MeshOptions {
    fn from(config: &rtcmesh_config::MeshConfig) -> Self {
        Self {
            signal_server: config.signal_server.clone(),
            peer_connection: config.peer_connection.clone(),
            data_channel: config.data_channel.clone(),
            fallback_delay: Duration::from_millis(config.fallback_delay_ms),
            request_timeout: Duration::from_millis(config.request_timeout_ms),
            trickle_ice: config.trickle_ice,
            keepalive_interval: Duration::from_millis(config.keepalive_interval_ms),
            sdp_transformer: SdpTransformer::identity(),
            streams: Vec::new(),
        }
    }
}

impl MeshOptions {
    fn peer_options(&self, is_initiator: bool) -> PeerOptions {
        PeerOptions {
            is_initiator,
            trickle_ice: self.trickle_ice,
            fallback_delay: self.fallback_delay,
            request_timeout: self.request_timeout,
            peer_connection: self.peer_connection.clone(),
            data_channel: self.data_channel.clone(),
            streams: self.streams.clone(),
            sdp_transformer: self.sdp_transformer.clone(),
        }
    }
}

/// Everything the mesh reports to the application.
#[derive(Debug, Clone)]
pub enum MeshEvent {
    PeerConnect(PeerName),
    PeerClose(PeerName),
    PeerError(PeerName, MeshError),
    PeerSignal(PeerName, Value),
    /// Application request from a peer. Answer it with [`InboundRequest::respond`].
    Request(InboundRequest),
    SignalingClosed,
}

struct ClientInner {
    name: PeerName,
    options: MeshOptions,
    factory: Arc<dyn PeerConnectionFactory>,
    signaling: SignalingHandle,
    peers: RwLock<HashMap<PeerName, Peer>>,
    subscriptions: RwLock<Vec<String>>,
    events: Emitter<MeshEvent>,
    peer_sink: PeerEventSink,
    shutdown: Notify,
    stopping: AtomicBool,
    task: Mutex<Option<JoinHandle<()>>>,
}

/// A participant in the mesh. Cheap to clone.
#[derive(Clone)]
pub struct MeshClient {
    inner: Arc<ClientInner>,
}

impl MeshClient {
    /// Join the mesh as `peer_name` and start the coordination loop.
    ///
    /// Returns the client and a first event listener, subscribed before the
    /// loop starts so no event is missed.
    pub fn start(
        peer_name: impl Into<PeerName>,
        options: MeshOptions,
        factory: Arc<dyn PeerConnectionFactory>,
        signaling: SignalingHandle,
        signaling_events: mpsc::UnboundedReceiver<SignalingEvent>,
    ) -> (MeshClient, mpsc::UnboundedReceiver<MeshEvent>) {
        let (peer_sink, peer_events) = mpsc::unbounded_channel();
        let inner = Arc::new(ClientInner {
            name: peer_name.into(),
            options,
            factory,
            signaling,
            peers: RwLock::new(HashMap::new()),
            subscriptions: RwLock::new(Vec::new()),
            events: Emitter::new(),
            peer_sink,
            shutdown: Notify::new(),
            stopping: AtomicBool::new(false),
            task: Mutex::new(None),
        });
        let events = inner.events.subscribe();
        let task = tokio::spawn(run_mesh_loop(
            Arc::clone(&inner),
            Some(signaling_events),
            peer_events,
        ));
        *inner.task.lock() = Some(task);
        info!(peer = %inner.name, "mesh client started");
        (MeshClient { inner }, events)
    }

    /// An additional event listener.
    pub fn events(&self) -> mpsc::UnboundedReceiver<MeshEvent> {
        self.inner.events.subscribe()
    }

    // ── Inspection ─────────────────────────────────────────────

    pub fn peer_name(&self) -> &str {
        &self.inner.name
    }

    pub fn options(&self) -> &MeshOptions {
        &self.inner.options
    }

    /// Names of every registered peer, sorted.
    pub fn peers(&self) -> Vec<PeerName> {
        let mut names: Vec<PeerName> = self.inner.peers.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn connected_peers(&self) -> Vec<PeerName> {
        let mut names: Vec<PeerName> = self
            .connected()
            .iter()
            .map(|p| p.name().to_string())
            .collect();
        names.sort();
        names
    }

    /// Snapshot of the connected peers, taken and released under the registry lock.
    fn connected(&self) -> Vec<Peer> {
        self.inner
            .peers
            .read()
            .values()
            .filter(|p| p.is_connected())
            .cloned()
            .collect()
    }

    pub fn peer(&self, name: &str) -> Option<Peer> {
        self.inner.peers.read().get(name).cloned()
    }

    /// Topics this node is subscribed to.
    pub fn subscriptions(&self) -> Vec<String> {
        self.inner.subscriptions.read().clone()
    }

    /// Topics `name` last reported being subscribed to.
    pub fn peer_subscriptions(&self, name: &str) -> Option<Vec<String>> {
        self.peer(name).map(|p| p.subscriptions())
    }

    pub fn is_relayed(&self, name: &str) -> Option<bool> {
        self.peer(name).map(|p| p.is_relayed())
    }

    // ── Messaging ──────────────────────────────────────────────

    /// Request/response call to one peer.
    pub async fn send(
        &self,
        peer: &str,
        kind: impl Into<String>,
        payload: Value,
        timeout: Option<Duration>,
    ) -> Result<Value> {
        let peer = self.peer(peer).ok_or_else(|| MeshError::unknown_peer(peer))?;
        peer.send(kind, payload, timeout).await
    }

    /// Call every connected peer and resolve with the first success.
    pub async fn broadcast(
        &self,
        kind: impl Into<String>,
        payload: Value,
        timeout: Option<Duration>,
    ) -> Result<Value> {
        self.broadcast_where(kind, payload, |_| true, timeout).await
    }

    /// [`MeshClient::broadcast`] restricted to connected peers accepted by `filter`.
    ///
    /// Fails with `NoEligiblePeers` without sending anything when no peer
    /// qualifies, and with `AllPeersFailed` carrying each peer's error when
    /// every call fails.
    pub async fn broadcast_where<F>(
        &self,
        kind: impl Into<String>,
        payload: Value,
        filter: F,
        timeout: Option<Duration>,
    ) -> Result<Value>
    where
        F: Fn(&Peer) -> bool,
    {
        let kind = kind.into();
        // `filter` may call back into the client, so it runs without the registry lock.
        let targets: Vec<Peer> = self
            .connected()
            .into_iter()
            .filter(|p| filter(p))
            .collect();
        if targets.is_empty() {
            return Err(MeshError::no_peers());
        }
        debug!(kind = %kind, peers = targets.len(), "broadcasting");

        let calls = targets.iter().map(|peer| {
            let kind = kind.clone();
            let payload = payload.clone();
            async move {
                peer.send(kind, payload, timeout)
                    .await
                    .map_err(|e| (peer.name().to_string(), e))
            }
        });
        race_to_success(calls).await.map_err(MeshError::all_failed)
    }

    /// [`MeshClient::broadcast`] to peers known to be subscribed to `topic`.
    pub async fn publish(
        &self,
        topic: &str,
        kind: impl Into<String>,
        payload: Value,
        timeout: Option<Duration>,
    ) -> Result<Value> {
        self.broadcast_where(kind, payload, |p| p.is_subscribed(topic), timeout)
            .await
    }

    // ── Pub/sub ────────────────────────────────────────────────

    /// Subscribe locally and tell every connected peer. Returns the
    /// acknowledgements that arrived; failed peers are omitted.
    pub async fn subscribe(&self, topic: &str, data: Option<Value>) -> Vec<bool> {
        {
            let mut subscriptions = self.inner.subscriptions.write();
            if !subscriptions.iter().any(|t| t == topic) {
                subscriptions.push(topic.to_string());
            }
        }
        info!(topic = %topic, "subscribed");
        self.announce(SUBSCRIBE, topic, data).await
    }

    pub async fn unsubscribe(&self, topic: &str, data: Option<Value>) -> Vec<bool> {
        self.inner.subscriptions.write().retain(|t| t != topic);
        info!(topic = %topic, "unsubscribed");
        self.announce(UNSUBSCRIBE, topic, data).await
    }

    async fn announce(&self, kind: &str, topic: &str, data: Option<Value>) -> Vec<bool> {
        let payload = control_payload(topic, data);
        let targets = self.connected();

        let calls = targets.iter().map(|peer| {
            let payload = payload.clone();
            async move {
                let reply = peer.send(kind, payload, None).await?;
                let subscribed = reply.as_bool().unwrap_or(false);
                peer.set_subscribed(topic, subscribed);
                Ok::<_, MeshError>(subscribed)
            }
        });
        all_successes(calls).await
    }

    // ── Lifecycle ──────────────────────────────────────────────

    /// Destroy every peer and stop the coordination loop.
    pub async fn shutdown(&self) {
        if self.inner.stopping.swap(true, Ordering::SeqCst) {
            return;
        }
        info!(peer = %self.inner.name, "mesh client shutting down");
        self.inner.shutdown.notify_one();
        let task = self.inner.task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.stopping.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for MeshClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MeshClient")
            .field("name", &self.inner.name)
            .field("peers", &self.peers())
            .finish()
    }
}

/// `{topic, ...data}`. Non-object `data` is ignored.
fn control_payload(topic: &str, data: Option<Value>) -> Value {
    let mut body = match data {
        Some(Value::Object(map)) => map,
        _ => Map::new(),
    };
    body.insert("topic".into(), json!(topic));
    Value::Object(body)
}

// ── Coordination loop ──────────────────────────────────────────

enum Step {
    Signaling(Option<SignalingEvent>),
    Peer(Option<(PeerName, PeerEvent)>),
    Shutdown,
}

async fn run_mesh_loop(
    inner: Arc<ClientInner>,
    mut signaling: Option<mpsc::UnboundedReceiver<SignalingEvent>>,
    mut peer_events: mpsc::UnboundedReceiver<(PeerName, PeerEvent)>,
) {
    let mut draining = false;
    loop {
        let step = tokio::select! {
            event = next_signaling_event(&mut signaling) => Step::Signaling(event),
            event = peer_events.recv() => Step::Peer(event),
            _ = inner.shutdown.notified(), if !draining => Step::Shutdown,
        };

        match step {
            Step::Signaling(Some(SignalingEvent::Closed) | None) => {
                signaling = None;
                handle_signaling(&inner, SignalingEvent::Closed).await;
            }
            Step::Signaling(Some(event)) => handle_signaling(&inner, event).await,
            Step::Peer(Some((name, event))) => handle_peer_event(&inner, name, event),
            Step::Peer(None) => break,
            Step::Shutdown => {
                draining = true;
                signaling = None;
                let peers: Vec<Peer> = inner.peers.read().values().cloned().collect();
                for peer in peers {
                    peer.destroy(None);
                }
            }
        }

        if draining && inner.peers.read().is_empty() {
            break;
        }
    }
    inner.events.close();
    info!(peer = %inner.name, "mesh client stopped");
}

async fn next_signaling_event(
    signaling: &mut Option<mpsc::UnboundedReceiver<SignalingEvent>>,
) -> Option<SignalingEvent> {
    match signaling {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn handle_signaling(inner: &Arc<ClientInner>, event: SignalingEvent) {
    match event {
        SignalingEvent::Open => {
            debug!(peer = %inner.name, "announcing to signaling server");
            if let Err(e) = inner.signaling.send(SignalingMessage::Discover(PeerRef {
                peer_name: inner.name.clone(),
            })) {
                warn!(error = %e, "failed to send discover");
            }
        }
        SignalingEvent::Message(message) => match message {
            SignalingMessage::Discovered(PeerRef { peer_name }) => {
                if peer_name == inner.name {
                    return;
                }
                let known = inner
                    .peers
                    .read()
                    .get(&peer_name)
                    .is_some_and(|p| !p.is_destroyed());
                if known {
                    debug!(peer = %peer_name, "already connected to discovered peer");
                    return;
                }
                info!(peer = %peer_name, "discovered");
                create_peer(inner, peer_name, true).await;
            }
            SignalingMessage::Signal(RelayedSignal { peer_name, signal }) => {
                debug!(peer = %peer_name, "signal received");
                let existing = inner
                    .peers
                    .read()
                    .get(&peer_name)
                    .filter(|p| !p.is_destroyed())
                    .cloned();
                let peer = match existing {
                    Some(peer) => Some(peer),
                    None => create_peer(inner, peer_name.clone(), false).await,
                };
                if let Some(peer) = peer
                    && let Err(e) = peer.signal(signal)
                {
                    warn!(peer = %peer_name, error = %e, "failed to forward signal");
                }
            }
            SignalingMessage::Data(RelayedEnvelope { peer_name, envelope }) => {
                let peer = inner.peers.read().get(&peer_name).cloned();
                match (peer, envelope.to_text()) {
                    (Some(peer), Ok(text)) => peer.channel().relay_data(text),
                    (None, _) => warn!(peer = %peer_name, "relayed data for unknown peer"),
                    (_, Err(e)) => warn!(peer = %peer_name, error = %e, "cannot re-encode relayed envelope"),
                }
            }
            SignalingMessage::Disconnected(PeerRef { peer_name }) => {
                let peer = inner.peers.read().get(&peer_name).cloned();
                match peer {
                    Some(peer) => {
                        info!(peer = %peer_name, "peer left the signaling server");
                        peer.channel().relay_disconnected();
                    }
                    None => debug!(peer = %peer_name, "disconnect for unknown peer"),
                }
            }
            other @ (SignalingMessage::Discover(_) | SignalingMessage::Ping) => {
                debug!(kind = other.type_name(), "ignoring client-bound message");
            }
        },
        SignalingEvent::Closed => {
            warn!(peer = %inner.name, "signaling connection closed");
            let peers: Vec<Peer> = inner.peers.read().values().cloned().collect();
            for peer in peers {
                peer.channel().relay_disconnected();
            }
            inner.events.emit(MeshEvent::SignalingClosed);
        }
    }
}

async fn create_peer(inner: &Arc<ClientInner>, name: PeerName, is_initiator: bool) -> Option<Peer> {
    if inner.stopping.load(Ordering::SeqCst) {
        return None;
    }
    let options = inner.options.peer_options(is_initiator);
    match Peer::connect(
        name.clone(),
        inner.factory.as_ref(),
        &options,
        inner.peer_sink.clone(),
    )
    .await
    {
        Ok(peer) => {
            inner.peers.write().insert(name, peer.clone());
            Some(peer)
        }
        Err(e) => {
            warn!(peer = %name, error = %e, "failed to create peer");
            inner.events.emit(MeshEvent::PeerError(name, e));
            None
        }
    }
}

fn handle_peer_event(inner: &Arc<ClientInner>, name: PeerName, event: PeerEvent) {
    match event {
        PeerEvent::Signal(signal) => {
            if let Err(e) = inner.signaling.send(SignalingMessage::Signal(RelayedSignal {
                peer_name: name.clone(),
                signal: signal.clone(),
            })) {
                warn!(peer = %name, error = %e, "failed to relay signal");
            }
            inner.events.emit(MeshEvent::PeerSignal(name, signal));
        }
        PeerEvent::Relay(envelope) => {
            if let Err(e) = inner.signaling.send(SignalingMessage::Data(RelayedEnvelope {
                peer_name: name.clone(),
                envelope,
            })) {
                warn!(peer = %name, error = %e, "failed to relay data");
            }
        }
        PeerEvent::Connect => {
            info!(peer = %name, "peer connected");
            inner.events.emit(MeshEvent::PeerConnect(name));
        }
        PeerEvent::Error(e) => {
            warn!(peer = %name, error = %e, "peer error");
            inner.events.emit(MeshEvent::PeerError(name, e));
        }
        PeerEvent::Close => {
            {
                let mut peers = inner.peers.write();
                if peers.get(&name).is_some_and(|p| p.is_destroyed()) {
                    peers.remove(&name);
                }
            }
            info!(peer = %name, "peer closed");
            inner.events.emit(MeshEvent::PeerClose(name));
        }
        PeerEvent::Request(request) if request.kind == SUBSCRIBE || request.kind == UNSUBSCRIBE => {
            handle_control(inner, request);
        }
        PeerEvent::Request(request) => {
            inner.events.emit(MeshEvent::Request(request));
        }
    }
}

/// Answer a `subscribe`/`unsubscribe` request: record the requester's
/// interest and reply whether this node holds the topic too.
fn handle_control(inner: &Arc<ClientInner>, request: InboundRequest) {
    let topic = request.payload.get("topic").and_then(Value::as_str);
    let reply = match topic {
        Some(topic) => {
            if let Some(peer) = inner.peers.read().get(&request.peer) {
                peer.set_subscribed(topic, request.kind == SUBSCRIBE);
            }
            debug!(peer = %request.peer, topic = %topic, kind = %request.kind, "remote subscription change");
            inner.subscriptions.read().iter().any(|t| t == topic)
        }
        None => {
            warn!(peer = %request.peer, kind = %request.kind, "control request without topic");
            false
        }
    };
    tokio::spawn(async move {
        if let Err(e) = request.respond(Value::Bool(reply)).await {
            debug!(peer = %request.peer, error = %e, "control response not delivered");
        }
    });
}
