//! In-memory signaling server and helpers shared by the mesh integration tests.
#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rtcmesh_core::{PeerRef, RelayedEnvelope, RelayedSignal, SignalingMessage};
use rtcmesh_mesh::signaling;
use rtcmesh_mesh::{
    InboundRequest, MeshClient, MeshEvent, MeshOptions, PeerConnectionFactory, RelayOnlyFactory,
    SignalingEvent,
};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Routes signaling messages between clients the way the signaling server
/// does: `discover` fans out `discovered`, `signal`/`data` are forwarded with
/// `peerName` rewritten to the sender, and leaving notifies everyone else.
#[derive(Clone, Default)]
pub struct Router {
    clients: Arc<Mutex<HashMap<String, mpsc::UnboundedSender<SignalingEvent>>>>,
    announced: Arc<Mutex<HashSet<String>>>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn join(
        &self,
        name: &str,
        factory: Arc<dyn PeerConnectionFactory>,
        options: MeshOptions,
    ) -> Node {
        let (handle, mut outbound) = signaling::pair();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let _ = event_tx.send(SignalingEvent::Open);
        self.clients.lock().insert(name.to_string(), event_tx);

        let router = self.clone();
        let sender = name.to_string();
        tokio::spawn(async move {
            while let Some(message) = outbound.recv().await {
                router.route(&sender, message);
            }
        });

        let (client, events) = MeshClient::start(name, options, factory, handle, event_rx);
        Node { client, events }
    }

    /// [`Router::join`] and wait until the newcomer's `discover` went out, so
    /// only clients already present act as initiators towards it.
    pub async fn enter(
        &self,
        name: &str,
        factory: Arc<dyn PeerConnectionFactory>,
        options: MeshOptions,
    ) -> Node {
        let node = self.join(name, factory, options);
        until(|| self.announced.lock().contains(name)).await;
        node
    }

    /// Drop `name` from the server: it sees its signaling close, the rest see `disconnected`.
    pub fn leave(&self, name: &str) {
        let mut clients = self.clients.lock();
        if let Some(tx) = clients.remove(name) {
            let _ = tx.send(SignalingEvent::Closed);
        }
        for tx in clients.values() {
            let _ = tx.send(SignalingEvent::Message(SignalingMessage::Disconnected(PeerRef {
                peer_name: name.to_string(),
            })));
        }
    }

    fn route(&self, sender: &str, message: SignalingMessage) {
        let clients = self.clients.lock();
        if !clients.contains_key(sender) {
            return;
        }
        match message {
            SignalingMessage::Discover(_) => {
                self.announced.lock().insert(sender.to_string());
                for (_, tx) in clients.iter().filter(|(name, _)| name.as_str() != sender) {
                    let _ = tx.send(SignalingEvent::Message(SignalingMessage::Discovered(PeerRef {
                        peer_name: sender.to_string(),
                    })));
                }
            }
            SignalingMessage::Signal(RelayedSignal { peer_name, signal }) => {
                if let Some(tx) = clients.get(&peer_name) {
                    let _ = tx.send(SignalingEvent::Message(SignalingMessage::Signal(RelayedSignal {
                        peer_name: sender.to_string(),
                        signal,
                    })));
                }
            }
            SignalingMessage::Data(RelayedEnvelope { peer_name, envelope }) => {
                if let Some(tx) = clients.get(&peer_name) {
                    let _ = tx.send(SignalingEvent::Message(SignalingMessage::Data(RelayedEnvelope {
                        peer_name: sender.to_string(),
                        envelope,
                    })));
                }
            }
            _ => {}
        }
    }
}

pub struct Node {
    pub client: MeshClient,
    pub events: mpsc::UnboundedReceiver<MeshEvent>,
}

pub fn relay_only() -> Arc<dyn PeerConnectionFactory> {
    Arc::new(RelayOnlyFactory)
}

/// Join every name through relay-only transports and wait until the mesh is complete.
pub async fn relay_mesh(router: &Router, names: &[&str]) -> Vec<Node> {
    let mut nodes = Vec::new();
    for name in names {
        nodes.push(router.enter(name, relay_only(), MeshOptions::default()).await);
    }
    let clients: Vec<MeshClient> = nodes.iter().map(|n| n.client.clone()).collect();
    until(|| clients.iter().all(|c| c.connected_peers().len() == names.len() - 1)).await;
    nodes
}

/// Poll `cond` on virtual time until it holds.
pub async fn until(mut cond: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(600), async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition never held");
}

/// Next event matching `pred`, skipping the rest.
pub async fn next_event(
    events: &mut mpsc::UnboundedReceiver<MeshEvent>,
    mut pred: impl FnMut(&MeshEvent) -> bool,
) -> MeshEvent {
    tokio::time::timeout(Duration::from_secs(600), async {
        loop {
            match events.recv().await {
                Some(event) if pred(&event) => return event,
                Some(_) => continue,
                None => panic!("mesh event stream ended"),
            }
        }
    })
    .await
    .expect("timed out waiting for mesh event")
}

/// Answer application requests on `client` with `reply`; `None` leaves a request unanswered.
pub fn serve<F>(client: &MeshClient, reply: F) -> JoinHandle<()>
where
    F: Fn(&InboundRequest) -> Option<Value> + Send + 'static,
{
    let mut events = client.events();
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            if let MeshEvent::Request(request) = event
                && let Some(payload) = reply(&request)
            {
                let _ = request.respond(payload).await;
            }
        }
    })
}

/// Requests already delivered to `events`, without waiting.
pub fn drain_requests(events: &mut mpsc::UnboundedReceiver<MeshEvent>) -> Vec<InboundRequest> {
    let mut requests = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let MeshEvent::Request(request) = event {
            requests.push(request);
        }
    }
    requests
}
