//! Runtime channel abstraction and the task that drives it.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use rtcmesh_core::{MeshError, Result};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::fallback::FallbackChannel;
use crate::negotiation::{ChannelEvent, NegotiationChannel};
use crate::transport::TransportEvent;

/// A logical channel: either a bare negotiated channel or one that can
/// degrade to the signaling relay.
pub enum Channel {
    Direct(NegotiationChannel),
    Fallback(FallbackChannel),
}

impl Channel {
    pub fn is_connected(&self) -> bool {
        match self {
            Channel::Direct(ch) => ch.is_connected(),
            Channel::Fallback(ch) => ch.is_connected(),
        }
    }

    pub fn is_destroyed(&self) -> bool {
        match self {
            Channel::Direct(ch) => ch.is_destroyed(),
            Channel::Fallback(ch) => ch.is_destroyed(),
        }
    }

    pub fn is_relayed(&self) -> bool {
        match self {
            Channel::Direct(_) => false,
            Channel::Fallback(ch) => ch.is_relayed(),
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        match self {
            Channel::Direct(_) => None,
            Channel::Fallback(ch) => ch.deadline(),
        }
    }

    pub async fn signal(&mut self, data: Value) -> Result<()> {
        match self {
            Channel::Direct(ch) => ch.signal(data).await,
            Channel::Fallback(ch) => ch.signal(data).await,
        }
    }

    pub async fn handle_transport_event(&mut self, event: TransportEvent) {
        match self {
            Channel::Direct(ch) => ch.handle_transport_event(event).await,
            Channel::Fallback(ch) => ch.handle_transport_event(event).await,
        }
    }

    pub async fn send(&mut self, text: String) -> Result<()> {
        match self {
            Channel::Direct(ch) => ch.send(text).await,
            Channel::Fallback(ch) => ch.send(text).await,
        }
    }

    pub async fn destroy(&mut self, err: Option<MeshError>) {
        match self {
            Channel::Direct(ch) => ch.destroy(err).await,
            Channel::Fallback(ch) => ch.destroy(err).await,
        }
    }

    pub async fn on_deadline(&mut self) {
        if let Channel::Fallback(ch) = self {
            ch.on_deadline().await;
        }
    }

    pub fn inject_relay_data(&mut self, text: String) {
        match self {
            Channel::Direct(_) => debug!("direct channel dropping relayed data"),
            Channel::Fallback(ch) => ch.inject_relay_data(text),
        }
    }

    pub async fn relay_disconnected(&mut self) {
        if let Channel::Fallback(ch) = self {
            ch.relay_disconnected().await;
        }
    }

    pub fn take_events(&mut self) -> Vec<ChannelEvent> {
        match self {
            Channel::Direct(ch) => ch.take_events(),
            Channel::Fallback(ch) => ch.take_events(),
        }
    }
}

// ── Handle ─────────────────────────────────────────────────────

/// Commands accepted by a running channel.
#[derive(Debug)]
pub enum ChannelCommand {
    Signal(Value),
    Send(String, oneshot::Sender<Result<()>>),
    Destroy(Option<MeshError>),
    RelayData(String),
    RelayDisconnected,
}

#[derive(Debug, Default)]
struct ChannelStatus {
    connected: AtomicBool,
    destroyed: AtomicBool,
    relayed: AtomicBool,
}

impl ChannelStatus {
    fn update(&self, channel: &Channel) {
        self.connected.store(channel.is_connected(), Ordering::SeqCst);
        self.destroyed.store(channel.is_destroyed(), Ordering::SeqCst);
        self.relayed.store(channel.is_relayed(), Ordering::SeqCst);
    }
}

/// Cloneable handle to a channel running on its own task.
///
/// Status flags are updated by the task before it publishes the events that
/// caused the change, so a listener reacting to `Close` always sees
/// `is_destroyed() == true`.
#[derive(Clone, Debug)]
pub struct ChannelHandle {
    commands: mpsc::UnboundedSender<ChannelCommand>,
    status: Arc<ChannelStatus>,
}

impl ChannelHandle {
    pub fn is_connected(&self) -> bool {
        self.status.connected.load(Ordering::SeqCst)
    }

    pub fn is_destroyed(&self) -> bool {
        self.status.destroyed.load(Ordering::SeqCst)
    }

    pub fn is_relayed(&self) -> bool {
        self.status.relayed.load(Ordering::SeqCst)
    }

    /// Forward a negotiation message from the remote side.
    pub fn signal(&self, data: Value) -> Result<()> {
        self.command(ChannelCommand::Signal(data))
    }

    /// Transmit `text` over the direct channel or the relay.
    pub async fn send(&self, text: String) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.command(ChannelCommand::Send(text, tx))?;
        rx.await
            .map_err(|_| MeshError::destroyed("cannot call send after peer is destroyed"))?
    }

    pub fn destroy(&self, err: Option<MeshError>) {
        let _ = self.command(ChannelCommand::Destroy(err));
    }

    pub fn relay_data(&self, text: String) {
        let _ = self.command(ChannelCommand::RelayData(text));
    }

    pub fn relay_disconnected(&self) {
        let _ = self.command(ChannelCommand::RelayDisconnected);
    }

    fn command(&self, cmd: ChannelCommand) -> Result<()> {
        self.commands
            .send(cmd)
            .map_err(|_| MeshError::destroyed("channel is destroyed"))
    }
}

/// Start driving `channel` on a new task.
pub fn spawn(
    channel: Channel,
    transport: mpsc::UnboundedReceiver<TransportEvent>,
) -> (ChannelHandle, mpsc::UnboundedReceiver<ChannelEvent>) {
    let (command_tx, command_rx) = mpsc::unbounded_channel();
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let status = Arc::new(ChannelStatus::default());
    status.update(&channel);

    tokio::spawn(run_channel_loop(
        channel,
        Some(transport),
        command_rx,
        event_tx,
        Arc::clone(&status),
    ));

    (
        ChannelHandle {
            commands: command_tx,
            status,
        },
        event_rx,
    )
}

enum Step {
    Command(Option<ChannelCommand>),
    Transport(Option<TransportEvent>),
    Deadline,
}

async fn run_channel_loop(
    mut channel: Channel,
    mut transport: Option<mpsc::UnboundedReceiver<TransportEvent>>,
    mut commands: mpsc::UnboundedReceiver<ChannelCommand>,
    events: mpsc::UnboundedSender<ChannelEvent>,
    status: Arc<ChannelStatus>,
) {
    loop {
        let deadline = channel.deadline();
        let step = tokio::select! {
            cmd = commands.recv() => Step::Command(cmd),
            event = next_transport_event(&mut transport) => Step::Transport(event),
            _ = sleep_until(deadline) => Step::Deadline,
        };

        match step {
            // ── Commands from the owning peer ──────────────────────
            Step::Command(Some(cmd)) => match cmd {
                ChannelCommand::Signal(data) => {
                    if let Err(e) = channel.signal(data).await {
                        debug!(error = %e, "signal rejected");
                    }
                }
                ChannelCommand::Send(text, reply) => {
                    let _ = reply.send(channel.send(text).await);
                }
                ChannelCommand::Destroy(err) => channel.destroy(err).await,
                ChannelCommand::RelayData(text) => channel.inject_relay_data(text),
                ChannelCommand::RelayDisconnected => channel.relay_disconnected().await,
            },
            // Every handle is gone; nobody can observe this channel any more.
            Step::Command(None) => channel.destroy(None).await,

            // ── Transport primitive ────────────────────────────────
            Step::Transport(Some(event)) => channel.handle_transport_event(event).await,
            Step::Transport(None) => {
                trace!("transport event stream ended");
                transport = None;
            }

            // ── Fallback countdown ─────────────────────────────────
            Step::Deadline => channel.on_deadline().await,
        }

        if channel.is_relayed() {
            transport = None;
        }
        status.update(&channel);
        for event in channel.take_events() {
            let _ = events.send(event);
        }
        if channel.is_destroyed() {
            break;
        }
    }
    trace!("channel task finished");
}

async fn next_transport_event(
    transport: &mut Option<mpsc::UnboundedReceiver<TransportEvent>>,
) -> Option<TransportEvent> {
    match transport {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}
